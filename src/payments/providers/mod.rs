pub mod dlocal;
pub mod mercadopago;
pub mod paypal;
pub mod stripe;

pub use dlocal::{DlocalConfig, DlocalProvider};
pub use mercadopago::{MercadoPagoConfig, MercadoPagoProvider};
pub use paypal::{PaypalConfig, PaypalProvider};
pub use stripe::{StripeConfig, StripeProvider};
