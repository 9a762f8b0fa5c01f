//! Business services: the payment ledger, webhook reconciliation and downstream notification.

pub mod ledger;
pub mod notification;
pub mod webhook_processor;

pub use ledger::{PaymentLedgerService, TransitionOutcome, VerifyResult};
pub use notification::{NotificationDispatcher, PaidNotification};
pub use webhook_processor::{WebhookOutcome, WebhookProcessor, WebhookReport};
