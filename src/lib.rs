//! Multi-provider payment links with a webhook-driven reconciliation ledger.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;

pub use error::{AppError, AppResult};
