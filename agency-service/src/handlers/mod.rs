pub mod comments;
pub mod content_items;
pub mod devices;
pub mod health;
pub mod invoices;
pub mod verification;

pub use health::{health_check, metrics};
