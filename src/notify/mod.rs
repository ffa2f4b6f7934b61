//! Alert delivery.  The engine only produces `AlertEvent`s; this module turns
//! them into messages and ships them.

pub mod telegram;

pub use telegram::{format_alert, run_alert_sink, TelegramNotifier};
