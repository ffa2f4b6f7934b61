pub mod bucketer;
pub mod feed;

// Re-export the Candle struct for convenient access (e.g. `use crate::market_data::Candle`).
pub use bucketer::{Bucketer, Candle};
pub use feed::FeedEvent;
