pub mod health;
pub mod snapshot;
pub mod stream;
pub mod subscriptions;
pub mod tradingview;
