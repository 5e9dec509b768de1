use barstream_core::common::{Symbol, SubscriptionType};
use barstream_core::store::error::StoreError;
use barstream_core::upstream::error::UpstreamError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("subscription cap exceeded for {subscription_type} on {symbol}")]
    CapExceeded {
        symbol: Symbol,
        subscription_type: SubscriptionType,
    },
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),
    #[error("persistent store error: {0}")]
    Store(#[from] StoreError),
}
