use barstream_core::common::Symbol;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanoutError {
    #[error("symbol not subscribed: {0}")]
    SymbolNotSubscribed(Symbol),
}
