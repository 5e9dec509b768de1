pub mod error;
pub mod fanout;

pub use error::FanoutError;
pub use fanout::{FanOut, SseMessage};
