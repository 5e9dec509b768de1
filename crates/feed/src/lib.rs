pub mod history;
pub mod upstream;

pub use history::HistoryBackfill;
pub use upstream::{ConnectionState, ReconnectPolicy, UpstreamConnection, UpstreamEvent};
