use crate::common::Symbol;
use crate::market::entity::Candle;
use crate::market::error::MarketError;
use async_trait::async_trait;

/// # Summary
/// 历史 K 线数据提供者，用于新建聚合器时回填最近窗口的分钟 K。
///
/// # Invariants
/// - 实现者负责自身的超时与重试；本 trait 只约定语义，不约定传输细节。
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// # Summary
    /// 拉取某个符号最近 `limit` 根已收盘的分钟 K。
    ///
    /// # Returns
    /// 按时间升序排列的 K 线列表；上游无数据时返回空列表而非错误。
    async fn fetch_recent_bars(
        &self,
        symbol: &Symbol,
        limit: usize,
    ) -> Result<Vec<Candle>, MarketError>;
}
