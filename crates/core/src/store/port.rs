use super::entity::SubscriptionRow;
use super::error::StoreError;
use crate::common::{Minute, Principal, Symbol, SubscriptionType};
use crate::market::entity::{Candle, TradeEvent};
use async_trait::async_trait;

/// # Summary
/// K 线持久化接口，负责分钟 K（及可选的逐笔成交审计记录）的读写。
///
/// # Invariants
/// - `upsert_candle` 对同一 `(symbol, time)` 重复调用是幂等的（覆盖写）。
/// - `bulk_upsert` 不覆盖已存在且更"新"的数据由调用方保证语义，实现层只需原子地写入。
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 写入或覆盖单根 K 线。
    async fn upsert_candle(&self, symbol: &Symbol, candle: &Candle) -> Result<(), StoreError>;

    /// 批量写入/覆盖 K 线，返回实际写入的行数。
    async fn bulk_upsert(&self, symbol: &Symbol, candles: &[Candle]) -> Result<usize, StoreError>;

    /// 获取某符号最近 `limit` 根 K 线，按时间升序返回。
    async fn get_recent(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Candle>, StoreError>;

    /// 获取某符号在 `[start, end]` 范围内的 K 线；任一端为 `None` 表示不设边界。
    async fn get_range(
        &self,
        symbol: &Symbol,
        start: Option<Minute>,
        end: Option<Minute>,
    ) -> Result<Vec<Candle>, StoreError>;

    /// 某符号已持久化的 K 线总数。
    async fn count(&self, symbol: &Symbol) -> Result<usize, StoreError>;

    /// 尽力而为地记录一笔原始成交，用于审计；失败只记日志，不向上传播。
    async fn record_trade(&self, trade: &TradeEvent) -> Result<(), StoreError>;

    /// 清理早于 `before` 的历史数据，返回删除的行数。
    async fn cleanup(&self, symbol: &Symbol, before: Minute) -> Result<usize, StoreError>;
}

/// # Summary
/// 订阅状态的持久镜像，独立于内存中的 `SubscriptionRegistry`，用于进程重启后的恢复。
///
/// # Invariants
/// - `active_symbols` 在 `use_cache = true` 时允许返回至多 60 秒前的快照。
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// 记录某主体对某符号/类型的订阅为活跃。
    async fn subscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), StoreError>;

    /// 将某主体对某符号/类型的订阅标记为非活跃。
    async fn unsubscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), StoreError>;

    /// 某主体当前处于活跃状态的全部订阅行。
    async fn symbols_for(&self, principal: &Principal) -> Result<Vec<SubscriptionRow>, StoreError>;

    /// 当前存在至少一个活跃订阅的全部符号集合。
    ///
    /// `use_cache = false` 强制绕过 TTL 缓存直读数据库，用于启动时的订阅重建。
    async fn active_symbols(&self, use_cache: bool) -> Result<Vec<Symbol>, StoreError>;

    /// 某符号/类型组合当前有多少个活跃主体订阅。
    async fn subscriber_count(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<usize, StoreError>;
}
