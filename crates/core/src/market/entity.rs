use crate::common::{Minute, Symbol};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// # Summary
/// 单根 1 分钟 K 线，CandleBuffer 中以 `Minute` 为键存储的值。
///
/// # Invariants
/// - `high` 必须大于或等于 `low`, `open`, `close`。
/// - `time` 为该 K 线所属分钟的对齐时间戳（左闭）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Candle {
    pub time: Minute,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    // 该分钟内观测到的成交笔数；来自逐笔成交聚合时有效，来自上游分钟K直推时为 0。
    pub trade_count: u64,
    // 该分钟是否已收盘（即已经观测到属于下一分钟的事件，触发了滚动）。
    pub is_final: bool,
}

impl Candle {
    /// 用首笔成交开立一根新 K 线。
    pub fn open_with_trade(time: Minute, price: f64, size: f64) -> Self {
        Self {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
            trade_count: 1,
            is_final: false,
        }
    }

    /// 用一笔成交更新本根 K 线（调用方保证该成交属于本分钟）。
    pub fn apply_trade(&mut self, price: f64, size: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += size;
        self.trade_count += 1;
    }
}

/// # Summary
/// 上游逐笔成交事件，用于驱动聚合器增量更新当前 K 线。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub symbol: Symbol,
    pub price: f64,
    pub size: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub conditions: Vec<String>,
}

/// # Summary
/// 上游直推的分钟 K 线事件（部分上游不提供逐笔成交、只提供已成型的分钟 K）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarEvent {
    pub symbol: Symbol,
    pub time: Minute,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// # Summary
/// 聚合器向风扇出层投递的增量更新，取代了传统“回调”式接口。
///
/// # Invariants
/// - `Closed` 只在某分钟确定不再接收更新后发出一次。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AggregatorUpdate {
    /// 当前分钟的 K 线发生了增量变化（仍可能继续更新）。
    InProgress { symbol: Symbol, candle: Candle },
    /// 一根 K 线收盘，不会再发生变化。
    Closed { symbol: Symbol, candle: Candle },
    /// 历史回填完成后的一次性全量快照。
    Snapshot { symbol: Symbol, candles: Vec<Candle> },
}

impl AggregatorUpdate {
    pub fn symbol(&self) -> &Symbol {
        match self {
            AggregatorUpdate::InProgress { symbol, .. } => symbol,
            AggregatorUpdate::Closed { symbol, .. } => symbol,
            AggregatorUpdate::Snapshot { symbol, .. } => symbol,
        }
    }

    pub fn candle(&self) -> Option<&Candle> {
        match self {
            AggregatorUpdate::InProgress { candle, .. } => Some(candle),
            AggregatorUpdate::Closed { candle, .. } => Some(candle),
            AggregatorUpdate::Snapshot { .. } => None,
        }
    }

    /// `true` for the one-time history-backfill snapshot; SSE slots treat
    /// this the same way as their own connection-open snapshot.
    pub fn is_initial(&self) -> bool {
        matches!(self, AggregatorUpdate::Snapshot { .. })
    }
}
