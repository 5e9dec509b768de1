//! # 数据面工作循环
//!
//! 把上游解复用出的 `UpstreamEvent` 路由到对应 symbol 的 `Aggregator`。
//! 这是连接 `barstream-feed` 与 `barstream-market` 的唯一桥梁，除此之外两
//! 个 crate 互不知晓对方的存在。

use barstream_feed::UpstreamEvent;
use barstream_market::AggregatorRegistry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Drains `event_rx` until the channel closes, dispatching every event to
/// its symbol's aggregator. Closing the channel (dropping every `event_tx`
/// clone) is how the shutdown sequence stops this loop.
pub async fn run(aggregators: Arc<AggregatorRegistry>, mut event_rx: mpsc::Receiver<UpstreamEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            UpstreamEvent::Trade(trade) => {
                let aggregator = aggregators.get_or_create(&trade.symbol);
                aggregator.process_trade(&trade).await;
            }
            UpstreamEvent::Bar(bar) => {
                let aggregator = aggregators.get_or_create(&bar.symbol);
                aggregator.process_bar(&bar).await;
            }
        }
    }
    debug!("data-plane worker loop exiting, inbound queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use barstream_core::common::Symbol;
    use barstream_core::market::entity::{AggregatorUpdate, TradeEvent};
    use chrono::Utc;

    #[tokio::test]
    async fn trade_event_reaches_its_symbols_aggregator() {
        let (update_tx, mut update_rx) = mpsc::channel(16);
        let aggregators = Arc::new(AggregatorRegistry::new(None, None, update_tx, 10, 10));
        let (event_tx, event_rx) = mpsc::channel(16);

        let worker = tokio::spawn(run(aggregators.clone(), event_rx));

        event_tx
            .send(UpstreamEvent::Trade(TradeEvent {
                symbol: Symbol::new("AAPL"),
                price: 100.0,
                size: 10.0,
                timestamp: Utc::now(),
                conditions: Vec::new(),
            }))
            .await
            .unwrap();
        drop(event_tx);
        worker.await.unwrap();

        let update = update_rx.recv().await.unwrap();
        assert!(matches!(update, AggregatorUpdate::InProgress { .. }));
        assert_eq!(update.symbol(), &Symbol::new("AAPL"));
    }
}
