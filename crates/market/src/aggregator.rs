use crate::buffer::CandleBuffer;
use barstream_core::common::{Minute, Symbol};
use barstream_core::market::entity::{AggregatorUpdate, BarEvent, Candle, TradeEvent};
use barstream_core::store::port::CandleStore;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

struct AggregatorState {
    buffer: CandleBuffer,
    current_minute: Option<Minute>,
}

/// # Summary
/// Owns the rolling candle window for a single symbol and turns raw
/// upstream trade/bar events into `AggregatorUpdate`s for the fan-out layer.
///
/// # Invariants
/// - `current_minute` only ever advances forward; a late trade for an
///   already-closed minute updates that minute's candle in the buffer but
///   never re-opens it as the "current" one.
/// - A `Closed` update is emitted exactly once per minute, at the instant
///   the aggregator observes the first event belonging to the next minute.
pub struct Aggregator {
    symbol: Symbol,
    state: Mutex<AggregatorState>,
    candle_store: Option<Arc<dyn CandleStore>>,
    update_tx: mpsc::Sender<AggregatorUpdate>,
}

impl Aggregator {
    pub fn new(
        symbol: Symbol,
        capacity: usize,
        candle_store: Option<Arc<dyn CandleStore>>,
        update_tx: mpsc::Sender<AggregatorUpdate>,
    ) -> Self {
        Self {
            symbol,
            state: Mutex::new(AggregatorState {
                buffer: CandleBuffer::new(capacity),
                current_minute: None,
            }),
            candle_store,
            update_tx,
        }
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Seeds the buffer from persisted/history-backfilled candles without
    /// clobbering anything already aggregated live. If any candle was
    /// actually inserted, persists the resulting buffer contents off the
    /// critical path and emits a one-time full snapshot.
    pub async fn load_history(&self, history: Vec<Candle>) {
        let (inserted, snapshot) = {
            let mut state = self.state.lock().await;
            let inserted = state.buffer.bulk_insert(history);
            (inserted, state.buffer.range(None, None))
        };

        if inserted == 0 {
            return;
        }

        if let Some(store) = self.candle_store.clone() {
            let symbol = self.symbol.clone();
            let to_persist = snapshot.clone();
            tokio::spawn(async move {
                if let Err(err) = store.bulk_upsert(&symbol, &to_persist).await {
                    warn!(%symbol, %err, "failed to persist backfilled history");
                }
            });
        }

        self.emit(AggregatorUpdate::Snapshot {
            symbol: self.symbol.clone(),
            candles: snapshot,
        })
        .await;
    }

    pub async fn process_trade(&self, trade: &TradeEvent) {
        if trade.price <= 0.0 || trade.size <= 0.0 {
            warn!(symbol = %self.symbol, price = trade.price, size = trade.size, "discarding trade with non-positive price or size");
            return;
        }

        let minute = Minute::align(trade.timestamp);
        let mut closed: Option<Candle> = None;

        {
            let mut state = self.state.lock().await;
            match state.current_minute {
                None => state.current_minute = Some(minute),
                Some(current) if minute > current => {
                    closed = state.buffer.get(&current).copied();
                    state.current_minute = Some(minute);
                }
                _ => {}
            }
        }

        if let Some(mut candle) = closed {
            candle.is_final = true;
            self.finish_candle(candle).await;
        }

        let candle = {
            let mut state = self.state.lock().await;
            state.buffer.update_trade(minute, trade.price, trade.size)
        };
        self.emit(AggregatorUpdate::InProgress {
            symbol: self.symbol.clone(),
            candle,
        })
        .await;
    }

    /// Some upstreams push already-closed minute bars directly instead of
    /// (or alongside) raw trades; those are final the moment they arrive.
    pub async fn process_bar(&self, bar: &BarEvent) {
        let candle = Candle {
            time: bar.time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            trade_count: 0,
            is_final: true,
        };

        {
            let mut state = self.state.lock().await;
            state.buffer.set(candle);
            state.current_minute = Some(match state.current_minute {
                Some(current) if current >= bar.time => current,
                _ => bar.time,
            });
        }

        self.finish_candle(candle).await;
    }

    async fn finish_candle(&self, candle: Candle) {
        if let Some(store) = &self.candle_store {
            if let Err(err) = store.upsert_candle(&self.symbol, &candle).await {
                warn!(symbol = %self.symbol, %err, "failed to persist closed candle");
            }
        }
        self.emit(AggregatorUpdate::Closed {
            symbol: self.symbol.clone(),
            candle,
        })
        .await;
    }

    async fn emit(&self, update: AggregatorUpdate) {
        if self.update_tx.send(update).await.is_err() {
            warn!(symbol = %self.symbol, "aggregator update channel closed, dropping update");
        }
    }

    /// Full contents of the rolling window, oldest first — backs the
    /// snapshot REST endpoint.
    pub async fn snapshot(&self) -> Vec<Candle> {
        let state = self.state.lock().await;
        state.buffer.range(None, None)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn trade_at(minute_offset: i64, price: f64, size: f64) -> TradeEvent {
        TradeEvent {
            symbol: Symbol::new("AAPL"),
            price,
            size,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
                + chrono::Duration::minutes(minute_offset),
            conditions: vec![],
        }
    }

    #[tokio::test]
    async fn same_minute_trades_accumulate_into_one_candle() {
        let (tx, mut rx) = mpsc::channel(16);
        let agg = Aggregator::new(Symbol::new("AAPL"), 100, None, tx);
        agg.process_trade(&trade_at(0, 100.0, 1.0)).await;
        agg.process_trade(&trade_at(0, 101.0, 2.0)).await;

        assert_eq!(agg.len().await, 1);
        let snapshot = agg.snapshot().await;
        assert_eq!(snapshot[0].close, 101.0);
        assert_eq!(snapshot[0].volume, 3.0);

        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn minute_rollover_emits_closed_then_opens_new_candle() {
        let (tx, mut rx) = mpsc::channel(16);
        let agg = Aggregator::new(Symbol::new("AAPL"), 100, None, tx);
        agg.process_trade(&trade_at(0, 100.0, 1.0)).await;
        agg.process_trade(&trade_at(1, 200.0, 1.0)).await;

        assert_eq!(agg.len().await, 2);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, AggregatorUpdate::InProgress { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, AggregatorUpdate::Closed { .. }));
        assert_eq!(*second.candle().unwrap(), agg.snapshot().await[0]);
    }

    #[tokio::test]
    async fn load_history_does_not_overwrite_live_candle() {
        let (tx, _rx) = mpsc::channel(16);
        let agg = Aggregator::new(Symbol::new("AAPL"), 100, None, tx);
        agg.process_trade(&trade_at(0, 100.0, 1.0)).await;

        let minute = Minute::align(
            Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap(),
        );
        agg.load_history(vec![Candle {
            time: minute,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            trade_count: 0,
            is_final: true,
        }])
        .await;

        assert_eq!(agg.snapshot().await[0].open, 100.0);
    }

    #[tokio::test]
    async fn load_history_emits_snapshot_only_when_something_was_inserted() {
        let (tx, mut rx) = mpsc::channel(16);
        let agg = Aggregator::new(Symbol::new("AAPL"), 100, None, tx);

        let minute = Minute::align(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap());
        agg.load_history(vec![Candle {
            time: minute,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
            trade_count: 0,
            is_final: true,
        }])
        .await;

        let update = rx.recv().await.unwrap();
        assert!(update.is_initial());
        match update {
            AggregatorUpdate::Snapshot { candles, .. } => assert_eq!(candles.len(), 1),
            other => panic!("expected Snapshot, got {other:?}"),
        }

        // Nothing new to insert the second time, so no further emission.
        agg.load_history(vec![]).await;
        assert!(rx.try_recv().is_err());
    }
}
