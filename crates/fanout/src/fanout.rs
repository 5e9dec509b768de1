use crate::error::FanoutError;
use barstream_core::common::{Principal, Symbol, SubscriptionType};
use barstream_core::market::entity::AggregatorUpdate;
use barstream_core::store::port::SubscriptionStore;
use barstream_feed::UpstreamConnection;
use barstream_market::AggregatorRegistry;
use barstream_registry::SubscriptionRegistry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::warn;

/// A message enqueued on a subscriber's SSE slot.
#[derive(Debug, Clone)]
pub enum SseMessage {
    Update(AggregatorUpdate),
    Terminate,
}

struct SseSlot {
    tx: mpsc::Sender<SseMessage>,
    initialized: AtomicBool,
}

/// # Summary
/// Per-`(symbol, principal)` SSE slot table plus the broadcast dispatch that
/// routes `AggregatorUpdate`s from the market layer's shared channel to
/// every live slot for the matching symbol.
///
/// # Invariants
/// - At most one live slot per `(symbol, principal)`; opening a second one
///   terminates the first instead of running them side by side.
/// - A delta update is only forwarded to a slot once that slot has received
///   its initial snapshot — the snapshot always arrives first by
///   construction of `open_stream`.
pub struct FanOut {
    slots: DashMap<(Symbol, Principal), SseSlot>,
    slot_capacity: usize,
}

impl FanOut {
    pub fn new(slot_capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            slot_capacity,
        }
    }

    /// Opens (or replaces) the SSE slot for `(symbol, principal)` and seeds
    /// it with the aggregator's current snapshot. Returns the receiving end
    /// for the caller to poll plus a clone of the sending end, which the
    /// caller should hand to `remove_slot_if_current` on cleanup so a
    /// delayed cleanup from a replaced connection can't delete the slot
    /// that replaced it.
    pub async fn open_stream(
        &self,
        aggregators: &AggregatorRegistry,
        symbol: &Symbol,
        principal: &Principal,
    ) -> Result<(mpsc::Receiver<SseMessage>, mpsc::Sender<SseMessage>), FanoutError> {
        let aggregator = aggregators
            .get(symbol)
            .ok_or_else(|| FanoutError::SymbolNotSubscribed(symbol.clone()))?;

        let (tx, rx) = mpsc::channel(self.slot_capacity);
        let key = (symbol.clone(), principal.clone());

        if let Some((_, old)) = self.slots.remove(&key) {
            let _ = old.tx.try_send(SseMessage::Terminate);
        }
        self.slots.insert(
            key.clone(),
            SseSlot {
                tx: tx.clone(),
                initialized: AtomicBool::new(false),
            },
        );

        let candles = aggregator.snapshot().await;
        let initial = AggregatorUpdate::Snapshot {
            symbol: symbol.clone(),
            candles,
        };
        if tx.try_send(SseMessage::Update(initial)).is_ok() {
            if let Some(slot) = self.slots.get(&key) {
                slot.initialized.store(true, Ordering::Release);
            }
        }

        Ok((rx, tx))
    }

    /// Removes the slot for `(symbol, principal)`, if any. Called when the
    /// SSE event loop exits (client close, error, or replacement).
    pub fn remove_slot(&self, symbol: &Symbol, principal: &Principal) {
        self.slots.remove(&(symbol.clone(), principal.clone()));
    }

    /// Removes the slot for `(symbol, principal)` only if it is still the
    /// one backed by `tx` — guards against a just-replaced slot (opened by
    /// a second connection for the same key) being deleted by the first
    /// connection's delayed cleanup.
    pub fn remove_slot_if_current(
        &self,
        symbol: &Symbol,
        principal: &Principal,
        tx: &mpsc::Sender<SseMessage>,
    ) {
        let key = (symbol.clone(), principal.clone());
        self.slots.remove_if(&key, |_, slot| slot.tx.same_channel(tx));
    }

    pub fn has_slot_for(&self, symbol: &Symbol) -> bool {
        self.slots.iter().any(|entry| &entry.key().0 == symbol)
    }

    /// Forwards `update` to every initialized slot for its symbol (or every
    /// slot at all, if `update` is itself an initial snapshot), dropping
    /// any slot whose queue is full or closed.
    pub fn dispatch(&self, update: &AggregatorUpdate) {
        let symbol = update.symbol();
        let mut dead = Vec::new();

        for entry in self.slots.iter() {
            let (slot_symbol, principal) = entry.key();
            if slot_symbol != symbol {
                continue;
            }
            let slot = entry.value();
            let initialized = slot.initialized.load(Ordering::Acquire);
            if !update.is_initial() && !initialized {
                continue;
            }
            match slot.tx.try_send(SseMessage::Update(update.clone())) {
                Ok(()) => {
                    if update.is_initial() {
                        slot.initialized.store(true, Ordering::Release);
                    }
                }
                Err(_) => dead.push((slot_symbol.clone(), principal.clone())),
            }
        }

        for key in dead {
            self.slots.remove(&key);
        }
    }

    /// Consumes `AggregatorUpdate`s from the market layer's shared channel
    /// for the lifetime of the process, dispatching each to matching slots.
    pub fn spawn_dispatch_loop(
        self: std::sync::Arc<Self>,
        mut update_rx: mpsc::Receiver<AggregatorUpdate>,
    ) {
        tokio::spawn(async move {
            while let Some(update) = update_rx.recv().await {
                self.dispatch(&update);
            }
        });
    }

    /// Called after a slot closes: if no SSE viewer remains for `symbol`
    /// and the persistent store shows no subscriber either, retracts the
    /// symbol from the upstream feed for whichever subscription types are
    /// now fully idle.
    pub async fn maybe_cascade_unsubscribe(
        &self,
        symbol: &Symbol,
        persistent: &dyn SubscriptionStore,
        registry: &SubscriptionRegistry,
        upstream: &UpstreamConnection,
    ) {
        if self.has_slot_for(symbol) {
            return;
        }

        for subscription_type in [
            SubscriptionType::Trades,
            SubscriptionType::Quotes,
            SubscriptionType::Bars,
        ] {
            let persisted = persistent
                .subscriber_count(symbol, subscription_type)
                .await
                .unwrap_or(1);
            if persisted > 0 {
                continue;
            }

            let active = registry.active_symbols_for(subscription_type).await;
            if !active.contains(symbol) {
                continue;
            }

            let remaining: Vec<Symbol> = active.into_iter().filter(|s| s != symbol).collect();
            if let Err(err) = upstream.update_subscription(subscription_type, remaining).await {
                warn!(%symbol, %subscription_type, %err, "cascade unsubscribe failed to reach upstream");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barstream_core::market::entity::Candle;
    use std::sync::Arc;

    #[tokio::test]
    async fn open_stream_rejects_unknown_symbol() {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let aggregators = AggregatorRegistry::new(None, None, update_tx, 100, 50);
        let fanout = FanOut::new(10);

        let err = fanout
            .open_stream(&aggregators, &Symbol::new("AAPL"), &Principal::new("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::SymbolNotSubscribed(_)));
    }

    #[tokio::test]
    async fn open_stream_delivers_snapshot_first() {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let aggregators = AggregatorRegistry::new(None, None, update_tx, 100, 50);
        let symbol = Symbol::new("AAPL");
        aggregators.get_or_create(&symbol);
        let fanout = FanOut::new(10);

        let (mut rx, _tx) = fanout
            .open_stream(&aggregators, &symbol, &Principal::new("alice"))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert!(matches!(
            msg,
            SseMessage::Update(AggregatorUpdate::Snapshot { .. })
        ));
    }

    #[tokio::test]
    async fn opening_second_stream_terminates_the_first() {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let aggregators = AggregatorRegistry::new(None, None, update_tx, 100, 50);
        let symbol = Symbol::new("AAPL");
        aggregators.get_or_create(&symbol);
        let fanout = FanOut::new(10);
        let principal = Principal::new("alice");

        let (mut first, first_tx) = fanout.open_stream(&aggregators, &symbol, &principal).await.unwrap();
        let _ = fanout.open_stream(&aggregators, &symbol, &principal).await.unwrap();

        first.recv().await.unwrap();
        let next = first.recv().await.unwrap();
        assert!(matches!(next, SseMessage::Terminate));

        // A delayed cleanup from the first (replaced) connection must not
        // delete the second connection's slot.
        fanout.remove_slot_if_current(&symbol, &principal, &first_tx);
        assert!(fanout.has_slot_for(&symbol));
    }

    #[tokio::test]
    async fn dispatch_skips_delta_updates_for_uninitialized_slots() {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let aggregators = Arc::new(AggregatorRegistry::new(None, None, update_tx, 100, 50));
        let symbol = Symbol::new("AAPL");
        aggregators.get_or_create(&symbol);
        let fanout = FanOut::new(10);

        // Manually register a slot without running it through open_stream,
        // so it starts out uninitialized.
        let (tx, mut rx) = mpsc::channel(10);
        fanout.slots.insert(
            (symbol.clone(), Principal::new("alice")),
            SseSlot {
                tx,
                initialized: AtomicBool::new(false),
            },
        );

        fanout.dispatch(&AggregatorUpdate::InProgress {
            symbol: symbol.clone(),
            candle: Candle {
                time: barstream_core::common::Minute::now(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
                trade_count: 1,
                is_final: false,
            },
        });

        assert!(rx.try_recv().is_err());
    }
}
