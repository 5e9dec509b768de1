use crate::aggregator::Aggregator;
use barstream_core::common::Symbol;
use barstream_core::market::entity::AggregatorUpdate;
use barstream_core::market::port::HistoryProvider;
use barstream_core::store::port::CandleStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// # Summary
/// Symbol -> `Aggregator` registry. Aggregators are created lazily on first
/// subscription and then held for the lifetime of the process — there is no
/// eviction path, unlike the teacher's reference-counted `Market` registry.
///
/// # Invariants
/// - At most one `Aggregator` exists per `Symbol` at any time.
/// - The history backfill task for a symbol is spawned exactly once, right
///   after that symbol's aggregator is first created.
pub struct AggregatorRegistry {
    aggregators: DashMap<Symbol, Arc<Aggregator>>,
    candle_store: Option<Arc<dyn CandleStore>>,
    history_provider: Option<Arc<dyn HistoryProvider>>,
    update_tx: mpsc::Sender<AggregatorUpdate>,
    buffer_capacity: usize,
    history_limit: usize,
}

impl AggregatorRegistry {
    pub fn new(
        candle_store: Option<Arc<dyn CandleStore>>,
        history_provider: Option<Arc<dyn HistoryProvider>>,
        update_tx: mpsc::Sender<AggregatorUpdate>,
        buffer_capacity: usize,
        history_limit: usize,
    ) -> Self {
        Self {
            aggregators: DashMap::new(),
            candle_store,
            history_provider,
            update_tx,
            buffer_capacity,
            history_limit,
        }
    }

    /// Returns the existing aggregator for `symbol`, or creates one and
    /// kicks off a best-effort history backfill in the background.
    pub fn get_or_create(&self, symbol: &Symbol) -> Arc<Aggregator> {
        match self.aggregators.entry(symbol.clone()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let aggregator = Arc::new(Aggregator::new(
                    symbol.clone(),
                    self.buffer_capacity,
                    self.candle_store.clone(),
                    self.update_tx.clone(),
                ));
                entry.insert(aggregator.clone());
                self.spawn_backfill(symbol.clone(), aggregator.clone());
                aggregator
            }
        }
    }

    pub fn get(&self, symbol: &Symbol) -> Option<Arc<Aggregator>> {
        self.aggregators.get(symbol).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.aggregators.len()
    }

    fn spawn_backfill(&self, symbol: Symbol, aggregator: Arc<Aggregator>) {
        let Some(provider) = self.history_provider.clone() else {
            return;
        };
        let limit = self.history_limit;
        tokio::spawn(async move {
            match provider.fetch_recent_bars(&symbol, limit).await {
                Ok(history) => aggregator.load_history(history).await,
                Err(err) => {
                    warn!(%symbol, %err, "history backfill failed, aggregator starts empty");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_returns_same_aggregator_for_repeated_calls() {
        let (tx, _rx) = mpsc::channel(16);
        let registry = AggregatorRegistry::new(None, None, tx, 100, 50);
        let symbol = Symbol::new("AAPL");

        let first = registry.get_or_create(&symbol);
        let second = registry.get_or_create(&symbol);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_symbol() {
        let (tx, _rx) = mpsc::channel(16);
        let registry = AggregatorRegistry::new(None, None, tx, 100, 50);
        assert!(registry.get(&Symbol::new("AAPL")).is_none());
    }
}
