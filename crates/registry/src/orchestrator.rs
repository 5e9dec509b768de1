use crate::error::RegistryError;
use crate::registry::SubscriptionRegistry;
use barstream_core::common::{Principal, Symbol, SubscriptionType};
use barstream_core::store::port::SubscriptionStore;
use barstream_feed::UpstreamConnection;
use barstream_market::AggregatorRegistry;
use std::sync::Arc;
use tracing::warn;

const SYSTEM_PRINCIPAL: &str = "system";

/// # Summary
/// Single entry point for every subscribe/unsubscribe request. Sequences
/// aggregator creation, in-memory registry mutation, the upstream control
/// frame, and the persistent mirror in that fixed order, rolling the
/// registry mutation back if the upstream frame fails to send.
///
/// # Invariants
/// - Registry mutation always happens before the upstream frame; a failed
///   upstream subscribe leaves the registry exactly as it was before the
///   call.
/// - Persistent-store failures are logged, never propagated — the registry
///   is the book of record within a process lifetime.
pub struct SubscriptionOrchestrator {
    registry: Arc<SubscriptionRegistry>,
    aggregators: Arc<AggregatorRegistry>,
    upstream: Arc<UpstreamConnection>,
    persistent: Arc<dyn SubscriptionStore>,
}

impl SubscriptionOrchestrator {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        aggregators: Arc<AggregatorRegistry>,
        upstream: Arc<UpstreamConnection>,
        persistent: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            registry,
            aggregators,
            upstream,
            persistent,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn aggregators(&self) -> &Arc<AggregatorRegistry> {
        &self.aggregators
    }

    pub fn upstream(&self) -> &Arc<UpstreamConnection> {
        &self.upstream
    }

    pub fn persistent(&self) -> &Arc<dyn SubscriptionStore> {
        &self.persistent
    }

    pub async fn subscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), RegistryError> {
        self.aggregators.get_or_create(symbol);

        let outcome = self.registry.add(symbol, subscription_type, principal).await;
        if !outcome.accepted {
            return Err(RegistryError::CapExceeded {
                symbol: symbol.clone(),
                subscription_type,
            });
        }

        if outcome.was_new_type {
            let desired = self.registry.active_symbols_for(subscription_type).await;
            if let Err(err) = self.upstream.update_subscription(subscription_type, desired).await {
                self.registry.remove(symbol, subscription_type, principal).await;
                return Err(RegistryError::Upstream(err));
            }
        }

        if let Err(err) = self
            .persistent
            .subscribe(principal, symbol, subscription_type)
            .await
        {
            warn!(%symbol, %subscription_type, %err, "failed to persist subscription, registry already reflects it");
        }

        Ok(())
    }

    pub async fn unsubscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), RegistryError> {
        let outcome = self.registry.remove(symbol, subscription_type, principal).await;

        if outcome.was_last_type {
            let desired = self.registry.active_symbols_for(subscription_type).await;
            if let Err(err) = self.upstream.update_subscription(subscription_type, desired).await {
                warn!(%symbol, %subscription_type, %err, "failed to push upstream unsubscribe, registry already reflects desired state");
            }
        }

        if let Err(err) = self
            .persistent
            .unsubscribe(principal, symbol, subscription_type)
            .await
        {
            warn!(%symbol, %subscription_type, %err, "failed to persist unsubscription");
        }

        Ok(())
    }

    /// Re-establishes upstream streams for every symbol that was active
    /// before this process started, under a system principal so user
    /// subscribe/unsubscribe calls don't interfere with the rehydrated set.
    /// Returns the number of symbols rehydrated.
    pub async fn rehydrate(&self) -> Result<usize, RegistryError> {
        let symbols = self
            .persistent
            .active_symbols(false)
            .await
            .map_err(RegistryError::Store)?;
        let system = Principal::new(SYSTEM_PRINCIPAL);

        for symbol in &symbols {
            if let Err(err) = self.subscribe(&system, symbol, SubscriptionType::Trades).await {
                warn!(%symbol, %err, "failed to rehydrate subscription on startup");
            }
        }

        Ok(symbols.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use barstream_core::store::entity::SubscriptionRow;
    use barstream_core::store::error::StoreError;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::mpsc;

    struct FakeStore {
        active: StdMutex<Vec<Symbol>>,
    }

    #[async_trait]
    impl SubscriptionStore for FakeStore {
        async fn subscribe(
            &self,
            _principal: &Principal,
            _symbol: &Symbol,
            _subscription_type: SubscriptionType,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn unsubscribe(
            &self,
            _principal: &Principal,
            _symbol: &Symbol,
            _subscription_type: SubscriptionType,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn symbols_for(&self, _principal: &Principal) -> Result<Vec<SubscriptionRow>, StoreError> {
            Ok(Vec::new())
        }

        async fn active_symbols(&self, _use_cache: bool) -> Result<Vec<Symbol>, StoreError> {
            Ok(self.active.lock().unwrap().clone())
        }

        async fn subscriber_count(
            &self,
            _symbol: &Symbol,
            _subscription_type: SubscriptionType,
        ) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    fn orchestrator_with_active(symbols: Vec<Symbol>) -> SubscriptionOrchestrator {
        let (update_tx, _update_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let aggregators = Arc::new(AggregatorRegistry::new(None, None, update_tx, 100, 50));
        let upstream = UpstreamConnection::spawn(
            String::new(),
            String::new(),
            String::new(),
            barstream_feed::ReconnectPolicy {
                handshake_timeout: std::time::Duration::from_secs(1),
                base_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(1),
                attempts_before_cooldown: 1,
                cooldown: std::time::Duration::from_millis(1),
            },
            event_tx,
        );
        let persistent = Arc::new(FakeStore {
            active: StdMutex::new(symbols),
        });
        SubscriptionOrchestrator::new(
            Arc::new(SubscriptionRegistry::new(30)),
            aggregators,
            upstream,
            persistent,
        )
    }

    #[tokio::test]
    async fn subscribe_creates_aggregator_and_registry_entry() {
        let orchestrator = orchestrator_with_active(Vec::new());
        let principal = Principal::new("alice");
        let symbol = Symbol::new("AAPL");

        orchestrator
            .subscribe(&principal, &symbol, SubscriptionType::Bars)
            .await
            .unwrap();

        assert!(orchestrator.aggregators.get(&symbol).is_some());
        assert!(
            orchestrator
                .registry
                .has(&symbol, SubscriptionType::Bars, &principal)
                .await
        );
    }

    #[tokio::test]
    async fn cap_exceeded_is_surfaced_without_touching_registry() {
        let mut orchestrator = orchestrator_with_active(Vec::new());
        orchestrator.registry = Arc::new(SubscriptionRegistry::new(0));
        let err = orchestrator
            .subscribe(&Principal::new("alice"), &Symbol::new("AAPL"), SubscriptionType::Trades)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::CapExceeded { .. }));
    }

    #[tokio::test]
    async fn rehydrate_counts_active_symbols() {
        let orchestrator = orchestrator_with_active(vec![Symbol::new("AAPL"), Symbol::new("MSFT")]);
        let count = orchestrator.rehydrate().await.unwrap();
        assert_eq!(count, 2);
        assert!(orchestrator.aggregators.get(&Symbol::new("AAPL")).is_some());
    }
}
