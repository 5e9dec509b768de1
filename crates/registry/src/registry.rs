use barstream_core::common::{Principal, Symbol, SubscriptionType};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

type SymbolEntry = HashMap<SubscriptionType, HashSet<Principal>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    pub accepted: bool,
    pub was_new_type: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub accepted: bool,
    pub was_last_type: bool,
}

/// # Summary
/// In-process `symbol -> subscription_type -> principal set` registry. This
/// is the book of record for the current process's lifetime; `SqliteSubscriptionStore`
/// mirrors it across restarts but is never consulted for these decisions.
///
/// # Invariants
/// - `trades`/`quotes` are capped at `cap` distinct symbols each, counted
///   across the whole registry, not per principal.
/// - An empty `SymbolEntry` (no type has any principal left) is pruned from
///   the outer map — `entries.len()` never counts symbols with zero
///   subscribers of any type.
pub struct SubscriptionRegistry {
    entries: DashMap<Symbol, Mutex<SymbolEntry>>,
    type_index: Mutex<HashMap<SubscriptionType, HashSet<Symbol>>>,
    cap: usize,
}

impl SubscriptionRegistry {
    pub fn new(cap: usize) -> Self {
        Self {
            entries: DashMap::new(),
            type_index: Mutex::new(HashMap::new()),
            cap,
        }
    }

    /// Adds `principal` as a subscriber of `(symbol, subscription_type)`.
    /// Rejected without touching anything if the type is capped and
    /// `symbol` would be a new entry past the cap.
    pub async fn add(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
        principal: &Principal,
    ) -> AddOutcome {
        {
            let mut index = self.type_index.lock().await;
            let set = index.entry(subscription_type).or_default();
            if subscription_type.is_capped() && !set.contains(symbol) && set.len() >= self.cap {
                return AddOutcome {
                    accepted: false,
                    was_new_type: false,
                };
            }
            set.insert(symbol.clone());
        }

        let entry = self
            .entries
            .entry(symbol.clone())
            .or_insert_with(|| Mutex::new(HashMap::new()));
        let mut inner = entry.lock().await;
        let principals = inner.entry(subscription_type).or_default();
        let was_new_type = principals.is_empty();
        principals.insert(principal.clone());

        AddOutcome {
            accepted: true,
            was_new_type,
        }
    }

    /// Removes `principal` as a subscriber of `(symbol, subscription_type)`.
    /// Prunes the type entry and, if that empties the symbol entirely, the
    /// symbol entry itself — bottom-up, as spec'd.
    pub async fn remove(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
        principal: &Principal,
    ) -> RemoveOutcome {
        let Some(entry) = self.entries.get(symbol) else {
            return RemoveOutcome {
                accepted: false,
                was_last_type: false,
            };
        };

        let (was_last_type, now_empty) = {
            let mut inner = entry.lock().await;
            let was_last_type = match inner.get_mut(&subscription_type) {
                Some(principals) => {
                    principals.remove(principal);
                    if principals.is_empty() {
                        inner.remove(&subscription_type);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            };
            (was_last_type, inner.is_empty())
        };
        drop(entry);

        if now_empty {
            self.entries.remove(symbol);
        }
        if was_last_type {
            let mut index = self.type_index.lock().await;
            if let Some(set) = index.get_mut(&subscription_type) {
                set.remove(symbol);
            }
        }

        RemoveOutcome {
            accepted: true,
            was_last_type,
        }
    }

    pub async fn has(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
        principal: &Principal,
    ) -> bool {
        let Some(entry) = self.entries.get(symbol) else {
            return false;
        };
        entry
            .lock()
            .await
            .get(&subscription_type)
            .is_some_and(|principals| principals.contains(principal))
    }

    pub async fn principals(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Vec<Principal> {
        let Some(entry) = self.entries.get(symbol) else {
            return Vec::new();
        };
        entry
            .lock()
            .await
            .get(&subscription_type)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every symbol `principal` currently subscribes to, across all types.
    pub async fn symbols_for(&self, principal: &Principal) -> Vec<Symbol> {
        let mut result = Vec::new();
        for entry in self.entries.iter() {
            let inner = entry.value().lock().await;
            if inner.values().any(|set| set.contains(principal)) {
                result.push(entry.key().clone());
            }
        }
        result
    }

    /// Distinct symbol count currently subscribed under `subscription_type`.
    pub async fn count_for(&self, subscription_type: SubscriptionType) -> usize {
        self.type_index
            .lock()
            .await
            .get(&subscription_type)
            .map_or(0, HashSet::len)
    }

    /// Every symbol that currently has at least one subscriber of `subscription_type`.
    pub async fn active_symbols_for(&self, subscription_type: SubscriptionType) -> Vec<Symbol> {
        self.type_index
            .lock()
            .await
            .get(&subscription_type)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol(s: &str) -> Symbol {
        Symbol::new(s)
    }

    fn principal(s: &str) -> Principal {
        Principal::new(s)
    }

    #[tokio::test]
    async fn first_subscriber_reports_was_new_type() {
        let registry = SubscriptionRegistry::new(30);
        let outcome = registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("alice"))
            .await;
        assert!(outcome.accepted);
        assert!(outcome.was_new_type);
    }

    #[tokio::test]
    async fn second_subscriber_to_same_type_is_not_new() {
        let registry = SubscriptionRegistry::new(30);
        registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("alice"))
            .await;
        let outcome = registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("bob"))
            .await;
        assert!(!outcome.was_new_type);
    }

    #[tokio::test]
    async fn last_unsubscribe_reports_was_last_type_and_prunes_symbol() {
        let registry = SubscriptionRegistry::new(30);
        let principal = principal("alice");
        registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal)
            .await;
        let outcome = registry
            .remove(&symbol("AAPL"), SubscriptionType::Trades, &principal)
            .await;
        assert!(outcome.was_last_type);
        assert_eq!(registry.count_for(SubscriptionType::Trades).await, 0);
        assert!(registry.symbols_for(&principal).await.is_empty());
    }

    #[tokio::test]
    async fn removing_unknown_subscription_is_not_accepted() {
        let registry = SubscriptionRegistry::new(30);
        let outcome = registry
            .remove(&symbol("AAPL"), SubscriptionType::Trades, &principal("alice"))
            .await;
        assert!(!outcome.accepted);
        assert!(!outcome.was_last_type);
    }

    #[tokio::test]
    async fn capped_type_rejects_new_symbol_past_cap() {
        let registry = SubscriptionRegistry::new(1);
        registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("alice"))
            .await;
        let outcome = registry
            .add(&symbol("MSFT"), SubscriptionType::Trades, &principal("alice"))
            .await;
        assert!(!outcome.accepted);
        assert_eq!(registry.count_for(SubscriptionType::Trades).await, 1);
    }

    #[tokio::test]
    async fn capped_type_allows_additional_principal_on_existing_symbol_at_cap() {
        let registry = SubscriptionRegistry::new(1);
        registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("alice"))
            .await;
        let outcome = registry
            .add(&symbol("AAPL"), SubscriptionType::Trades, &principal("bob"))
            .await;
        assert!(outcome.accepted);
    }

    #[tokio::test]
    async fn bars_are_never_capped() {
        let registry = SubscriptionRegistry::new(1);
        registry
            .add(&symbol("AAPL"), SubscriptionType::Bars, &principal("alice"))
            .await;
        let outcome = registry
            .add(&symbol("MSFT"), SubscriptionType::Bars, &principal("alice"))
            .await;
        assert!(outcome.accepted);
    }
}
