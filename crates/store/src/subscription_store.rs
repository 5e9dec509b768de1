use async_trait::async_trait;
use barstream_cache::CachedValue;
use barstream_core::common::{Principal, Symbol, SubscriptionType};
use barstream_core::store::entity::SubscriptionRow;
use barstream_core::store::error::StoreError;
use barstream_core::store::port::SubscriptionStore;
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SUBSCRIPTIONS_DB: &str = "subscriptions.db";

/// SQLite 实现的持久订阅镜像，独立于内存中的符号->订阅者注册表。
///
/// # Summary
/// `active_symbols` 是启动重建与风扇出层都会高频调用的路径，因此在其上叠加了
/// 一个 60 秒 TTL 的内存缓存，避免每次查询都打到数据库。
///
/// # Invariants
/// * 写操作（`subscribe`/`unsubscribe`）总是让缓存失效，保证下一次 `use_cache = true`
///   的调用不会返回超过一个 TTL 窗口的陈旧数据。
pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
    active_symbols_cache: CachedValue<Vec<Symbol>>,
}

impl SqliteSubscriptionStore {
    pub async fn new(ttl: Duration) -> Result<Self, StoreError> {
        let root = crate::config::get_root_dir();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::at_path(root.join(DEFAULT_SUBSCRIPTIONS_DB), ttl).await
    }

    pub async fn at_path(db_path: PathBuf, ttl: Duration) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                principal TEXT NOT NULL,
                symbol TEXT NOT NULL,
                subscription_type TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                last_active_at DATETIME NOT NULL,
                PRIMARY KEY (principal, symbol, subscription_type)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            pool,
            active_symbols_cache: CachedValue::new(ttl),
        })
    }

    async fn set_active(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
        is_active: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO subscriptions
                (principal, symbol, subscription_type, is_active, last_active_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(principal.as_str())
        .bind(symbol.as_str())
        .bind(subscription_type.to_string())
        .bind(is_active as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.active_symbols_cache.invalidate().await;
        Ok(())
    }

    async fn fetch_active_symbols(&self) -> Result<Vec<Symbol>, StoreError> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT symbol FROM subscriptions WHERE is_active = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(rows.into_iter().map(Symbol::new).collect())
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn subscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), StoreError> {
        self.set_active(principal, symbol, subscription_type, true).await
    }

    async fn unsubscribe(
        &self,
        principal: &Principal,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<(), StoreError> {
        self.set_active(principal, symbol, subscription_type, false).await
    }

    async fn symbols_for(&self, principal: &Principal) -> Result<Vec<SubscriptionRow>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, String, i64, DateTime<Utc>)>(
            r#"
            SELECT principal, symbol, subscription_type, is_active, last_active_at
            FROM subscriptions
            WHERE principal = ? AND is_active = 1
            "#,
        )
        .bind(principal.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter()
            .map(|r| {
                let subscription_type = SubscriptionType::from_str(&r.2)
                    .map_err(StoreError::Database)?;
                Ok(SubscriptionRow {
                    principal: Principal::new(r.0),
                    symbol: Symbol::new(r.1),
                    subscription_type,
                    is_active: r.3 != 0,
                    last_active_at: r.4,
                })
            })
            .collect()
    }

    async fn active_symbols(&self, use_cache: bool) -> Result<Vec<Symbol>, StoreError> {
        if use_cache {
            self.active_symbols_cache
                .get_or_try_init(|| self.fetch_active_symbols())
                .await
        } else {
            let fresh = self.fetch_active_symbols().await?;
            self.active_symbols_cache.set(fresh.clone()).await;
            Ok(fresh)
        }
    }

    async fn subscriber_count(
        &self,
        symbol: &Symbol,
        subscription_type: SubscriptionType,
    ) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM subscriptions
            WHERE symbol = ? AND subscription_type = ? AND is_active = 1
            "#,
        )
        .bind(symbol.as_str())
        .bind(subscription_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn new_store() -> (SqliteSubscriptionStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteSubscriptionStore::at_path(dir.path().join("test.db"), Duration::from_secs(60))
            .await
            .unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn subscribe_then_symbols_for_returns_row() {
        let (store, _dir) = new_store().await;
        let principal = Principal::new("alice");
        let symbol = Symbol::new("AAPL");
        store
            .subscribe(&principal, &symbol, SubscriptionType::Trades)
            .await
            .unwrap();

        let rows = store.symbols_for(&principal).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, symbol);
        assert!(rows[0].is_active);
    }

    #[tokio::test]
    async fn unsubscribe_excludes_from_symbols_for() {
        let (store, _dir) = new_store().await;
        let principal = Principal::new("alice");
        let symbol = Symbol::new("AAPL");
        store
            .subscribe(&principal, &symbol, SubscriptionType::Trades)
            .await
            .unwrap();
        store
            .unsubscribe(&principal, &symbol, SubscriptionType::Trades)
            .await
            .unwrap();

        assert!(store.symbols_for(&principal).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn active_symbols_no_cache_reflects_writes_immediately() {
        let (store, _dir) = new_store().await;
        let principal = Principal::new("alice");
        let symbol = Symbol::new("AAPL");
        store
            .subscribe(&principal, &symbol, SubscriptionType::Trades)
            .await
            .unwrap();

        let symbols = store.active_symbols(false).await.unwrap();
        assert_eq!(symbols, vec![symbol]);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_active_subscribers() {
        let (store, _dir) = new_store().await;
        let symbol = Symbol::new("AAPL");
        store
            .subscribe(&Principal::new("alice"), &symbol, SubscriptionType::Quotes)
            .await
            .unwrap();
        store
            .subscribe(&Principal::new("bob"), &symbol, SubscriptionType::Quotes)
            .await
            .unwrap();

        assert_eq!(
            store.subscriber_count(&symbol, SubscriptionType::Quotes).await.unwrap(),
            2
        );
    }
}
