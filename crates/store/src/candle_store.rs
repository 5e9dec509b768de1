use async_trait::async_trait;
use barstream_core::common::{Minute, Symbol};
use barstream_core::market::entity::{Candle, TradeEvent};
use barstream_core::store::error::StoreError;
use barstream_core::store::port::CandleStore;
use chrono::{DateTime, Utc};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::PathBuf;

const DEFAULT_MARKET_DB: &str = "market.db";

/// SQLite 实现的 K 线持久化存储。
///
/// # Summary
/// 单一数据库文件承载全部符号的 `ohlcv_1m` 与 `trades` 两张表，
/// 区别于按符号分库的方案，因为这里的表结构本身已以 `symbol` 列区分。
///
/// # Invariants
/// * 表结构在实例创建时完成初始化。
/// * 所有操作共享同一个连接池。
pub struct SqliteCandleStore {
    pool: SqlitePool,
}

impl SqliteCandleStore {
    pub async fn new() -> Result<Self, StoreError> {
        let root = crate::config::get_root_dir();
        std::fs::create_dir_all(&root).map_err(|e| StoreError::Database(e.to_string()))?;
        Self::at_path(root.join(DEFAULT_MARKET_DB)).await
    }

    pub async fn at_path(db_path: PathBuf) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ohlcv_1m (
                symbol TEXT NOT NULL,
                time DATETIME NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                trade_count INTEGER NOT NULL,
                PRIMARY KEY (symbol, time)
            );

            CREATE TABLE IF NOT EXISTS trades (
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                size REAL NOT NULL,
                timestamp DATETIME NOT NULL,
                conditions TEXT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    async fn upsert_one(&self, symbol: &Symbol, candle: &Candle) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO ohlcv_1m
                (symbol, time, open, high, low, close, volume, trade_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol.as_str())
        .bind(candle.time.as_datetime())
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(i64::try_from(candle.trade_count).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    fn row_to_candle(row: (DateTime<Utc>, f64, f64, f64, f64, f64, i64)) -> Candle {
        Candle {
            time: Minute::align(row.0),
            open: row.1,
            high: row.2,
            low: row.3,
            close: row.4,
            volume: row.5,
            trade_count: u64::try_from(row.6).unwrap_or(0),
            is_final: true,
        }
    }
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn upsert_candle(&self, symbol: &Symbol, candle: &Candle) -> Result<(), StoreError> {
        self.upsert_one(symbol, candle).await
    }

    async fn bulk_upsert(&self, symbol: &Symbol, candles: &[Candle]) -> Result<usize, StoreError> {
        for candle in candles {
            self.upsert_one(symbol, candle).await?;
        }
        Ok(candles.len())
    }

    async fn get_recent(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Candle>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, (DateTime<Utc>, f64, f64, f64, f64, f64, i64)>(
            r#"
            SELECT time, open, high, low, close, volume, trade_count
            FROM ohlcv_1m
            WHERE symbol = ?
            ORDER BY time DESC
            LIMIT ?
            "#,
        )
        .bind(symbol.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut candles: Vec<Candle> = rows.into_iter().map(Self::row_to_candle).collect();
        candles.reverse();
        Ok(candles)
    }

    async fn get_range(
        &self,
        symbol: &Symbol,
        start: Option<Minute>,
        end: Option<Minute>,
    ) -> Result<Vec<Candle>, StoreError> {
        let start_bound = start.map(|m| m.as_datetime()).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end_bound = end.map(|m| m.as_datetime()).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let rows = sqlx::query_as::<_, (DateTime<Utc>, f64, f64, f64, f64, f64, i64)>(
            r#"
            SELECT time, open, high, low, close, volume, trade_count
            FROM ohlcv_1m
            WHERE symbol = ? AND time >= ? AND time <= ?
            ORDER BY time ASC
            "#,
        )
        .bind(symbol.as_str())
        .bind(start_bound)
        .bind(end_bound)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Self::row_to_candle).collect())
    }

    async fn count(&self, symbol: &Symbol) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ohlcv_1m WHERE symbol = ?")
            .bind(symbol.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    async fn record_trade(&self, trade: &TradeEvent) -> Result<(), StoreError> {
        let conditions = trade.conditions.join(",");
        sqlx::query(
            "INSERT INTO trades (symbol, price, size, timestamp, conditions) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(trade.symbol.as_str())
        .bind(trade.price)
        .bind(trade.size)
        .bind(trade.timestamp)
        .bind(conditions)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn cleanup(&self, symbol: &Symbol, before: Minute) -> Result<usize, StoreError> {
        let result = sqlx::query("DELETE FROM ohlcv_1m WHERE symbol = ? AND time < ?")
            .bind(symbol.as_str())
            .bind(before.as_datetime())
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(usize::try_from(result.rows_affected()).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use barstream_core::common::Minute;
    use chrono::TimeZone;
    use tempfile::tempdir;

    async fn new_store() -> (SqliteCandleStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = SqliteCandleStore::at_path(dir.path().join("test.db"))
            .await
            .unwrap();
        (store, dir)
    }

    fn candle(minute: i64, close: f64) -> Candle {
        let time = Minute::align(Utc.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap() + chrono::Duration::minutes(minute));
        Candle {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
            trade_count: 1,
            is_final: true,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_recent_roundtrips() {
        let (store, _dir) = new_store().await;
        let symbol = Symbol::new("AAPL");
        store.upsert_candle(&symbol, &candle(0, 150.0)).await.unwrap();
        store.upsert_candle(&symbol, &candle(1, 151.0)).await.unwrap();

        let recent = store.get_recent(&symbol, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].close, 150.0);
        assert_eq!(recent[1].close, 151.0);
    }

    #[tokio::test]
    async fn upsert_is_idempotent_overwrite() {
        let (store, _dir) = new_store().await;
        let symbol = Symbol::new("AAPL");
        store.upsert_candle(&symbol, &candle(0, 150.0)).await.unwrap();
        store.upsert_candle(&symbol, &candle(0, 999.0)).await.unwrap();

        assert_eq!(store.count(&symbol).await.unwrap(), 1);
        let recent = store.get_recent(&symbol, 10).await.unwrap();
        assert_eq!(recent[0].close, 999.0);
    }

    #[tokio::test]
    async fn get_range_open_ended_bounds() {
        let (store, _dir) = new_store().await;
        let symbol = Symbol::new("AAPL");
        for i in 0..5 {
            store.upsert_candle(&symbol, &candle(i, 100.0 + i as f64)).await.unwrap();
        }

        let all = store.get_range(&symbol, None, None).await.unwrap();
        assert_eq!(all.len(), 5);

        let from_mid = store
            .get_range(&symbol, Some(candle(2, 0.0).time), None)
            .await
            .unwrap();
        assert_eq!(from_mid.len(), 3);
    }

    #[tokio::test]
    async fn cleanup_deletes_before_cutoff() {
        let (store, _dir) = new_store().await;
        let symbol = Symbol::new("AAPL");
        for i in 0..5 {
            store.upsert_candle(&symbol, &candle(i, 100.0)).await.unwrap();
        }
        let cutoff = candle(3, 0.0).time;
        let deleted = store.cleanup(&symbol, cutoff).await.unwrap();
        assert_eq!(deleted, 3);
        assert_eq!(store.count(&symbol).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn record_trade_does_not_error() {
        let (store, _dir) = new_store().await;
        let trade = TradeEvent {
            symbol: Symbol::new("AAPL"),
            price: 150.0,
            size: 10.0,
            timestamp: Utc::now(),
            conditions: vec!["@".to_string()],
        };
        store.record_trade(&trade).await.unwrap();
    }
}
