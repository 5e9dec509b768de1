use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// # Summary
/// 一个带 TTL 的单值缓存槽，补充 `Cache` 端口（面向任意字节）无法表达的“新鲜度”语义。
///
/// # Invariants
/// - `get` 只在上次写入发生于 `ttl` 之内时返回 `Some`。
/// - 并发 `get_or_try_init` 调用不做去重合并（允许多次并发回源），换取实现的简单性。
pub struct CachedValue<T> {
    ttl: Duration,
    inner: RwLock<Option<(T, Instant)>>,
}

impl<T: Clone> CachedValue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    /// 仍在 TTL 窗口内则返回缓存值，否则返回 `None`。
    pub async fn get(&self) -> Option<T> {
        let guard = self.inner.read().await;
        match guard.as_ref() {
            Some((value, at)) if at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn set(&self, value: T) {
        let mut guard = self.inner.write().await;
        *guard = Some((value, Instant::now()));
    }

    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    /// 命中则直接返回，未命中则调用 `fetch` 回源并写回缓存。
    pub async fn get_or_try_init<F, Fut, E>(&self, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get().await {
            return Ok(cached);
        }
        let fresh = fetch().await?;
        self.set(fresh.clone()).await;
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn returns_none_before_first_set() {
        let cell: CachedValue<u32> = CachedValue::new(Duration::from_secs(60));
        assert_eq!(cell.get().await, None);
    }

    #[tokio::test]
    async fn returns_fresh_value_within_ttl() {
        let cell = CachedValue::new(Duration::from_secs(60));
        cell.set(42u32).await;
        assert_eq!(cell.get().await, Some(42));
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let cell = CachedValue::new(Duration::from_millis(10));
        cell.set(1u32).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cell.get().await, None);
    }

    #[tokio::test]
    async fn get_or_try_init_only_fetches_once_while_fresh() {
        let cell = CachedValue::new(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = cell
                .get_or_try_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(7u32)
                })
                .await
                .unwrap();
            assert_eq!(value, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
