use async_trait::async_trait;
use barstream_core::cache::error::CacheError;
use barstream_core::cache::port::Cache;
use dashmap::DashMap;

/// # Summary
/// 基于 DashMap 的内存缓存实现。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 不提供自动过期或容量限制，数据由业务逻辑管理。
pub struct MemCache {
    storage: DashMap<String, Vec<u8>>,
}

impl MemCache {
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
        }
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemCache {
    async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        self.storage.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.storage.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = MemCache::new();
        cache.set_raw("k", vec![1, 2, 3]).await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn del_removes_key() {
        let cache = MemCache::new();
        cache.set_raw("k", vec![1]).await.unwrap();
        cache.del("k").await.unwrap();
        assert_eq!(cache.get_raw("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let cache = MemCache::new();
        assert_eq!(cache.get_raw("missing").await.unwrap(), None);
    }
}
