//! 进程内 KV 实现
//!
//! 惰性过期：读取时检查 TTL，过期条目按不存在处理并顺手移除。
//! 用于测试与单进程部署；跨进程共享时换成外部 KV 实现。

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyValueStore, KvError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| Instant::now() >= t)
    }
}

/// 内存 KV 存储
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(e) if !e.is_expired() => return Ok(Some(e.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // 过期条目：升级为写锁移除
        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError> {
        let entry = Entry {
            value: value.to_string(),
            expires_at: Some(Instant::now() + ttl),
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, KvError> {
        let removed = self.entries.write().await.remove(key);
        Ok(removed.is_some_and(|e| !e.is_expired()))
    }

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired())
            .map(|(k, _)| k.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryKvStore::new();
        store
            .set_with_ttl("a:1", "hello", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.get("a:1").await.unwrap(), Some("hello".to_string()));
        assert!(store.delete("a:1").await.unwrap());
        assert_eq!(store.get("a:1").await.unwrap(), None);
        assert!(!store.delete("a:1").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryKvStore::new();
        store
            .set_with_ttl("a:1", "v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("a:1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_by_prefix() {
        let store = MemoryKvStore::new();
        let ttl = Duration::from_secs(60);
        store.set_with_ttl("session:1", "a", ttl).await.unwrap();
        store.set_with_ttl("session:2", "b", ttl).await.unwrap();
        store.set_with_ttl("cache:1", "c", ttl).await.unwrap();

        let mut keys = store.keys_by_prefix("session:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:1", "session:2"]);
    }
}
