//! 分类缓存
//!
//! 键为 (text, ctx_hash)：同一文本在相同的近期上下文指纹下，TTL 内直接复用
//! 上次的 Judgment，省掉一次上游调用。容量超限时按插入顺序淘汰最旧条目。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::judgment::Judgment;

type Key = (String, String);

struct CachedJudgment {
    judgment: Judgment,
    stored_at: Instant,
}

/// 带 TTL 与容量上限的分类缓存
pub struct ClassificationCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<Key, CachedJudgment>,
    /// 插入顺序，用于超容量时的最旧优先淘汰
    order: VecDeque<Key>,
}

impl ClassificationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, text: &str, ctx_hash: &str) -> Option<Judgment> {
        let key = (text.to_string(), ctx_hash.to_string());
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.entries.get(&key) {
            Some(cached) => {
                if cached.stored_at.elapsed() < self.ttl {
                    return Some(cached.judgment.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }
        None
    }

    pub fn put(&self, text: &str, ctx_hash: &str, judgment: Judgment) {
        let key = (text.to_string(), ctx_hash.to_string());
        let mut inner = self.inner.lock().unwrap();

        let cached = CachedJudgment {
            judgment,
            stored_at: Instant::now(),
        };
        if inner.entries.insert(key.clone(), cached).is_none() {
            inner.order.push_back(key);
        }

        while inner.entries.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn judgment(kind: &str) -> Judgment {
        Judgment {
            primary_kind: kind.to_string(),
            ..Judgment::fallback()
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = ClassificationCache::new(Duration::from_secs(300), 16);
        cache.put("hi", "h1", judgment("finance"));

        let hit = cache.get("hi", "h1").unwrap();
        assert_eq!(hit.primary_kind, "finance");
    }

    #[test]
    fn test_ctx_hash_is_part_of_key() {
        let cache = ClassificationCache::new(Duration::from_secs(300), 16);
        cache.put("hi", "h1", judgment("finance"));

        assert!(cache.get("hi", "h2").is_none());
        assert!(cache.get("hello", "h1").is_none());
    }

    #[test]
    fn test_expired_entry_is_removed() {
        let cache = ClassificationCache::new(Duration::from_millis(0), 16);
        cache.put("hi", "h1", judgment("finance"));

        assert!(cache.get("hi", "h1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_oldest_first_eviction() {
        let cache = ClassificationCache::new(Duration::from_secs(300), 2);
        cache.put("a", "h", judgment("a"));
        cache.put("b", "h", judgment("b"));
        cache.put("c", "h", judgment("c"));

        assert!(cache.get("a", "h").is_none());
        assert!(cache.get("b", "h").is_some());
        assert!(cache.get("c", "h").is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_overwrite_does_not_duplicate_order() {
        let cache = ClassificationCache::new(Duration::from_secs(300), 2);
        cache.put("a", "h", judgment("a1"));
        cache.put("a", "h", judgment("a2"));
        cache.put("b", "h", judgment("b"));

        assert_eq!(cache.get("a", "h").unwrap().primary_kind, "a2");
        assert_eq!(cache.len(), 2);
    }
}
