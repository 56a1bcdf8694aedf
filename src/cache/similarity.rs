//! 相似度响应缓存
//!
//! 以嵌入向量为键的 (请求, 响应) 缓存：语义等价的请求不必重复执行昂贵的
//! 分发。内存中按创建时间排序的索引负责容量淘汰；条目本体写入共享 KV 并带
//! TTL，sweep 定期清掉后备键已过期的索引项。命中只增加 access_count，
//! 不续期 TTL，避免无限期的陈旧。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::kv::KeyValueStore;
use crate::llm::EmbeddingProvider;

const KEY_PREFIX: &str = "simcache:";

/// 相似度缓存参数
#[derive(Debug, Clone)]
pub struct SimilarityCacheConfig {
    /// 命中所需的最低余弦相似度
    pub threshold: f32,
    /// 条目 TTL（写入时设定，读取不刷新）
    pub ttl: Duration,
    /// 内存索引容量上限（超限淘汰最旧）
    pub max_entries: usize,
}

impl Default for SimilarityCacheConfig {
    fn default() -> Self {
        Self {
            threshold: 0.92,
            ttl: Duration::from_secs(3600),
            max_entries: 512,
        }
    }
}

/// 缓存条目
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub key_embedding: Vec<f32>,
    pub original_text: String,
    pub response: String,
    /// 上下文指纹：查询时先做精确匹配预过滤
    pub context: Option<String>,
    pub metadata: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub access_count: u64,
}

/// 相似度缓存
pub struct SimilarityCache {
    embedder: Arc<dyn EmbeddingProvider>,
    kv: Arc<dyn KeyValueStore>,
    /// 创建时间有序（旧在前）
    entries: RwLock<Vec<CacheEntry>>,
    config: SimilarityCacheConfig,
}

impl SimilarityCache {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        kv: Arc<dyn KeyValueStore>,
        config: SimilarityCacheConfig,
    ) -> Self {
        Self {
            embedder,
            kv,
            entries: RwLock::new(Vec::new()),
            config,
        }
    }

    /// 查询：返回相似度达标的最佳条目（并列取最新），无则 None。
    /// 嵌入失败按未命中处理。
    pub async fn lookup(&self, text: &str, context: Option<&str>) -> Option<CacheEntry> {
        let query = match self.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, similarity lookup degrades to miss");
                return None;
            }
        };

        let now = Utc::now();
        let ttl = chrono::TimeDelta::from_std(self.config.ttl).ok()?;

        let mut entries = self.entries.write().await;
        let mut best: Option<(usize, f32)> = None;
        for (i, entry) in entries.iter().enumerate() {
            if entry.context.as_deref() != context {
                continue;
            }
            if now - entry.created_at >= ttl {
                continue;
            }
            let sim = cosine_similarity(&query, &entry.key_embedding);
            if sim < self.config.threshold {
                continue;
            }
            // >= 让并列时后创建的条目胜出（向量按创建时间排序）
            if best.map_or(true, |(_, s)| sim >= s) {
                best = Some((i, sim));
            }
        }

        let (index, sim) = best?;
        entries[index].access_count += 1;
        let hit = entries[index].clone();
        tracing::debug!(key = %hit.key, similarity = sim, "similarity cache hit");
        Some(hit)
    }

    /// 写入一条 (请求, 响应)；嵌入失败时放弃写入
    pub async fn store(
        &self,
        text: &str,
        response: &str,
        context: Option<String>,
        metadata: HashMap<String, String>,
    ) {
        let embedding = match self.embedder.embed(text).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, similarity store skipped");
                return;
            }
        };

        let entry = CacheEntry {
            key: format!("{}{}", KEY_PREFIX, uuid::Uuid::new_v4()),
            key_embedding: embedding,
            original_text: text.to_string(),
            response: response.to_string(),
            context,
            metadata,
            created_at: Utc::now(),
            access_count: 0,
        };

        // KV 写入尽力而为；索引条目始终生效
        match serde_json::to_string(&entry) {
            Ok(payload) => {
                if let Err(e) = self.kv.set_with_ttl(&entry.key, &payload, self.config.ttl).await {
                    tracing::warn!(key = %entry.key, error = %e, "similarity kv write failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "similarity entry serialize failed"),
        }

        let mut entries = self.entries.write().await;
        entries.push(entry);
        let overflow = entries.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            entries.drain(..overflow);
        }
    }

    /// 周期清扫：移除后备 KV 键已不存在（过期/被删）的索引项，返回移除数
    pub async fn sweep(&self) -> usize {
        let keys: Vec<String> = {
            let entries = self.entries.read().await;
            entries.iter().map(|e| e.key.clone()).collect()
        };

        let mut dead: Vec<String> = Vec::new();
        for key in keys {
            match self.kv.get(&key).await {
                Ok(None) => dead.push(key),
                Ok(Some(_)) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "sweep kv probe failed"),
            }
        }

        if dead.is_empty() {
            return 0;
        }
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| !dead.contains(&e.key));
        let removed = before - entries.len();
        tracing::debug!(removed, "similarity cache swept");
        removed
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// 余弦相似度；维度不符或零范数向量返回 0.0，从不除零
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;
    use crate::llm::MockEmbedder;

    fn cache() -> SimilarityCache {
        SimilarityCache::new(
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryKvStore::new()),
            SimilarityCacheConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_identity_roundtrip_hits() {
        let cache = cache();
        cache
            .store("how do I save money", "budget advice", None, HashMap::new())
            .await;

        let hit = cache.lookup("how do I save money", None).await.unwrap();
        assert_eq!(hit.response, "budget advice");
        assert_eq!(hit.access_count, 1);
    }

    #[tokio::test]
    async fn test_dissimilar_text_misses() {
        let cache = cache();
        cache
            .store("how do I save money", "budget advice", None, HashMap::new())
            .await;

        assert!(cache
            .lookup("completely unrelated quantum chromodynamics", None)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_context_prefilter() {
        let cache = cache();
        cache
            .store("hello", "reply-en", Some("en".to_string()), HashMap::new())
            .await;

        assert!(cache.lookup("hello", Some("zh")).await.is_none());
        assert!(cache.lookup("hello", None).await.is_none());
        assert!(cache.lookup("hello", Some("en")).await.is_some());
    }

    #[tokio::test]
    async fn test_tie_breaks_to_most_recent() {
        let cache = cache();
        cache.store("hello", "old", None, HashMap::new()).await;
        cache.store("hello", "new", None, HashMap::new()).await;

        let hit = cache.lookup("hello", None).await.unwrap();
        assert_eq!(hit.response, "new");
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = SimilarityCache::new(
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryKvStore::new()),
            SimilarityCacheConfig {
                max_entries: 2,
                ..Default::default()
            },
        );
        cache.store("first entry text", "r1", None, HashMap::new()).await;
        cache.store("second entry text", "r2", None, HashMap::new()).await;
        cache.store("third entry text", "r3", None, HashMap::new()).await;

        assert_eq!(cache.len().await, 2);
        assert!(cache.lookup("first entry text", None).await.is_none());
        assert!(cache.lookup("third entry text", None).await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_expiry_blocks_hit() {
        let cache = SimilarityCache::new(
            Arc::new(MockEmbedder::new()),
            Arc::new(MemoryKvStore::new()),
            SimilarityCacheConfig {
                ttl: Duration::from_millis(0),
                ..Default::default()
            },
        );
        cache.store("hello", "reply", None, HashMap::new()).await;
        assert!(cache.lookup("hello", None).await.is_none());
    }

    #[tokio::test]
    async fn test_sweep_prunes_dead_backing_keys() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
        let cache = SimilarityCache::new(
            Arc::new(MockEmbedder::new()),
            Arc::clone(&kv),
            SimilarityCacheConfig::default(),
        );
        cache.store("hello", "reply", None, HashMap::new()).await;
        assert_eq!(cache.sweep().await, 0);

        // 后备键消失后 sweep 应清掉索引项
        for key in kv.keys_by_prefix(KEY_PREFIX).await.unwrap() {
            kv.delete(&key).await.unwrap();
        }
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.is_empty().await);
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        // 零范数与维度不符都安全返回 0
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
