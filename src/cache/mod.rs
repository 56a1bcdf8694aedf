//! 缓存层：基于嵌入向量的相似度响应缓存

pub mod similarity;

pub use similarity::{CacheEntry, SimilarityCache, SimilarityCacheConfig};
