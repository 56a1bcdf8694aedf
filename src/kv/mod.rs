//! 共享键值存储抽象
//!
//! 上下文存储与相似度缓存共用的外部 KV 协作方（典型部署为 Redis 一类带 TTL
//! 的共享存储）。本 crate 只依赖这四个操作；进程内实现见 memory.rs。

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryKvStore;

/// KV 操作错误（连接、序列化由调用方处理，这里只表达存取失败）
#[derive(Error, Debug, Clone)]
pub enum KvError {
    #[error("KV backend error: {0}")]
    Backend(String),
}

/// 共享键值存储：get / set-with-ttl / delete / keys-by-prefix
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), KvError>;

    /// 返回键是否存在并被删除
    async fn delete(&self, key: &str) -> Result<bool, KvError>;

    async fn keys_by_prefix(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}
