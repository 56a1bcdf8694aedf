//! 能力注册表
//!
//! 持有全部已注册 Worker（进程内唯一的全局可变集合），由组合根显式构造并
//! 传入 Dispatcher——没有单例。探测前先在短锁内取活跃集快照，锁从不跨越
//! score 调用；探测抛错的 Worker 只在本轮被排除。

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use super::traits::Worker;
use crate::classify::Judgment;
use crate::context::Session;

/// find_capable 的默认最低适配度
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.3;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("worker id already registered: {0}")]
    DuplicateId(String),
}

struct Registered {
    worker: Arc<dyn Worker>,
    active: bool,
}

/// Worker 注册表
#[derive(Default)]
pub struct CapabilityRegistry {
    /// 注册顺序即向量顺序；排序并列时以此为准
    entries: RwLock<Vec<Registered>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个 Worker；id 重复时拒绝
    pub async fn register(&self, worker: Arc<dyn Worker>) -> Result<(), RegistryError> {
        let id = worker.descriptor().id.clone();
        let active = worker.descriptor().active;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.worker.descriptor().id == id) {
            return Err(RegistryError::DuplicateId(id));
        }
        tracing::info!(worker_id = %id, kind = %worker.descriptor().kind, "worker registered");
        entries.push(Registered { worker, active });
        Ok(())
    }

    /// 激活指定 Worker；返回是否找到
    pub async fn activate(&self, id: &str) -> bool {
        self.set_active(id, true).await
    }

    /// 停用指定 Worker；返回是否找到
    pub async fn deactivate(&self, id: &str) -> bool {
        self.set_active(id, false).await
    }

    async fn set_active(&self, id: &str, active: bool) -> bool {
        let mut entries = self.entries.write().await;
        match entries.iter_mut().find(|e| e.worker.descriptor().id == id) {
            Some(entry) => {
                entry.active = active;
                tracing::info!(worker_id = %id, active, "worker activation changed");
                true
            }
            None => false,
        }
    }

    /// 探测所有活跃 Worker，返回 (worker, score) 按分数降序；
    /// 并列保持注册顺序（稳定排序），低于 min_confidence 的被丢弃
    pub async fn find_capable(
        &self,
        judgment: &Judgment,
        session: &Session,
        min_confidence: f32,
    ) -> Vec<(Arc<dyn Worker>, f32)> {
        // 快照活跃集，随后在锁外探测
        let snapshot: Vec<Arc<dyn Worker>> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .filter(|e| e.active)
                .map(|e| Arc::clone(&e.worker))
                .collect()
        };

        let mut scored: Vec<(Arc<dyn Worker>, f32)> = Vec::new();
        for worker in snapshot {
            match worker.score(judgment, session).await {
                Ok(score) if score >= min_confidence => scored.push((worker, score)),
                Ok(score) => {
                    tracing::debug!(
                        worker_id = %worker.descriptor().id,
                        score,
                        min_confidence,
                        "worker below confidence cutoff"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        worker_id = %worker.descriptor().id,
                        error = %e,
                        "worker probe failed, excluding from this turn"
                    );
                }
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    pub async fn registered_count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn active_count(&self) -> usize {
        self.entries.read().await.iter().filter(|e| e.active).count()
    }
}
