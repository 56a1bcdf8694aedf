//! 混合上下文存储
//!
//! 两级结构：进程内 map（当前进程的权威副本）+ 外部 KV（跨进程与重启存活）。
//! 外部写入尽力而为：KV 故障只记日志不报错，代价是故障期间重启会丢会话。
//! 跨进程并发写同一会话时后写者赢——一次会话在概念上只属于一个活跃对话。
//!
//! 锁纪律：进程内 map 的锁从不跨越 KV 调用（先取快照/克隆，释放锁后再做 I/O）。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use super::session::Session;
use crate::kv::KeyValueStore;

const KEY_PREFIX: &str = "session:";

/// 两级会话存储
pub struct HybridContextStore {
    local: RwLock<std::collections::HashMap<String, Session>>,
    kv: Arc<dyn KeyValueStore>,
    /// 外部层滑动过期时间（读命中 KV 时刷新）
    ttl: Duration,
}

impl HybridContextStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            local: RwLock::new(std::collections::HashMap::new()),
            kv,
            ttl,
        }
    }

    fn kv_key(session_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, session_id)
    }

    /// 创建新会话并返回其 id
    pub async fn create(&self, owner_id: Option<String>, language: &str) -> String {
        let session = Session::new(owner_id, language);
        let id = session.id.clone();
        self.save(&session).await;
        tracing::info!(session_id = %id, language, "session created");
        id
    }

    /// 读取会话：先查进程内，miss 时回源 KV、反序列化并回填，同时刷新外部 TTL
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        if let Some(session) = self.local.read().await.get(session_id) {
            return Some(session.clone());
        }

        let raw = match self.kv.get(&Self::kv_key(session_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "kv read failed, treating as absent");
                return None;
            }
        };

        let session: Session = match serde_json::from_str(&raw) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "corrupt session payload in kv");
                return None;
            }
        };

        // 回填进程内副本；滑动过期：读命中即续期
        self.local
            .write()
            .await
            .insert(session_id.to_string(), session.clone());
        if let Err(e) = self
            .kv
            .set_with_ttl(&Self::kv_key(session_id), &raw, self.ttl)
            .await
        {
            tracing::warn!(session_id, error = %e, "kv ttl refresh failed");
        }

        Some(session)
    }

    /// 保存会话：进程内副本总是更新；KV 写入尽力而为
    pub async fn save(&self, session: &Session) {
        self.local
            .write()
            .await
            .insert(session.id.clone(), session.clone());

        let payload = match serde_json::to_string(session) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "session serialize failed, kv write skipped");
                return;
            }
        };
        if let Err(e) = self
            .kv
            .set_with_ttl(&Self::kv_key(&session.id), &payload, self.ttl)
            .await
        {
            tracing::warn!(session_id = %session.id, error = %e, "kv write failed, in-process copy remains authoritative");
        }
    }

    /// 删除会话（两级都删）；返回会话此前是否存在
    pub async fn delete(&self, session_id: &str) -> bool {
        let existed_local = self.local.write().await.remove(session_id).is_some();
        let existed_kv = match self.kv.delete(&Self::kv_key(session_id)).await {
            Ok(existed) => existed,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "kv delete failed");
                false
            }
        };
        existed_local || existed_kv
    }

    /// 两级合并后的全部会话 id
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: HashSet<String> = self.local.read().await.keys().cloned().collect();
        match self.kv.keys_by_prefix(KEY_PREFIX).await {
            Ok(keys) => {
                for key in keys {
                    if let Some(id) = key.strip_prefix(KEY_PREFIX) {
                        ids.insert(id.to_string());
                    }
                }
            }
            Err(e) => tracing::warn!(error = %e, "kv key scan failed, listing local tier only"),
        }
        ids.into_iter().collect()
    }

    /// 进程内活跃会话数
    pub async fn active_count(&self) -> usize {
        self.local.read().await.len()
    }
}
