//! 分发结果模型

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::classify::Judgment;

/// 本轮走过的路由路径
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// 单 Worker 执行（含相似度缓存命中）
    Single,
    /// 多 Worker 并发执行 + 合成
    Multi,
    /// 没有足够自信的 Worker，返回通用兜底回复
    Fallback,
    /// 所有 Worker 都未产出可用结果
    Error,
}

impl std::fmt::Display for RoutingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoutingKind::Single => "single",
            RoutingKind::Multi => "multi",
            RoutingKind::Fallback => "fallback",
            RoutingKind::Error => "error",
        };
        f.write_str(s)
    }
}

/// 单个 Worker 的失败记录（仅用于服务端可观测性，从不进入用户可见文本）
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker_id: String,
    pub error: String,
}

/// 一轮分发的完整结果
#[derive(Clone, Debug)]
pub struct DispatchOutcome {
    /// 实际使用的会话 id（未知 id 被静默重建时与入参不同）
    pub session_id: String,
    pub reply_text: String,
    /// 成功贡献者，按候选排名顺序（与完成顺序无关）
    pub contributing_worker_ids: Vec<String>,
    pub routing_kind: RoutingKind,
    pub judgment: Judgment,
    pub per_worker_errors: Vec<WorkerFailure>,
    /// 回复来自相似度缓存
    pub from_cache: bool,
    /// 附加信号（如 recovered_session_id）
    pub metadata: HashMap<String, String>,
}

/// 管道运行状态快照
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PipelineStats {
    pub active_sessions: usize,
    pub registered_workers: usize,
    pub active_workers: usize,
}
