//! Worker 抽象
//!
//! Worker 是能产出领域回复、并能对 Judgment 自评适配度的专家组件。
//! score 是廉价探测（不应调用上游）；respond 才是昂贵执行。

use std::collections::HashSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::classify::Judgment;
use crate::context::Session;

/// Worker 执行错误
#[derive(Error, Debug, Clone)]
pub enum WorkerError {
    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("worker timed out")]
    Timeout,

    #[error("request cancelled")]
    Cancelled,

    /// 空字符串回复在聚合时按失败处理
    #[error("empty reply")]
    EmptyReply,

    #[error("scoring failed: {0}")]
    Scoring(String),
}

/// Worker 的静态描述：注册时提供，之后只有激活状态可变（由注册表管理）
#[derive(Clone, Debug)]
pub struct WorkerDescriptor {
    pub id: String,
    pub kind: String,
    pub declared_capabilities: HashSet<String>,
    /// 空集合表示语言无关
    pub supported_languages: HashSet<String>,
    /// 注册时的初始激活状态
    pub active: bool,
}

impl WorkerDescriptor {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            declared_capabilities: HashSet::new(),
            supported_languages: HashSet::new(),
            active: true,
        }
    }

    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.declared_capabilities.insert(cap.into());
        self
    }

    pub fn with_language(mut self, lang: impl Into<String>) -> Self {
        self.supported_languages.insert(lang.into());
        self
    }
}

/// 专家 Worker 接口
#[async_trait]
pub trait Worker: Send + Sync {
    fn descriptor(&self) -> &WorkerDescriptor;

    /// 对 Judgment 的适配度自评，[0, 1]；出错的 Worker 会被本轮排除
    async fn score(&self, judgment: &Judgment, session: &Session) -> Result<f32, WorkerError>;

    /// 产出领域回复
    async fn respond(&self, session: &Session, judgment: &Judgment) -> Result<String, WorkerError>;
}
