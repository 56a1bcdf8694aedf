//! 分类结果模型
//!
//! Judgment 是分类器对"这条请求需要什么"的概率化判断，每轮新建，
//! 只在分类缓存 TTL 内存活。schema 由 schemars 派生，嵌入分类提示词，
//! 构成与上游的显式结构约定。

use std::collections::HashMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// 兜底意图类别：低置信度与解析失败都落在这里
pub const GENERIC_KIND: &str = "generic";

/// 结构化意图判断
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
pub struct Judgment {
    /// 主意图类别（如 finance / health / generic）
    pub primary_kind: String,
    /// 置信度，[0, 1]
    pub confidence: f32,
    /// 本轮需要的 Worker 类别集合
    #[serde(default)]
    pub needed_worker_kinds: Vec<String>,
    /// 是否需要多个 Worker 协同
    #[serde(default)]
    pub requires_multiple: bool,
    /// 从请求中抽取的结构化字段（金额、日期等）
    #[serde(default)]
    pub extracted_fields: HashMap<String, serde_json::Value>,
}

impl Judgment {
    /// 兜底判断：上游失败或解析失败时使用
    pub fn fallback() -> Self {
        Self {
            primary_kind: GENERIC_KIND.to_string(),
            confidence: 0.5,
            needed_worker_kinds: vec![GENERIC_KIND.to_string()],
            requires_multiple: false,
            extracted_fields: HashMap::new(),
        }
    }

    /// 解析后规整：置信度截断到 [0,1]，需求集合去重，空集合退化为主类别
    pub fn normalize(mut self) -> Self {
        self.confidence = self.confidence.clamp(0.0, 1.0);

        let mut seen = std::collections::HashSet::new();
        self.needed_worker_kinds.retain(|k| seen.insert(k.clone()));
        if self.needed_worker_kinds.is_empty() {
            self.needed_worker_kinds.push(self.primary_kind.clone());
        }
        self
    }

    /// 某类别是否在需求集合中
    pub fn needs_kind(&self, kind: &str) -> bool {
        self.needed_worker_kinds.iter().any(|k| k == kind)
    }
}
