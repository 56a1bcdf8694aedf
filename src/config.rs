//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__CLASSIFIER__CONFIDENCE_FLOOR=0.7`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::SimilarityCacheConfig;
use crate::classify::ClassifierConfig;
use crate::dispatch::DispatcherConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub classifier: ClassifierSection,
    pub pipeline: PipelineSection,
    pub cache: CacheSection,
    pub session: SessionSection,
}

/// [llm] 段：上游端点与模型
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: Option<String>,
    pub embedding_model: String,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }
}

/// [classifier] 段：分类缓存与置信度下限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    /// 上下文摘要取最近几轮
    pub context_turns: usize,
    pub upstream_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub confidence_floor: f32,
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            context_turns: 6,
            upstream_timeout_secs: 10,
            cache_ttl_secs: 300,
            cache_capacity: 256,
            confidence_floor: 0.6,
        }
    }
}

impl ClassifierSection {
    pub fn to_classifier_config(&self) -> ClassifierConfig {
        ClassifierConfig {
            context_turns: self.context_turns,
            upstream_timeout: Duration::from_secs(self.upstream_timeout_secs),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            cache_capacity: self.cache_capacity,
            confidence_floor: self.confidence_floor,
            candidate_kinds: Vec::new(),
        }
    }
}

/// [pipeline] 段：路由与执行
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub min_worker_confidence: f32,
    /// MULTI_EXEC 并发上限（部署方按成本/延迟目标调整）
    pub multi_exec_cap: usize,
    pub worker_timeout_secs: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            min_worker_confidence: 0.3,
            multi_exec_cap: 3,
            worker_timeout_secs: 30,
        }
    }
}

impl PipelineSection {
    pub fn to_dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            min_worker_confidence: self.min_worker_confidence,
            multi_exec_cap: self.multi_exec_cap,
            worker_timeout: Duration::from_secs(self.worker_timeout_secs),
        }
    }
}

/// [cache] 段：相似度缓存
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub similarity_threshold: f32,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.92,
            ttl_secs: 3600,
            max_entries: 512,
        }
    }
}

impl CacheSection {
    pub fn to_similarity_config(&self) -> SimilarityCacheConfig {
        SimilarityCacheConfig {
            threshold: self.similarity_threshold,
            ttl: Duration::from_secs(self.ttl_secs),
            max_entries: self.max_entries,
        }
    }
}

/// [session] 段：外部层滑动过期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub ttl_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self { ttl_secs: 86400 }
    }
}

impl SessionSection {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let cfg = AppConfig::default();
        assert!((cfg.classifier.confidence_floor - 0.6).abs() < f32::EPSILON);
        assert_eq!(cfg.classifier.cache_ttl_secs, 300);
        assert_eq!(cfg.pipeline.multi_exec_cap, 3);
        assert!((cfg.pipeline.min_worker_confidence - 0.3).abs() < f32::EPSILON);
        assert_eq!(cfg.pipeline.worker_timeout_secs, 30);
        assert!((cfg.cache.similarity_threshold - 0.92).abs() < f32::EPSILON);
        assert_eq!(cfg.session.ttl_secs, 86400);
    }

    #[test]
    fn test_section_conversions() {
        let cfg = AppConfig::default();
        let classifier = cfg.classifier.to_classifier_config();
        assert_eq!(classifier.cache_ttl, Duration::from_secs(300));

        let dispatcher = cfg.pipeline.to_dispatcher_config();
        assert_eq!(dispatcher.worker_timeout, Duration::from_secs(30));
        assert_eq!(dispatcher.multi_exec_cap, 3);

        let cache = cfg.cache.to_similarity_config();
        assert!((cache.threshold - 0.92).abs() < f32::EPSILON);
    }
}
