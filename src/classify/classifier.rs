//! 意图分类器
//!
//! 把自由文本变成结构化 Judgment：带上下文指纹的缓存、显式 schema 约定、
//! 防御式解析、置信度下限。对调用方永不失败——所有上游/解析错误都在本地
//! 恢复为兜底 Judgment。

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};

use super::cache::ClassificationCache;
use super::extract::extract_json_object;
use super::judgment::{Judgment, GENERIC_KIND};
use crate::context::{Role, Session};
use crate::llm::LlmClient;

/// 分类器参数
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// 上下文摘要取最近几轮
    pub context_turns: usize,
    /// 上游调用超时
    pub upstream_timeout: Duration,
    /// 缓存 TTL
    pub cache_ttl: Duration,
    /// 缓存容量上限（超限淘汰最旧）
    pub cache_capacity: usize,
    /// 置信度下限：低于它的分类不得驱动专门路由
    pub confidence_floor: f32,
    /// 提示词中列出的候选类别（空则不列）
    pub candidate_kinds: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            context_turns: 6,
            upstream_timeout: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(300),
            cache_capacity: 256,
            confidence_floor: 0.6,
            candidate_kinds: Vec::new(),
        }
    }
}

/// 意图分类器
pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    cache: ClassificationCache,
    config: ClassifierConfig,
    /// Judgment 的 JSON schema（构造时生成一次，嵌入提示词）
    schema_json: String,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, config: ClassifierConfig) -> Self {
        let schema = schemars::schema_for!(Judgment);
        let schema_json =
            serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
        Self {
            llm,
            cache: ClassificationCache::new(config.cache_ttl, config.cache_capacity),
            config,
            schema_json,
        }
    }

    /// 分类一条用户请求；会向 session 的意图环追加本轮的 primary_kind
    pub async fn classify(&self, text: &str, session: &mut Session) -> Judgment {
        let summary = self.context_summary(session);
        let ctx_hash = fingerprint(&summary);

        if let Some(cached) = self.cache.get(text, &ctx_hash) {
            tracing::debug!(ctx_hash = %ctx_hash, "classification cache hit");
            return cached;
        }

        let judgment = match self.classify_upstream(text, session, &summary).await {
            Some(j) => {
                let j = self.apply_confidence_floor(j);
                // 只缓存成功解析的结果；失败兜底不污染缓存，下一轮仍可重试上游
                self.cache.put(text, &ctx_hash, j.clone());
                j
            }
            None => Judgment::fallback(),
        };

        session.push_intent(judgment.primary_kind.clone());
        judgment
    }

    /// 上游调用 + 防御式解析；任何一步失败返回 None
    async fn classify_upstream(
        &self,
        text: &str,
        session: &Session,
        summary: &str,
    ) -> Option<Judgment> {
        let system_prompt = self.build_system_prompt();
        let excerpt = self.build_excerpt(text, session, summary);

        let raw = match tokio::time::timeout(
            self.config.upstream_timeout,
            self.llm.generate_structured(&system_prompt, &excerpt),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "classification upstream failed, using fallback judgment");
                return None;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.config.upstream_timeout.as_secs(),
                    "classification upstream timed out, using fallback judgment"
                );
                return None;
            }
        };

        let value = match extract_json_object(&raw) {
            Some(v) => v,
            None => {
                tracing::warn!(raw = %raw, "no JSON object in classification output");
                return None;
            }
        };

        match serde_json::from_value::<Judgment>(value) {
            Ok(j) => Some(j.normalize()),
            Err(e) => {
                tracing::warn!(error = %e, raw = %raw, "classification output did not match schema");
                None
            }
        }
    }

    /// 置信度下限：低置信度分类不得驱动专门路由
    fn apply_confidence_floor(&self, mut judgment: Judgment) -> Judgment {
        if judgment.confidence < self.config.confidence_floor {
            tracing::debug!(
                kind = %judgment.primary_kind,
                confidence = judgment.confidence,
                floor = self.config.confidence_floor,
                "confidence below floor, demoting to generic"
            );
            judgment.primary_kind = GENERIC_KIND.to_string();
            judgment.confidence = 0.5;
        }
        judgment
    }

    fn build_system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are an intent classifier for a multi-expert assistant.\n\
             Analyze the user's request in its conversation context and output ONLY a JSON object\n\
             matching this schema (no prose, no code fences):\n\n",
        );
        prompt.push_str(&self.schema_json);
        if !self.config.candidate_kinds.is_empty() {
            prompt.push_str("\n\nKnown worker kinds: ");
            prompt.push_str(&self.config.candidate_kinds.join(", "));
            prompt.push_str(&format!(
                "\nUse \"{}\" when no specialized kind applies.",
                GENERIC_KIND
            ));
        }
        prompt.push_str(
            "\n\nSet requires_multiple to true only when the request clearly spans more than one kind.",
        );
        prompt
    }

    fn build_excerpt(&self, text: &str, session: &Session, summary: &str) -> String {
        let mut excerpt = String::new();
        if !summary.is_empty() {
            excerpt.push_str("Recent conversation:\n");
            excerpt.push_str(summary);
            excerpt.push_str("\n\n");
        }
        let intents: Vec<&str> = session.recent_intents().collect();
        if !intents.is_empty() {
            excerpt.push_str(&format!("Recent intents: {}\n\n", intents.join(", ")));
        }
        excerpt.push_str(&format!("User request: {}", text));
        excerpt
    }

    /// 最近 k 轮的有界摘要；缓存键的指纹只依赖它，不依赖意图环
    fn context_summary(&self, session: &Session) -> String {
        session
            .recent_turns(self.config.context_turns)
            .iter()
            .map(|t| {
                let role = match t.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                format!("{}: {}", role, t.text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 上下文指纹：摘要的 SHA-256 截断十六进制
fn fingerprint(summary: &str) -> String {
    let digest = Sha256::digest(summary.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Turn;
    use crate::llm::{FailingLlmClient, ScriptedLlmClient};

    fn classifier_with(llm: Arc<dyn LlmClient>) -> IntentClassifier {
        IntentClassifier::new(llm, ClassifierConfig::default())
    }

    #[tokio::test]
    async fn test_valid_output_parsed() {
        let llm = Arc::new(ScriptedLlmClient::always(
            r#"{"primary_kind": "finance", "confidence": 0.9, "needed_worker_kinds": ["finance"], "requires_multiple": false}"#,
        ));
        let classifier = classifier_with(llm);
        let mut session = Session::new(None, "en");

        let j = classifier.classify("how do I budget?", &mut session).await;
        assert_eq!(j.primary_kind, "finance");
        assert!((j.confidence - 0.9).abs() < 1e-6);
        assert_eq!(session.recent_intents().collect::<Vec<_>>(), vec!["finance"]);
    }

    #[tokio::test]
    async fn test_upstream_failure_recovers_to_fallback() {
        let classifier = classifier_with(Arc::new(FailingLlmClient));
        let mut session = Session::new(None, "en");

        let j = classifier.classify("anything", &mut session).await;
        assert_eq!(j.primary_kind, GENERIC_KIND);
        assert!((j.confidence - 0.5).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_malformed_output_recovers_to_fallback() {
        let llm = Arc::new(ScriptedLlmClient::always("certainly! the intent is finance"));
        let classifier = classifier_with(llm);
        let mut session = Session::new(None, "en");

        let j = classifier.classify("anything", &mut session).await;
        assert_eq!(j.primary_kind, GENERIC_KIND);
    }

    #[tokio::test]
    async fn test_confidence_floor_demotes_to_generic() {
        let llm = Arc::new(ScriptedLlmClient::always(
            r#"{"primary_kind": "finance", "confidence": 0.4, "needed_worker_kinds": ["finance"]}"#,
        ));
        let classifier = classifier_with(llm);
        let mut session = Session::new(None, "en");

        let j = classifier.classify("hm", &mut session).await;
        assert_eq!(j.primary_kind, GENERIC_KIND);
        assert!((j.confidence - 0.5).abs() < f32::EPSILON);
        // 需求集合保留原判断
        assert_eq!(j.needed_worker_kinds, vec!["finance"]);
    }

    #[tokio::test]
    async fn test_cache_prevents_second_upstream_call() {
        let llm = Arc::new(ScriptedLlmClient::always(
            r#"{"primary_kind": "health", "confidence": 0.8}"#,
        ));
        let classifier = IntentClassifier::new(llm.clone(), ClassifierConfig::default());
        let mut session = Session::new(None, "en");

        let first = classifier.classify("hi", &mut session).await;
        let second = classifier.classify("hi", &mut session).await;

        assert_eq!(first.primary_kind, "health");
        assert_eq!(second.primary_kind, "health");
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn test_history_changes_ctx_hash() {
        let llm = Arc::new(ScriptedLlmClient::always(
            r#"{"primary_kind": "health", "confidence": 0.8}"#,
        ));
        let classifier = IntentClassifier::new(llm.clone(), ClassifierConfig::default());
        let mut session = Session::new(None, "en");

        classifier.classify("hi", &mut session).await;
        session.push_turn(Turn::user("hi"));
        session.push_turn(Turn::assistant("hello!"));
        classifier.classify("hi", &mut session).await;

        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            "garbage".to_string(),
            r#"{"primary_kind": "finance", "confidence": 0.9}"#.to_string(),
        ]));
        let classifier = IntentClassifier::new(llm.clone(), ClassifierConfig::default());
        let mut session = Session::new(None, "en");

        let first = classifier.classify("budget?", &mut session).await;
        assert_eq!(first.primary_kind, GENERIC_KIND);

        // 第二次仍会调用上游并成功
        let second = classifier.classify("budget?", &mut session).await;
        assert_eq!(second.primary_kind, "finance");
        assert_eq!(llm.call_count(), 2);
    }
}
