//! 分发器/聚合器
//!
//! 传输层唯一调用的组件。每轮状态机：
//! RECEIVED → CLASSIFIED → MATCHED → {SINGLE_EXEC | MULTI_EXEC | FALLBACK}
//! → AGGREGATED → DONE；只有零个 Worker 产出可用结果时进入 ERROR。
//! 管道内部的任何失败都降级为文本兜底，不向最终用户抛出异常。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use super::outcome::{DispatchOutcome, PipelineStats, RoutingKind, WorkerFailure};
use crate::cache::SimilarityCache;
use crate::classify::{IntentClassifier, Judgment};
use crate::context::{HybridContextStore, Session, Turn};
use crate::llm::{LlmClient, Message};
use crate::workers::{CapabilityRegistry, Worker, WorkerError};

/// 分发参数
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 候选 Worker 的最低适配度
    pub min_worker_confidence: f32,
    /// MULTI_EXEC 最多并发几个 Worker（成本上限，可调）
    pub multi_exec_cap: usize,
    /// 单个 Worker 的执行超时
    pub worker_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            min_worker_confidence: crate::workers::DEFAULT_MIN_CONFIDENCE,
            multi_exec_cap: 3,
            worker_timeout: Duration::from_secs(30),
        }
    }
}

/// 路由决策（显式值，不用异常表达正常的降级路径）
enum RoutePlan {
    Single(Arc<dyn Worker>),
    Multi(Vec<Arc<dyn Worker>>),
    Fallback,
}

/// 分发器：组合根构造一次，传输层全程复用
pub struct Dispatcher {
    classifier: IntentClassifier,
    registry: Arc<CapabilityRegistry>,
    store: Arc<HybridContextStore>,
    /// 相似度缓存可选：嵌入能力未配置时整体停用
    similarity: Option<Arc<SimilarityCache>>,
    /// 多 Worker 合成所用的自由文本生成
    llm: Arc<dyn LlmClient>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        classifier: IntentClassifier,
        registry: Arc<CapabilityRegistry>,
        store: Arc<HybridContextStore>,
        llm: Arc<dyn LlmClient>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            classifier,
            registry,
            store,
            similarity: None,
            llm,
            config,
        }
    }

    pub fn with_similarity_cache(mut self, cache: Arc<SimilarityCache>) -> Self {
        self.similarity = Some(cache);
        self
    }

    /// 创建会话，返回 session_id
    pub async fn create_session(&self, owner_id: Option<String>, language: &str) -> String {
        self.store.create(owner_id, language).await
    }

    /// 结束会话；返回会话此前是否存在
    pub async fn end_session(&self, session_id: &str) -> bool {
        let existed = self.store.delete(session_id).await;
        if existed {
            tracing::info!(session_id, "session ended");
        }
        existed
    }

    /// 管道状态快照
    pub async fn stats(&self) -> PipelineStats {
        PipelineStats {
            active_sessions: self.store.active_count().await,
            registered_workers: self.registry.registered_count().await,
            active_workers: self.registry.active_count().await,
        }
    }

    /// 处理一轮对话
    pub async fn handle_turn(&self, session_id: &str, text: &str) -> DispatchOutcome {
        self.handle_turn_with_cancel(session_id, text, CancellationToken::new())
            .await
    }

    /// 处理一轮对话，支持调用方取消：取消会传播到在途 Worker，
    /// 但已完成的结果仍会进入记录的 DispatchOutcome
    pub async fn handle_turn_with_cancel(
        &self,
        session_id: &str,
        text: &str,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let mut metadata = HashMap::new();

        // RECEIVED：加载或静默重建会话，追加用户轮
        let mut session = match self.store.get(session_id).await {
            Some(s) => s,
            None => {
                let fresh = Session::new(None, "en");
                tracing::warn!(
                    unknown_id = session_id,
                    new_id = %fresh.id,
                    "session not found, recovered with a fresh one"
                );
                metadata.insert("recovered_session_id".to_string(), fresh.id.clone());
                self.store.save(&fresh).await;
                fresh
            }
        };
        session.push_turn(Turn::user(text));

        // CLASSIFIED
        let judgment = self.classifier.classify(text, &mut session).await;

        // 相似度缓存：语义等价的请求直接短路执行
        let cache_context = session.language.clone();
        if let Some(cache) = &self.similarity {
            if let Some(hit) = cache.lookup(text, Some(&cache_context)).await {
                tracing::info!(session_id = %session.id, key = %hit.key, "reply served from similarity cache");
                metadata.insert("similarity_key".to_string(), hit.key.clone());
                session.push_turn(
                    Turn::assistant(hit.response.clone())
                        .with_metadata("from_cache", serde_json::Value::Bool(true)),
                );
                self.store.save(&session).await;
                return DispatchOutcome {
                    session_id: session.id.clone(),
                    reply_text: hit.response,
                    contributing_worker_ids: Vec::new(),
                    routing_kind: RoutingKind::Single,
                    judgment,
                    per_worker_errors: Vec::new(),
                    from_cache: true,
                    metadata,
                };
            }
        }

        // MATCHED
        let candidates = self
            .registry
            .find_capable(&judgment, &session, self.config.min_worker_confidence)
            .await;

        let plan = self.decide_route(&judgment, &candidates);

        let outcome = match plan {
            RoutePlan::Fallback => {
                tracing::info!(session_id = %session.id, kind = %judgment.primary_kind, "no capable worker, fallback reply");
                // 兜底路径只保留用户轮，不把道歉写进历史
                self.store.save(&session).await;
                DispatchOutcome {
                    session_id: session.id.clone(),
                    reply_text: fallback_reply(&session.language),
                    contributing_worker_ids: Vec::new(),
                    routing_kind: RoutingKind::Fallback,
                    judgment,
                    per_worker_errors: Vec::new(),
                    from_cache: false,
                    metadata,
                }
            }
            RoutePlan::Single(worker) => {
                let results = vec![(
                    worker.descriptor().id.clone(),
                    self.execute_worker(worker.as_ref(), &session, &judgment, &cancel)
                        .await,
                )];
                self.aggregate(session, judgment, results, RoutingKind::Single, metadata, text)
                    .await
            }
            RoutePlan::Multi(selected) => {
                // MULTI_EXEC：并发执行，超时与错误彼此隔离
                let futures = selected.iter().map(|w| {
                    self.execute_worker(w.as_ref(), &session, &judgment, &cancel)
                });
                let replies = join_all(futures).await;
                let results: Vec<(String, Result<String, WorkerError>)> = selected
                    .iter()
                    .map(|w| w.descriptor().id.clone())
                    .zip(replies)
                    .collect();
                self.aggregate(session, judgment, results, RoutingKind::Multi, metadata, text)
                    .await
            }
        };

        tracing::info!(
            session_id = %outcome.session_id,
            routing = %outcome.routing_kind,
            contributors = outcome.contributing_worker_ids.len(),
            failures = outcome.per_worker_errors.len(),
            from_cache = outcome.from_cache,
            "turn dispatched"
        );
        outcome
    }

    /// 路由决策：requires_multiple 且候选多于一个才走 MULTI_EXEC，
    /// 并发数以 multi_exec_cap 封顶
    fn decide_route(
        &self,
        judgment: &Judgment,
        candidates: &[(Arc<dyn Worker>, f32)],
    ) -> RoutePlan {
        if candidates.is_empty() {
            return RoutePlan::Fallback;
        }
        if judgment.requires_multiple && candidates.len() > 1 {
            let selected: Vec<Arc<dyn Worker>> = candidates
                .iter()
                .take(self.config.multi_exec_cap)
                .map(|(w, _)| Arc::clone(w))
                .collect();
            RoutePlan::Multi(selected)
        } else {
            RoutePlan::Single(Arc::clone(&candidates[0].0))
        }
    }

    /// 单个 Worker 的受控执行：独立超时 + 取消传播；空回复按失败计
    async fn execute_worker(
        &self,
        worker: &dyn Worker,
        session: &Session,
        judgment: &Judgment,
        cancel: &CancellationToken,
    ) -> Result<String, WorkerError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(WorkerError::Cancelled),
            res = tokio::time::timeout(self.config.worker_timeout, worker.respond(session, judgment)) => {
                match res {
                    Ok(Ok(text)) if text.trim().is_empty() => Err(WorkerError::EmptyReply),
                    Ok(other) => other,
                    Err(_) => Err(WorkerError::Timeout),
                }
            }
        }
    }

    /// AGGREGATED：把各 Worker 结果并成一条回复并落库。
    /// contributing_worker_ids 保持候选排名顺序，与完成顺序无关。
    async fn aggregate(
        &self,
        mut session: Session,
        judgment: Judgment,
        results: Vec<(String, Result<String, WorkerError>)>,
        routing_kind: RoutingKind,
        metadata: HashMap<String, String>,
        original_text: &str,
    ) -> DispatchOutcome {
        let mut successes: Vec<(String, String)> = Vec::new();
        let mut failures: Vec<WorkerFailure> = Vec::new();
        for (worker_id, result) in results {
            match result {
                Ok(text) => successes.push((worker_id, text)),
                Err(e) => {
                    tracing::warn!(worker_id = %worker_id, error = %e, "worker failed");
                    failures.push(WorkerFailure {
                        worker_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        // ERROR 吸收态：零个可用结果
        if successes.is_empty() {
            self.store.save(&session).await;
            return DispatchOutcome {
                session_id: session.id.clone(),
                reply_text: error_reply(&session.language),
                contributing_worker_ids: Vec::new(),
                routing_kind: RoutingKind::Error,
                judgment,
                per_worker_errors: failures,
                from_cache: false,
                metadata,
            };
        }

        let reply = if successes.len() == 1 {
            successes[0].1.clone()
        } else {
            self.synthesize(&session, &successes).await
        };

        let contributing: Vec<String> = successes.iter().map(|(id, _)| id.clone()).collect();

        session.push_turn(
            Turn::assistant(reply.clone())
                .with_metadata("routing_kind", serde_json::Value::from(routing_kind.to_string())),
        );
        self.store.save(&session).await;

        if let Some(cache) = &self.similarity {
            let mut cache_meta = HashMap::new();
            cache_meta.insert("routing_kind".to_string(), routing_kind.to_string());
            cache_meta.insert("workers".to_string(), contributing.join(","));
            cache
                .store(
                    original_text,
                    &reply,
                    Some(session.language.clone()),
                    cache_meta,
                )
                .await;
        }

        DispatchOutcome {
            session_id: session.id.clone(),
            reply_text: reply,
            contributing_worker_ids: contributing,
            routing_kind,
            judgment,
            per_worker_errors: failures,
            from_cache: false,
            metadata,
        }
    }

    /// 多 Worker 合成：把各领域贡献交给自由文本生成并成一条连贯回复；
    /// 合成本身失败时退化为简单拼接，绝不让本轮失败
    async fn synthesize(&self, session: &Session, successes: &[(String, String)]) -> String {
        let system = format!(
            "You are composing the final reply of an assistant.\n\
             Merge the expert contributions below into one coherent answer.\n\
             Do not mention experts, sources or contributions; just answer naturally.\n\
             Reply in the user's language: {}.",
            session.language
        );
        let mut body = String::new();
        for (i, (_, text)) in successes.iter().enumerate() {
            body.push_str(&format!("Contribution {}:\n{}\n\n", i + 1, text));
        }

        let messages = [Message::system(system), Message::user(body)];
        match tokio::time::timeout(self.config.worker_timeout, self.llm.generate_text(&messages))
            .await
        {
            Ok(Ok(merged)) if !merged.trim().is_empty() => merged,
            Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {
                tracing::warn!("synthesis failed, joining contributions verbatim");
                successes
                    .iter()
                    .map(|(_, text)| text.as_str())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
        }
    }
}

/// 没有合适专家时的通用回复
fn fallback_reply(language: &str) -> String {
    match language {
        "zh" => "抱歉，我目前没有合适的专家来处理这个问题。换个问法或者问点别的试试？".to_string(),
        _ => "I'm sorry, I don't have the right expertise for that yet. \
              Could you rephrase, or ask about something else?"
            .to_string(),
    }
}

/// 全部 Worker 失败时的通用道歉（原始错误只留在 per_worker_errors）
fn error_reply(language: &str) -> String {
    match language {
        "zh" => "抱歉，准备回答时出了点问题，请稍后再试。".to_string(),
        _ => "I'm sorry, something went wrong while preparing your answer. Please try again."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replies_localized() {
        assert!(fallback_reply("zh").contains("抱歉"));
        assert!(fallback_reply("en").starts_with("I'm sorry"));
        // 未知语言退回英文
        assert!(error_reply("fr").starts_with("I'm sorry"));
    }
}
