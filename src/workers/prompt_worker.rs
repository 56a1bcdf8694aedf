//! 通用 Prompt Worker
//!
//! 以"系统提示词 + LLM"构成的专家：score 是纯本地的确定性打分（不花钱），
//! respond 把会话近况拼进提示词后调用自由文本生成。具体领域专家只需不同的
//! kind 与提示词内容即可。

use std::sync::Arc;

use async_trait::async_trait;

use super::traits::{Worker, WorkerDescriptor, WorkerError};
use crate::classify::{Judgment, GENERIC_KIND};
use crate::context::{Role, Session};
use crate::llm::{LlmClient, Message};

/// 打分档位：主类别命中 > 需求集合命中 > 能力重叠 > 通用兜底
const SCORE_PRIMARY: f32 = 1.0;
const SCORE_NEEDED: f32 = 0.8;
const SCORE_CAPABILITY: f32 = 0.5;
const SCORE_GENERIC_BACKUP: f32 = 0.35;

/// LLM 驱动的通用专家 Worker
pub struct PromptWorker {
    descriptor: WorkerDescriptor,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
    /// respond 时带入的历史轮数
    history_turns: usize,
}

impl PromptWorker {
    pub fn new(
        descriptor: WorkerDescriptor,
        system_prompt: impl Into<String>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        Self {
            descriptor,
            system_prompt: system_prompt.into(),
            llm,
            history_turns: 10,
        }
    }

    pub fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    fn build_messages(&self, session: &Session, judgment: &Judgment) -> Vec<Message> {
        let mut messages = Vec::new();

        let mut system = self.system_prompt.clone();
        system.push_str(&format!("\n\nReply in the user's language: {}.", session.language));
        if !judgment.extracted_fields.is_empty() {
            if let Ok(fields) = serde_json::to_string(&judgment.extracted_fields) {
                system.push_str(&format!("\nExtracted request details: {}", fields));
            }
        }
        messages.push(Message::system(system));

        for turn in session.recent_turns(self.history_turns) {
            let msg = match turn.role {
                Role::User => Message::user(turn.text.clone()),
                Role::Assistant => Message::assistant(turn.text.clone()),
            };
            messages.push(msg);
        }
        messages
    }
}

#[async_trait]
impl Worker for PromptWorker {
    fn descriptor(&self) -> &WorkerDescriptor {
        &self.descriptor
    }

    async fn score(&self, judgment: &Judgment, session: &Session) -> Result<f32, WorkerError> {
        let d = &self.descriptor;

        if !d.supported_languages.is_empty() && !d.supported_languages.contains(&session.language) {
            return Ok(0.0);
        }

        if judgment.primary_kind == d.kind {
            return Ok(SCORE_PRIMARY);
        }
        if judgment.needs_kind(&d.kind) {
            return Ok(SCORE_NEEDED);
        }
        if judgment
            .needed_worker_kinds
            .iter()
            .any(|k| d.declared_capabilities.contains(k))
        {
            return Ok(SCORE_CAPABILITY);
        }
        if d.kind == GENERIC_KIND {
            // 通用专家永远愿意接手，但排在所有命中的专家之后
            return Ok(SCORE_GENERIC_BACKUP);
        }
        Ok(0.0)
    }

    async fn respond(&self, session: &Session, judgment: &Judgment) -> Result<String, WorkerError> {
        let messages = self.build_messages(session, judgment);
        self.llm
            .generate_text(&messages)
            .await
            .map_err(|e| WorkerError::Upstream(e.to_string()))
    }
}
