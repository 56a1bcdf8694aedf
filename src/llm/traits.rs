//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 LlmClient：generate_text（自由文本）、
//! generate_structured（要求严格结构化输出的分类调用）。上游不保证输出合法，
//! 调用方必须自行校验。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// 单条消息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: ChatRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 调用外部生成能力时的错误（网络、API、空响应）
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Empty response")]
    EmptyResponse,
}

/// LLM 客户端 trait：自由文本生成与结构化生成
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 自由文本生成（Worker 回复与多 Worker 合成共用）
    async fn generate_text(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 结构化生成：期望输出能按给定 schema 解析为 JSON。
    /// 默认实现复用 generate_text；后端可覆盖为原生 JSON mode。
    async fn generate_structured(
        &self,
        system_prompt: &str,
        conversation_excerpt: &str,
    ) -> Result<String, LlmError> {
        let messages = [
            Message::system(system_prompt),
            Message::user(conversation_excerpt),
        ];
        self.generate_text(&messages).await
    }
}
