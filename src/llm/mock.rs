//! Mock LLM 客户端与嵌入器（用于测试，无需 API）

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::llm::{ChatRole, EmbeddingProvider, LlmClient, LlmError, Message};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate_text(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, ChatRole::User))
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!("Echo from Mock: {}", last_user))
    }
}

/// 脚本化客户端：按顺序吐出预置响应并统计调用次数
///
/// 队列耗尽后返回 fallback 文本。分类器缓存命中类测试用 call_count 断言
/// 上游没有被重复调用。
pub struct ScriptedLlmClient {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    call_count: AtomicUsize,
}

impl ScriptedLlmClient {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: "ok".to_string(),
            call_count: AtomicUsize::new(0),
        }
    }

    /// 队列耗尽后的固定响应
    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self {
        self.fallback = fallback.into();
        self
    }

    /// 单一固定响应的便捷构造
    pub fn always(response: impl Into<String>) -> Self {
        Self::new(Vec::new()).with_fallback(response)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn generate_text(&self, _messages: &[Message]) -> Result<String, LlmError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

/// 总是失败的客户端（上游故障路径测试）
#[derive(Debug, Default)]
pub struct FailingLlmClient;

#[async_trait]
impl LlmClient for FailingLlmClient {
    async fn generate_text(&self, _messages: &[Message]) -> Result<String, LlmError> {
        Err(LlmError::ApiError("simulated upstream failure".to_string()))
    }
}

/// 确定性嵌入器：按 token 的 SHA-256 哈希落桶
///
/// 相同文本产生完全相同的向量（余弦 1.0）；token 不相交的文本相似度很低。
/// 足以在不联网的情况下测试相似度缓存的阈值行为。
#[derive(Debug, Clone)]
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { dim: 64 }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let mut vec = vec![0.0f32; self.dim];
        for token in text.to_lowercase().split_whitespace() {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = digest[0] as usize % self.dim;
            let sign = if digest[1] % 2 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        Ok(vec)
    }
}
