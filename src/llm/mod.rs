//! LLM 层：外部生成/嵌入能力的抽象与实现（OpenAI 兼容 / Mock）

pub mod embedding;
pub mod mock;
pub mod openai;
pub mod traits;

pub use embedding::{create_embedder_from_config, EmbeddingProvider, OpenAiEmbedder};
pub use mock::{FailingLlmClient, MockEmbedder, MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{ChatRole, LlmClient, LlmError, Message};
