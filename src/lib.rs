//! Hive - 会话分发与缓存管道
//!
//! 把一条自然语言请求路由到一个或多个专家 Worker，聚合结果为单条回复，
//! 并通过分类缓存与相似度缓存避免重复的上游调用。传输层（HTTP/WS）、
//! 鉴权与分析持久化在本 crate 之外。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量 `HIVE__*`）
//! - **llm**: 外部 LLM 协作方抽象与实现（OpenAI 兼容 / Mock）
//! - **kv**: 共享键值存储抽象（外部协作方）与内存实现
//! - **context**: 会话数据模型与两级混合上下文存储
//! - **classify**: 意图分类（Judgment、防御式 JSON 解析、带 TTL 的缓存）
//! - **workers**: Worker trait、通用 Prompt Worker、能力注册表
//! - **cache**: 基于嵌入向量的相似度响应缓存
//! - **dispatch**: 分发器/聚合器（传输层唯一入口）

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod kv;
pub mod llm;
pub mod workers;

pub use dispatch::{DispatchOutcome, Dispatcher, DispatcherConfig, RoutingKind};
