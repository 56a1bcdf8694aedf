//! Worker 层：专家接口、通用 Prompt Worker、能力注册表

pub mod prompt_worker;
pub mod registry;
pub mod traits;

pub use prompt_worker::PromptWorker;
pub use registry::{CapabilityRegistry, RegistryError, DEFAULT_MIN_CONFIDENCE};
pub use traits::{Worker, WorkerDescriptor, WorkerError};
