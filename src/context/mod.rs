//! 上下文层：会话数据模型与两级混合存储

pub mod session;
pub mod store;

pub use session::{Role, Session, Turn};
pub use store::HybridContextStore;
