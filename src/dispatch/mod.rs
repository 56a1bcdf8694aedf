//! 分发层：路由决策、并发执行、聚合与结果模型

pub mod dispatcher;
pub mod outcome;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use outcome::{DispatchOutcome, PipelineStats, RoutingKind, WorkerFailure};
