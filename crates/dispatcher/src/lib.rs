//! # Dispatcher
//!
//! 入站事件分发模块。
//!
//! 负责：
//! - 作为 ingest 队列的唯一消费者，严格按 FIFO 顺序处理事件
//! - 按意图路由到 write / replay / create handler
//! - 隔离每个 handler：错误或 panic 只影响当前事件

pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod metrics;

pub use dispatcher::Dispatcher;
pub use error::DispatcherError;
pub use handlers::{handle_replay, handle_write};
pub use metrics::{DispatchMetrics, MetricsSnapshot};
