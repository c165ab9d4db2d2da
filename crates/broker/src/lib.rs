//! # Broker
//!
//! 同步 broker 的组装层。
//!
//! 负责：
//! - 启动顺序：连接 transport、创建 ingest 队列、启动 dispatcher 与周期发布、订阅入站 topic
//! - 关闭顺序：取消周期发布、退订、关闭队列并等待排空、断开 transport
//!
//! `close` 可重复调用。

pub mod broker;
pub mod error;

pub use broker::Broker;
pub use error::{BrokerError, Result};
