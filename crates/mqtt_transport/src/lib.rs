//! # MQTT Transport
//!
//! `Transport` implementation on an MQTT 3.1.1 connection.
//!
//! - 连接使用 `transport.user` / `password`，client id 默认等于 user
//! - 单一事件循环任务按到达顺序回调订阅，保证同一连接内消息有序
//! - `publish` / `subscribe` / `unsubscribe` 等待服务端确认 (PubAck / PubComp / SubAck / UnsubAck)
//! - 断线后自动重连并恢复订阅

mod settings;
mod transport;

pub use settings::MqttSettings;
pub use transport::MqttTransport;
