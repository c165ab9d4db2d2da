//! Broker 指标记录模块
//!
//! 所有指标名以 `cql_broker_` 开头。未安装 recorder 时这些调用是空操作。

use metrics::{counter, gauge, histogram};

/// 记录成功解码的入站事件
pub fn record_event_received(intent: &str) {
    counter!(
        "cql_broker_events_received_total",
        "intent" => intent.to_string()
    )
    .increment(1);
}

/// 记录被丢弃的事件 (topic/payload 解码失败、未知数据库、未知意图等)
pub fn record_event_dropped(reason: &str) {
    counter!(
        "cql_broker_events_dropped_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}

/// 记录入站队列深度
pub fn record_ingest_queue_len(len: usize) {
    gauge!("cql_broker_ingest_queue_len").set(len as f64);
}

/// 记录写入链的结果
pub fn record_write(success: bool) {
    counter!(
        "cql_broker_writes_total",
        "status" => status(success)
    )
    .increment(1);
}

/// 记录一次 replay 请求发布的交易数
pub fn record_replay_published(count: usize) {
    counter!("cql_broker_replay_published_total").increment(count as u64);
    histogram!("cql_broker_replay_batch_size").record(count as f64);
}

/// 记录一次发布
pub fn record_publish(intent: &str, success: bool) {
    counter!(
        "cql_broker_publish_total",
        "intent" => intent.to_string(),
        "status" => status(success)
    )
    .increment(1);
}

/// 记录一次周期发布 tick
pub fn record_tick(databases: usize, failures: usize, duration_ms: f64) {
    gauge!("cql_broker_tick_databases").set(databases as f64);
    if failures > 0 {
        counter!("cql_broker_tick_failures_total").increment(failures as u64);
    }
    histogram!("cql_broker_tick_duration_ms").record(duration_ms);
}

/// 记录 handler panic
pub fn record_handler_panic(intent: &str) {
    counter!(
        "cql_broker_handler_panics_total",
        "intent" => intent.to_string()
    )
    .increment(1);
}

fn status(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_without_exporter_are_noops() {
        record_event_received("write");
        record_event_dropped("invalid_topic");
        record_ingest_queue_len(3);
        record_write(true);
        record_replay_published(2);
        record_publish("newest", false);
        record_tick(2, 1, 0.5);
        record_handler_panic("replay");
    }

    #[test]
    fn test_status_label() {
        assert_eq!(status(true), "success");
        assert_eq!(status(false), "failure");
    }
}
