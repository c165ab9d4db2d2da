//! Ingestion 错误类型

use contracts::ContractError;
use thiserror::Error;

/// Ingestion 错误
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Topic 无法路由
    #[error("invalid topic: {topic}")]
    InvalidTopic {
        /// 原始 topic
        topic: String,
    },

    /// 消息体解析失败
    #[error("invalid payload on topic {topic}: {source}")]
    InvalidPayload {
        /// 原始 topic
        topic: String,
        /// 解析错误
        #[source]
        source: ContractError,
    },

    /// 队列已关闭
    #[error("ingest queue closed")]
    QueueClosed,
}

/// Ingestion Result 类型别名
pub type Result<T> = std::result::Result<T, IngestionError>;
