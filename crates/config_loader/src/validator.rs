//! 配置校验模块
//!
//! 校验规则：
//! - transport.addr / transport.user 非空
//! - transport.user 不含 topic 分隔符或通配符 (它会出现在发布 topic 中)
//! - topic 前缀非空且不含通配符
//! - transport.addr 可解析为 host:port
//! - publish.qos >= 1 (发布必须等待确认)
//! - publish.period_ms > 0

use contracts::{BrokerConfig, ContractError, QoS};

const TOPIC_WILDCARDS: [char; 2] = ['+', '#'];

/// 校验 BrokerConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &BrokerConfig) -> Result<(), ContractError> {
    validate_transport(config)?;
    validate_topics(config)?;
    validate_publish(config)?;
    Ok(())
}

/// 校验传输端点与节点身份
fn validate_transport(config: &BrokerConfig) -> Result<(), ContractError> {
    let transport = &config.transport;

    if transport.addr.trim().is_empty() {
        return Err(ContractError::config_validation(
            "transport.addr",
            "broker address cannot be empty",
        ));
    }

    transport.endpoint()?;

    if transport.user.is_empty() {
        return Err(ContractError::config_validation(
            "transport.user",
            "user cannot be empty",
        ));
    }

    if transport
        .user
        .chars()
        .any(|c| c == '/' || TOPIC_WILDCARDS.contains(&c))
    {
        return Err(ContractError::config_validation(
            "transport.user",
            format!(
                "user '{}' must not contain '/', '+' or '#'",
                transport.user
            ),
        ));
    }

    Ok(())
}

/// 校验 topic 命名空间
fn validate_topics(config: &BrokerConfig) -> Result<(), ContractError> {
    let prefixes = [
        ("topics.listen_prefix", &config.topics.listen_prefix),
        ("topics.publish_prefix", &config.topics.publish_prefix),
    ];

    for (field, prefix) in prefixes {
        if prefix.is_empty() {
            return Err(ContractError::config_validation(
                field,
                "topic prefix cannot be empty",
            ));
        }
        if prefix.contains(&TOPIC_WILDCARDS[..]) {
            return Err(ContractError::config_validation(
                field,
                format!("topic prefix '{prefix}' must not contain wildcards"),
            ));
        }
    }

    Ok(())
}

/// 校验发布策略
fn validate_publish(config: &BrokerConfig) -> Result<(), ContractError> {
    if config.publish.qos == QoS::AtMostOnce {
        return Err(ContractError::config_validation(
            "publish.qos",
            "qos 0 publishes are never acknowledged, use 1 or 2",
        ));
    }
    if config.publish.period_ms == 0 {
        return Err(ContractError::config_validation(
            "publish.period_ms",
            "period_ms must be > 0",
        ));
    }
    Ok(())
}
