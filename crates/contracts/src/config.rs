//! BrokerConfig - Config Loader output
//!
//! Transport endpoint and credentials, topic namespace, publish policy, shutdown.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ContractError, NodeId, QoS};

/// Complete broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Transport endpoint and credentials
    pub transport: TransportConfig,

    /// Topic namespace
    #[serde(default)]
    pub topics: TopicConfig,

    /// Outbound publish policy
    #[serde(default)]
    pub publish: PublishConfig,

    /// Shutdown behaviour
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

impl BrokerConfig {
    /// Identity of this node in outbound topics
    pub fn node_id(&self) -> NodeId {
        NodeId::new(&self.transport.user)
    }
}

/// Transport endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Broker address, e.g. "tcp://127.0.0.1:1883"
    pub addr: String,

    /// User name, also the node identity
    pub user: String,

    #[serde(default)]
    pub password: Option<String>,

    /// Transport client id (defaults to `user`)
    #[serde(default)]
    pub client_id: Option<String>,
}

/// Port used when `addr` does not carry one
pub const DEFAULT_TRANSPORT_PORT: u16 = 1883;

impl TransportConfig {
    pub fn effective_client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or(&self.user)
    }

    /// Split `addr` into host and port
    ///
    /// Accepts `host[:port]` with an optional `tcp://` or `mqtt://` scheme.
    pub fn endpoint(&self) -> Result<(String, u16), ContractError> {
        let invalid = |message: String| ContractError::config_validation("transport.addr", message);

        let rest = match self.addr.trim().split_once("://") {
            Some(("tcp" | "mqtt", rest)) => rest,
            Some((scheme, _)) => return Err(invalid(format!("unsupported scheme '{scheme}'"))),
            None => self.addr.trim(),
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| invalid(format!("invalid port '{port}': {e}")))?;
                (host, port)
            }
            None => (rest, DEFAULT_TRANSPORT_PORT),
        };
        if host.is_empty() {
            return Err(invalid(format!("missing host in '{}'", self.addr)));
        }
        Ok((host.to_string(), port))
    }
}

/// Topic namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Prefix of inbound client topics
    #[serde(default = "default_listen_prefix")]
    pub listen_prefix: String,

    /// Prefix of outbound miner topics
    #[serde(default = "default_publish_prefix")]
    pub publish_prefix: String,
}

fn default_listen_prefix() -> String {
    "/cql/client/".to_string()
}

fn default_publish_prefix() -> String {
    "/cql/miner/".to_string()
}

impl Default for TopicConfig {
    fn default() -> Self {
        Self {
            listen_prefix: default_listen_prefix(),
            publish_prefix: default_publish_prefix(),
        }
    }
}

impl TopicConfig {
    /// Listen prefix, always ending with `/`
    pub fn listen_root(&self) -> String {
        with_trailing_slash(&self.listen_prefix)
    }

    /// Wildcard filter covering every inbound topic
    pub fn listen_filter(&self) -> String {
        format!("{}#", self.listen_root())
    }

    /// `<publish_prefix>/<node>` without a trailing slash
    pub fn publish_root(&self, node: &NodeId) -> String {
        format!("{}{}", with_trailing_slash(&self.publish_prefix), node)
    }
}

fn with_trailing_slash(prefix: &str) -> String {
    if prefix.ends_with('/') {
        prefix.to_string()
    } else {
        format!("{prefix}/")
    }
}

/// Outbound publish policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    #[serde(default)]
    pub qos: QoS,

    /// Late subscribers see the last published value immediately
    #[serde(default = "default_retained")]
    pub retained: bool,

    /// Newest-block publish period in milliseconds, must be > 0
    #[serde(default = "default_period_ms")]
    pub period_ms: u64,

    /// Stop the whole tick at the first database that fails to publish
    #[serde(default)]
    pub halt_on_error: bool,
}

fn default_retained() -> bool {
    true
}

fn default_period_ms() -> u64 {
    1000
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            qos: QoS::AtLeastOnce,
            retained: default_retained(),
            period_ms: default_period_ms(),
            halt_on_error: false,
        }
    }
}

impl PublishConfig {
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
}

/// Shutdown behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Time granted to the transport to flush on disconnect
    #[serde(default = "default_quiesce_ms")]
    pub disconnect_quiesce_ms: u64,
}

fn default_quiesce_ms() -> u64 {
    250
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            disconnect_quiesce_ms: default_quiesce_ms(),
        }
    }
}

impl ShutdownConfig {
    pub fn quiesce(&self) -> Duration {
        Duration::from_millis(self.disconnect_quiesce_ms)
    }
}
