//! Connection settings derived from `TransportConfig`

use std::time::Duration;

use contracts::{ContractError, TransportConfig};

/// MQTT connection settings
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub user: String,
    pub password: Option<String>,
    pub keep_alive: Duration,
    /// How long `connect` waits for ConnAck
    pub connect_timeout: Duration,
    /// How long an operation waits for its acknowledgement
    pub ack_timeout: Duration,
    /// Pause between reconnect attempts
    pub reconnect_delay: Duration,
    /// Request channel capacity between client handle and event loop
    pub request_capacity: usize,
}

impl MqttSettings {
    /// Endpoint and credentials from config, timeouts at their defaults
    pub fn from_config(config: &TransportConfig) -> Result<Self, ContractError> {
        let (host, port) = config.endpoint()?;
        Ok(Self {
            host,
            port,
            client_id: config.effective_client_id().to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(1),
            request_capacity: 64,
        })
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub(crate) fn mqtt_options(&self) -> rumqttc::MqttOptions {
        let mut options = rumqttc::MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_credentials(&self.user, self.password.as_deref().unwrap_or_default());
        options
    }
}
