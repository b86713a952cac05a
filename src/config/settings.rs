use std::collections::BTreeMap;

use serde::Deserialize;

/// Top-level configuration settings for the agent.
///
/// Includes the device identity, the dispatcher sizing and one entry per
/// broker the agent keeps a session with.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub agent: AgentSettings,
    pub dispatcher: DispatcherSettings,
    pub mqtt: BTreeMap<String, BrokerSettings>,
}

/// Device-wide settings shared by every session.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AgentSettings {
    /// MQTT client id used on every broker.
    pub device_id: String,
    /// Prefix of the status topic `<register_prefix>/<device_id>`.
    pub register_prefix: String,
    /// Prefix of the application topic `<message_prefix>/<device_id>`.
    pub message_prefix: String,
    /// How long a publish waits for its acknowledgement.
    pub publish_timeout_ms: u64,
}

/// Sizing of the shared queue and the worker pool.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub queue_capacity: usize,
    pub worker_count: usize,
    pub task_timeout_ms: u64,
}

/// Connection settings for one broker.
///
/// Empty strings are treated as absent when the session is built.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub endpoint: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub root_ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    /// Topic filter to QoS.
    pub subscribe_topics: BTreeMap<String, u8>,
    pub keep_alive_secs: u64,
    pub inbound_capacity: usize,
}

/// Partial configuration loaded from files or environment.
///
/// Missing values are filled from [`Settings::default`].
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub agent: Option<PartialAgentSettings>,
    pub dispatcher: Option<PartialDispatcherSettings>,
    #[serde(alias = "MQTT")]
    pub mqtt: Option<BTreeMap<String, PartialBrokerSettings>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialAgentSettings {
    pub device_id: Option<String>,
    pub register_prefix: Option<String>,
    pub message_prefix: Option<String>,
    pub publish_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDispatcherSettings {
    pub queue_capacity: Option<usize>,
    pub worker_count: Option<usize>,
    pub task_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub endpoint: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub root_ca: Option<String>,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub subscribe_topics: Option<BTreeMap<String, u8>>,
    pub keep_alive_secs: Option<u64>,
    pub inbound_capacity: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            agent: AgentSettings::default(),
            dispatcher: DispatcherSettings::default(),
            mqtt: BTreeMap::new(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            register_prefix: "register".to_string(),
            message_prefix: "message".to_string(),
            publish_timeout_ms: 10_000,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            worker_count: 4,
            task_timeout_ms: 5_000,
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            username: None,
            password: None,
            root_ca: None,
            cert: None,
            key: None,
            subscribe_topics: BTreeMap::new(),
            keep_alive_secs: 60,
            inbound_capacity: 16,
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from the defaults.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let agent = self.agent.unwrap_or_default();
        let dispatcher = self.dispatcher.unwrap_or_default();

        Settings {
            agent: AgentSettings {
                device_id: agent.device_id.unwrap_or(default.agent.device_id),
                register_prefix: agent
                    .register_prefix
                    .unwrap_or(default.agent.register_prefix),
                message_prefix: agent
                    .message_prefix
                    .unwrap_or(default.agent.message_prefix),
                publish_timeout_ms: agent
                    .publish_timeout_ms
                    .unwrap_or(default.agent.publish_timeout_ms),
            },
            dispatcher: DispatcherSettings {
                queue_capacity: dispatcher
                    .queue_capacity
                    .unwrap_or(default.dispatcher.queue_capacity),
                worker_count: dispatcher
                    .worker_count
                    .unwrap_or(default.dispatcher.worker_count),
                task_timeout_ms: dispatcher
                    .task_timeout_ms
                    .unwrap_or(default.dispatcher.task_timeout_ms),
            },
            mqtt: self
                .mqtt
                .unwrap_or_default()
                .into_iter()
                .map(|(alias, broker)| (alias, broker.merge_with_defaults()))
                .collect(),
        }
    }
}

impl PartialBrokerSettings {
    pub fn merge_with_defaults(self) -> BrokerSettings {
        let default = BrokerSettings::default();
        BrokerSettings {
            endpoint: self.endpoint.unwrap_or(default.endpoint),
            username: self.username,
            password: self.password,
            root_ca: self.root_ca,
            cert: self.cert,
            key: self.key,
            subscribe_topics: self.subscribe_topics.unwrap_or_default(),
            keep_alive_secs: self.keep_alive_secs.unwrap_or(default.keep_alive_secs),
            inbound_capacity: self.inbound_capacity.unwrap_or(default.inbound_capacity),
        }
    }
}
