// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0
//
// ConfigLoader reads the daemon configuration once and exposes the typed
// sections. Every section is optional; absent sections fall back to their
// defaults so a minimal deployment can run with an empty file.

// Standard library imports
use std::collections::HashSet;

// Third-party crates
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

// Local crate
use robokit_config::component::configuration::{Configuration, ConfigurationError};
use robokit_config::conf::{Conf, ConfError};
use robokit_config::provider::{ConfigProvider, file::FileConfigProvider};
use robokit_daq::RobotInfo;
use robokit_tracing::TracingConfiguration;

#[derive(Error, Debug)]
pub enum ConfigError {
    // File / I/O
    #[error("not found: {0}")]
    NotFound(String),

    // Parsing / structural validity
    #[error("invalid configuration - impossible to parse yaml")]
    InvalidYaml,
    #[error("invalid configuration - key {0} not valid")]
    InvalidKey(String),

    // YAML decoding (typed propagation)
    #[error("yaml parse error: {0}")]
    YamlError(#[from] ConfError),

    // Section validation
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

static CONFIG_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut s = HashSet::new();
    s.insert("tracing");
    s.insert("daq");
    s.insert("robot");
    s
});

/// DAQ engine settings of the daemon.
#[derive(Clone, Debug, Deserialize)]
pub struct DaqConfiguration {
    /// Address serving the unary methods.
    #[serde(default = "default_service_address")]
    service_address: String,

    /// Address serving the state stream.
    #[serde(default = "default_state_address")]
    state_address: String,

    /// Topic the state publisher announces.
    #[serde(default = "default_topic")]
    topic: String,

    /// Per-subscriber queue bound. Negative keeps everything, zero drops
    /// while a write is in flight, positive keeps the newest N samples.
    #[serde(default = "default_queue_capacity")]
    queue_capacity: i32,

    /// Telemetry publish period in milliseconds.
    #[serde(default = "default_period_ms")]
    period_ms: u64,
}

fn default_service_address() -> String {
    "127.0.0.1:50051".to_string()
}

fn default_state_address() -> String {
    "127.0.0.1:50052".to_string()
}

fn default_topic() -> String {
    "RobotState".to_string()
}

fn default_queue_capacity() -> i32 {
    8
}

fn default_period_ms() -> u64 {
    10
}

impl Default for DaqConfiguration {
    fn default() -> Self {
        DaqConfiguration {
            service_address: default_service_address(),
            state_address: default_state_address(),
            topic: default_topic(),
            queue_capacity: default_queue_capacity(),
            period_ms: default_period_ms(),
        }
    }
}

impl DaqConfiguration {
    pub fn service_address(&self) -> &str {
        &self.service_address
    }

    pub fn state_address(&self) -> &str {
        &self.state_address
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn queue_capacity(&self) -> i32 {
        self.queue_capacity
    }

    pub fn period_ms(&self) -> u64 {
        self.period_ms
    }
}

impl Configuration for DaqConfiguration {
    type Error = ConfigurationError;

    fn validate(&self) -> Result<(), ConfigurationError> {
        for (name, address) in [
            ("service_address", &self.service_address),
            ("state_address", &self.state_address),
        ] {
            if !address.contains(':') {
                return Err(ConfigurationError::Invalid(format!(
                    "{name} must be host:port, got {address:?}"
                )));
            }
        }
        if self.service_address == self.state_address {
            return Err(ConfigurationError::Invalid(
                "service_address and state_address must differ".to_string(),
            ));
        }
        if self.topic.is_empty() {
            return Err(ConfigurationError::MissingKey("topic".to_string()));
        }
        if self.period_ms == 0 {
            return Err(ConfigurationError::Invalid(
                "period_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Static description of the robot, answered by the QueryInfo service.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RobotProfile {
    pub name: String,
    pub version: String,
    pub author: String,
    pub description: String,
    pub serial: String,
    pub r#type: u32,
    pub id: u32,
    pub dof: u32,
}

impl Default for RobotProfile {
    fn default() -> Self {
        RobotProfile {
            name: "QuadIP".to_string(),
            version: "0.1.0".to_string(),
            author: "Robokit".to_string(),
            description: "quadruped robot".to_string(),
            serial: String::new(),
            r#type: 0,
            id: 0,
            dof: 12,
        }
    }
}

impl RobotProfile {
    pub fn to_info(&self) -> RobotInfo {
        RobotInfo {
            name: self.name.clone(),
            version: self.version.clone(),
            author: self.author.clone(),
            description: self.description.clone(),
            serial: self.serial.clone(),
            r#type: self.r#type,
            id: self.id,
            dof: self.dof,
        }
    }
}

#[derive(Debug)]
pub struct ConfigLoader {
    tracing: TracingConfiguration,
    daq: DaqConfiguration,
    robot: RobotProfile,
}

impl ConfigLoader {
    pub fn new(file_path: &str) -> Result<Self, ConfigError> {
        let contents = FileConfigProvider
            .load(file_path)
            .map_err(|e| ConfigError::NotFound(e.to_string()))?;
        Self::from_str(&contents)
    }

    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let root = Conf::from_str(contents).map_err(|_| ConfigError::InvalidYaml)?;
        if root.is_null() {
            debug!("empty configuration, using defaults");
            return Ok(ConfigLoader::default());
        }
        if !root.is_mapping() {
            return Err(ConfigError::InvalidYaml);
        }
        for key in root.keys() {
            if !CONFIG_KEYS.contains(key.as_str()) {
                return Err(ConfigError::InvalidKey(key));
            }
        }

        let loader = ConfigLoader {
            tracing: section(&root, "tracing")?,
            daq: section(&root, "daq")?,
            robot: section(&root, "robot")?,
        };
        loader.daq.validate()?;
        Ok(loader)
    }

    pub fn tracing(&self) -> &TracingConfiguration {
        &self.tracing
    }

    pub fn daq(&self) -> &DaqConfiguration {
        &self.daq
    }

    pub fn robot(&self) -> &RobotProfile {
        &self.robot
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        ConfigLoader {
            tracing: TracingConfiguration::default(),
            daq: DaqConfiguration::default(),
            robot: RobotProfile::default(),
        }
    }
}

fn section<T>(root: &Conf, key: &str) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de> + Default,
{
    match root.get(key) {
        Ok(node) => Ok(node.to()?),
        Err(_) => Ok(T::default()),
    }
}
