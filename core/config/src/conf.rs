// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

// Generic key/value accessor over a parsed YAML tree. Typed components
// deserialize their own sections with serde; this accessor is for callers
// that only need a handful of scalar settings.

use serde::de::DeserializeOwned;
use serde_yaml::Value;
use thiserror::Error;

use crate::provider::{ConfigProvider, ProviderError, file::FileConfigProvider};

#[derive(Error, Debug)]
pub enum ConfError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("unexpected value type for key: {0}")]
    WrongType(String),
}

/// A view over a node of the configuration tree.
#[derive(Clone, Debug)]
pub struct Conf {
    node: Value,
}

impl Conf {
    /// Load a configuration tree from a YAML file.
    pub fn from_file(file_path: &str) -> Result<Self, ConfError> {
        let text = FileConfigProvider.load(file_path)?;
        Self::from_str(&text)
    }

    /// Parse a configuration tree from YAML text.
    pub fn from_str(text: &str) -> Result<Self, ConfError> {
        let node: Value = serde_yaml::from_str(text)?;
        Ok(Conf { node })
    }

    /// Index into a mapping. Returns an error if the key is absent.
    pub fn get(&self, key: &str) -> Result<Conf, ConfError> {
        match self.node.get(key) {
            Some(v) => Ok(Conf { node: v.clone() }),
            None => Err(ConfError::KeyNotFound(key.to_string())),
        }
    }

    /// Index into a mapping, falling back to an empty node.
    pub fn get_or_default(&self, key: &str) -> Conf {
        self.get(key).unwrap_or(Conf { node: Value::Null })
    }

    /// Deserialize this node into a typed configuration.
    pub fn to<T: DeserializeOwned>(&self) -> Result<T, ConfError> {
        Ok(serde_yaml::from_value(self.node.clone())?)
    }

    pub fn to_str(&self) -> Result<String, ConfError> {
        self.node
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ConfError::WrongType("string".to_string()))
    }

    pub fn to_i64(&self) -> Result<i64, ConfError> {
        self.node
            .as_i64()
            .ok_or_else(|| ConfError::WrongType("integer".to_string()))
    }

    pub fn to_f64(&self) -> Result<f64, ConfError> {
        self.node
            .as_f64()
            .ok_or_else(|| ConfError::WrongType("float".to_string()))
    }

    pub fn to_bool(&self) -> Result<bool, ConfError> {
        self.node
            .as_bool()
            .ok_or_else(|| ConfError::WrongType("boolean".to_string()))
    }

    /// Keys of a mapping node, empty for any other node kind.
    pub fn keys(&self) -> Vec<String> {
        self.node.as_mapping().map_or_else(Vec::new, |mapping| {
            mapping
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect()
        })
    }

    pub fn is_mapping(&self) -> bool {
        self.node.is_mapping()
    }

    /// Number of elements for sequence nodes, 0 otherwise.
    pub fn len(&self) -> usize {
        self.node.as_sequence().map_or(0, |s| s.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self) -> bool {
        self.node.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
daq:
  server_address: "0.0.0.0:50051"
  queue_capacity: 10
  topics:
    - RobotState
    - JointState
tracing:
  log_level: debug
"#;

    #[test]
    fn test_scalar_accessors() {
        let conf = Conf::from_str(YAML).unwrap();
        let daq = conf.get("daq").unwrap();
        assert_eq!(
            daq.get("server_address").unwrap().to_str().unwrap(),
            "0.0.0.0:50051"
        );
        assert_eq!(daq.get("queue_capacity").unwrap().to_i64().unwrap(), 10);
        assert_eq!(daq.get("topics").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_key() {
        let conf = Conf::from_str(YAML).unwrap();
        assert!(matches!(
            conf.get("nonexistent"),
            Err(ConfError::KeyNotFound(_))
        ));
        assert!(conf.get_or_default("nonexistent").is_null());
    }

    #[test]
    fn test_typed_section() {
        #[derive(serde::Deserialize)]
        struct Tracing {
            log_level: String,
        }
        let conf = Conf::from_str(YAML).unwrap();
        let tracing: Tracing = conf.get("tracing").unwrap().to().unwrap();
        assert_eq!(tracing.log_level, "debug");
    }

    #[test]
    fn test_mapping_keys() {
        let conf = Conf::from_str(YAML).unwrap();
        assert!(conf.is_mapping());
        assert_eq!(conf.keys(), vec!["daq".to_string(), "tracing".to_string()]);
        assert!(conf.get("daq").unwrap().get("topics").unwrap().keys().is_empty());
    }

    #[test]
    fn test_wrong_type() {
        let conf = Conf::from_str(YAML).unwrap();
        let daq = conf.get("daq").unwrap();
        assert!(daq.get("server_address").unwrap().to_i64().is_err());
    }
}
