// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Subscriber setup for robokit processes. The daemon deserializes a
//! [`TracingConfiguration`] from the `tracing` section of its YAML file and
//! installs the process-wide subscriber once at startup; engine crates only
//! emit through the `tracing` macros and never depend on a subscriber being
//! present.

// Standard library imports
use std::str::FromStr;

// Third-party crates
use serde::{Deserialize, Serialize};
use tracing::Level;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct TracingConfiguration {
    /// One of `trace`, `debug`, `info`, `warn`, `error`. Unknown names fall
    /// back to `info`.
    log_level: String,

    /// Include the originating thread name in each line. The engines name
    /// their dispatch and worker threads, so this is on by default.
    display_thread_names: bool,

    display_thread_ids: bool,
}

impl Default for TracingConfiguration {
    fn default() -> Self {
        TracingConfiguration {
            log_level: "info".to_string(),
            display_thread_names: true,
            display_thread_ids: false,
        }
    }
}

impl TracingConfiguration {
    pub fn with_log_level(self, log_level: impl Into<String>) -> Self {
        TracingConfiguration {
            log_level: log_level.into(),
            ..self
        }
    }

    pub fn with_display_thread_names(self, display_thread_names: bool) -> Self {
        TracingConfiguration {
            display_thread_names,
            ..self
        }
    }

    pub fn with_display_thread_ids(self, display_thread_ids: bool) -> Self {
        TracingConfiguration {
            display_thread_ids,
            ..self
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn display_thread_names(&self) -> bool {
        self.display_thread_names
    }

    pub fn display_thread_ids(&self) -> bool {
        self.display_thread_ids
    }

    /// Effective maximum level for the subscriber.
    pub fn max_level(&self) -> Level {
        Level::from_str(&self.log_level).unwrap_or(Level::INFO)
    }

    /// Install the process-wide stdout subscriber. Call once, from the
    /// binary; panics if a global subscriber is already set.
    pub fn setup_tracing_subscriber(&self) {
        tracing_subscriber::fmt()
            .with_max_level(self.max_level())
            .with_thread_names(self.display_thread_names)
            .with_thread_ids(self.display_thread_ids)
            .init()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TracingConfiguration::default();
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.max_level(), Level::INFO);
        assert!(config.display_thread_names());
        assert!(!config.display_thread_ids());
    }

    #[test]
    fn test_level_names_resolve_case_insensitively() {
        for (name, level) in [
            ("trace", Level::TRACE),
            ("DEBUG", Level::DEBUG),
            ("info", Level::INFO),
            ("Warn", Level::WARN),
            ("error", Level::ERROR),
        ] {
            let config = TracingConfiguration::default().with_log_level(name);
            assert_eq!(config.max_level(), level);
        }
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let config = TracingConfiguration::default().with_log_level("verbose");
        assert_eq!(config.max_level(), Level::INFO);
    }

    #[test]
    fn test_partial_section_keeps_remaining_defaults() {
        let config: TracingConfiguration =
            serde_yaml::from_str("log_level: debug\n").unwrap();
        assert_eq!(config.max_level(), Level::DEBUG);
        assert!(config.display_thread_names());
        assert!(!config.display_thread_ids());
    }

    #[test]
    fn test_builders() {
        let config = TracingConfiguration::default()
            .with_log_level("warn")
            .with_display_thread_names(false)
            .with_display_thread_ids(true);
        assert_eq!(config.max_level(), Level::WARN);
        assert!(!config.display_thread_names());
        assert!(config.display_thread_ids());
    }
}
