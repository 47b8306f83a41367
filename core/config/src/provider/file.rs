// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

// Standard library imports
use std::fs;

// Local crate
use super::ConfigProvider;
use super::ProviderError;

/// Provider reading configuration text from a path on the local filesystem.
pub struct FileConfigProvider;

impl ConfigProvider for FileConfigProvider {
    fn load(&self, location: &str) -> Result<String, ProviderError> {
        Ok(fs::read_to_string(location)?)
    }
}
