// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

pub mod file;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("error reading configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration source not found: {0}")]
    NotFound(String),
}

/// A source of raw configuration text (file, env blob, ...).
pub trait ConfigProvider {
    fn load(&self, location: &str) -> Result<String, ProviderError>;
}
