// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

// Third-party crates
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaqError {
    // Transport / addressing
    #[error("server unreachable: {0}")]
    ServerUnreachable(String),
    #[error("address already in use: {0}")]
    AddressInUse(String),

    // Engine lifecycle
    #[error("engine already stopped")]
    EngineStopped,
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    // Payloads
    #[error("payload decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    // RPC status propagation
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),

    // I/O (dispatch thread spawn, file sinks)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration
    #[error("configuration error: {0}")]
    Configuration(String),
}
