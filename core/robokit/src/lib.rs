// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Library side of the robokit daemon: argument parsing, configuration
//! loading and the services and telemetry source the binary wires together.

pub mod args;
pub mod config;
pub mod service;
pub mod telemetry;
