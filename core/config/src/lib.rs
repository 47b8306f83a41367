// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

pub mod component;
pub mod conf;
pub mod provider;
