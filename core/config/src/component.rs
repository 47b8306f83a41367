// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

pub mod configuration;
