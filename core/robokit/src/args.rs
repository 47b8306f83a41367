// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;

#[derive(Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    #[clap(long, env)]
    config: Option<String>,

    /// Print the configuration after loading and exit
    #[arg(long, default_value_t = false)]
    check_config: bool,
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn check_config(&self) -> bool {
        self.check_config
    }
}
