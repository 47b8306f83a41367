// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

// Standard library imports
use std::io::BufRead;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// Third-party crates
use clap::Parser;
use tracing::{debug, info};

// Local crate
use robokit::args::Args;
use robokit::config::ConfigLoader;
use robokit::service::{CommandService, QueryInfoService};
use robokit::telemetry::JointStateGenerator;
use robokit_daq::{ServiceListener, StatePublisher};

fn main() {
    let args = Args::parse();

    let config = match args.config() {
        Some(path) => ConfigLoader::new(path).expect("failed to load configuration"),
        None => ConfigLoader::default(),
    };
    config.tracing().setup_tracing_subscriber();
    debug!(?config);

    if args.check_config() {
        println!("{config:#?}");
        return;
    }

    let daq = config.daq();
    let robot = config.robot();

    let listener =
        ServiceListener::bind(daq.service_address()).expect("failed to bind the service address");
    listener
        .add_session(Arc::new(QueryInfoService::new(robot.to_info())))
        .expect("failed to add the QueryInfo session");
    listener
        .add_session(Arc::new(CommandService::new()))
        .expect("failed to add the Command session");
    info!(address = %daq.service_address(), "services up");

    let publisher = StatePublisher::bind(daq.topic(), daq.state_address(), daq.queue_capacity())
        .expect("failed to bind the state address");
    info!(address = %daq.state_address(), topic = %daq.topic(), "publisher up");

    // telemetry loop, decoupled from the console thread
    let running = Arc::new(AtomicBool::new(true));
    let period = Duration::from_millis(daq.period_ms());
    let telemetry = {
        let running = running.clone();
        let publisher = Arc::new(publisher);
        let worker = publisher.clone();
        let mut generator = JointStateGenerator::new(robot.dof as usize, daq.period_ms());
        let handle = std::thread::spawn(move || {
            while running.load(Ordering::Acquire) {
                worker
                    .publish(&generator.next_state())
                    .expect("publish failed");
                std::thread::sleep(period);
            }
        });
        (handle, publisher)
    };

    info!("running, enter 'q' to quit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        match line {
            Ok(line) if line.trim() == "q" => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    info!("shutting down");
    running.store(false, Ordering::Release);
    let (handle, publisher) = telemetry;
    let _ = handle.join();
    publisher.stop();
    listener.stop();
}
