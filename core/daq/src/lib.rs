// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Event-driven data acquisition engines for robot processes: unary RPC
//! client and server, state publishing and subscription over server
//! streaming, and file sinks for recording received samples.
//!
//! Every engine owns a completion queue and a dedicated dispatch thread;
//! calls and sessions are small state machines registered by id and driven
//! one completion event at a time.

pub mod api;
pub mod caller;
pub mod completion;
pub mod dispatch;
pub mod errors;
pub mod listener;
pub mod publisher;
pub mod registry;
pub mod sink;
pub mod subscriber;
pub mod transport;

pub use api::{
    CmdResponse, Command, ControlCmd, Empty, Envelope, JointState, QueryInfo, RobotInfo,
    SubscribeMode, SubscribeRequest, TypedState, UnaryCall, UnaryService,
};
pub use caller::ServiceCaller;
pub use errors::DaqError;
pub use listener::ServiceListener;
pub use publisher::StatePublisher;
pub use sink::{DataSink, FileSink, RotatingFileSink};
pub use subscriber::{Sample, StateSubscriber};
