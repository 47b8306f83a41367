// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Transport-agnostic RPC surface: message types, method names and the
//! per-method marker traits the call/session engines are generic over.
//!
//! Messages are hand-derived prost types. The wire encoding itself is out of
//! scope for the engine; payloads cross the transport as already-encoded
//! bytes.

// Standard library imports
use std::time::{SystemTime, UNIX_EPOCH};

// Third-party crates
use bytes::Bytes;
use prost::Message;
use tonic::Status;

/// RPC method names, used as accept/dispatch keys by the transport.
pub mod methods {
    pub const QUERY_INFO: &str = "robokit.DaqService/QueryInfo";
    pub const COMMAND: &str = "robokit.DaqService/Command";
    pub const SUBSCRIBE: &str = "robokit.DaqService/Subscribe";
}

#[derive(Clone, PartialEq, Message)]
pub struct Empty {}

/// Response of `QueryInfo`: static description of the robot process.
#[derive(Clone, PartialEq, Message)]
pub struct RobotInfo {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub version: String,
    #[prost(string, tag = "3")]
    pub author: String,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(string, tag = "5")]
    pub serial: String,
    #[prost(uint32, tag = "6")]
    pub r#type: u32,
    #[prost(uint32, tag = "7")]
    pub id: u32,
    #[prost(uint32, tag = "8")]
    pub dof: u32,
}

/// Request of `Command`: a control command for the robot process.
#[derive(Clone, PartialEq, Message)]
pub struct ControlCmd {
    #[prost(uint32, tag = "1")]
    pub mode: u32,
    #[prost(double, tag = "2")]
    pub arg: f64,
}

/// Response of `Command`.
#[derive(Clone, PartialEq, Message)]
pub struct CmdResponse {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum SubscribeMode {
    Off = 0,
    On = 1,
}

/// Request of the server-streaming `Subscribe` method.
#[derive(Clone, PartialEq, Message)]
pub struct SubscribeRequest {
    #[prost(string, tag = "1")]
    pub topic_name: String,
    #[prost(enumeration = "SubscribeMode", tag = "2")]
    pub mode: i32,
}

impl SubscribeRequest {
    pub fn new(topic_name: &str, mode: SubscribeMode) -> Self {
        SubscribeRequest {
            topic_name: topic_name.to_string(),
            mode: mode as i32,
        }
    }
}

/// Type-tagged payload carried by an [`Envelope`]. Receivers decode by
/// expected type and skip envelopes whose `type_url` does not match.
#[derive(Clone, PartialEq, Message)]
pub struct AnyPayload {
    #[prost(string, tag = "1")]
    pub type_url: String,
    #[prost(bytes = "bytes", tag = "2")]
    pub value: Bytes,
}

/// One streamed state sample.
#[derive(Clone, PartialEq, Message)]
pub struct Envelope {
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(uint64, tag = "2")]
    pub timestamp_ns: u64,
    #[prost(message, optional, tag = "3")]
    pub payload: Option<AnyPayload>,
}

/// Joint-space telemetry sample, the default streamed state type.
#[derive(Clone, PartialEq, Message)]
pub struct JointState {
    #[prost(double, repeated, tag = "1")]
    pub position: Vec<f64>,
    #[prost(double, repeated, tag = "2")]
    pub velocity: Vec<f64>,
    #[prost(double, repeated, tag = "3")]
    pub acceleration: Vec<f64>,
    #[prost(double, repeated, tag = "4")]
    pub torque: Vec<f64>,
}

/// A message that can travel inside an [`Envelope`].
pub trait TypedState: Message + Default + 'static {
    const TYPE_URL: &'static str;
}

impl TypedState for JointState {
    const TYPE_URL: &'static str = "type.robokit.io/robokit.JointState";
}

impl TypedState for RobotInfo {
    const TYPE_URL: &'static str = "type.robokit.io/robokit.RobotInfo";
}

pub fn now_timestamp_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Pack a typed state into an envelope with the given sequence number.
pub fn pack<T: TypedState>(sequence: u64, state: &T) -> Envelope {
    Envelope {
        sequence,
        timestamp_ns: now_timestamp_ns(),
        payload: Some(AnyPayload {
            type_url: T::TYPE_URL.to_string(),
            value: Bytes::from(state.encode_to_vec()),
        }),
    }
}

/// Unpack an envelope into the expected state type.
///
/// Returns `Ok(None)` when the envelope has no payload or carries a
/// different type; decode errors of a matching payload are surfaced.
pub fn unpack<T: TypedState>(envelope: &Envelope) -> Result<Option<T>, prost::DecodeError> {
    match &envelope.payload {
        Some(payload) if payload.type_url == T::TYPE_URL => {
            T::decode(payload.value.clone()).map(Some)
        }
        _ => Ok(None),
    }
}

/// Shape of a unary RPC method, client side. One marker type per method.
pub trait UnaryCall: Send + Sync + 'static {
    type Request: Message;
    type Response: Message + Default + 'static;
    const METHOD: &'static str;
}

/// Shape and implementation of a unary RPC method, server side.
///
/// `handle` is the compute hook invoked on the dispatch thread when a
/// connected session is ready to respond.
pub trait UnaryService: Send + Sync + 'static {
    type Request: Message + Default;
    type Response: Message;
    const METHOD: &'static str;

    fn handle(&self, request: Self::Request) -> Result<Self::Response, Status>;
}

/// Marker for the `QueryInfo` unary call.
pub struct QueryInfo;

impl UnaryCall for QueryInfo {
    type Request = Empty;
    type Response = RobotInfo;
    const METHOD: &'static str = methods::QUERY_INFO;
}

/// Marker for the `Command` unary call.
pub struct Command;

impl UnaryCall for Command {
    type Request = ControlCmd;
    type Response = CmdResponse;
    const METHOD: &'static str = methods::COMMAND;
}
