// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Unary service implementations hosted by the daemon.

// Third-party crates
use parking_lot::Mutex;
use tonic::Status;
use tracing::info;

// Local crate
use robokit_daq::api::methods;
use robokit_daq::{CmdResponse, ControlCmd, Empty, RobotInfo, UnaryService};

/// Answers `QueryInfo` with the configured robot profile.
pub struct QueryInfoService {
    info: RobotInfo,
}

impl QueryInfoService {
    pub fn new(info: RobotInfo) -> Self {
        QueryInfoService { info }
    }
}

impl UnaryService for QueryInfoService {
    type Request = Empty;
    type Response = RobotInfo;
    const METHOD: &'static str = methods::QUERY_INFO;

    fn handle(&self, _request: Empty) -> Result<RobotInfo, Status> {
        Ok(self.info.clone())
    }
}

/// Accepts control commands and remembers the most recent one.
pub struct CommandService {
    last: Mutex<Option<ControlCmd>>,
}

impl CommandService {
    pub fn new() -> Self {
        CommandService {
            last: Mutex::new(None),
        }
    }

    pub fn last_command(&self) -> Option<ControlCmd> {
        self.last.lock().clone()
    }
}

impl Default for CommandService {
    fn default() -> Self {
        CommandService::new()
    }
}

impl UnaryService for CommandService {
    type Request = ControlCmd;
    type Response = CmdResponse;
    const METHOD: &'static str = methods::COMMAND;

    fn handle(&self, request: ControlCmd) -> Result<CmdResponse, Status> {
        info!(mode = request.mode, arg = request.arg, "control command received");
        let response = CmdResponse {
            code: request.mode as i32,
            message: format!("accepted mode {}", request.mode),
        };
        *self.last.lock() = Some(request);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_info_returns_profile() {
        let service = QueryInfoService::new(RobotInfo {
            name: "ArmD6".to_string(),
            dof: 6,
            ..Default::default()
        });
        let info = service.handle(Empty {}).unwrap();
        assert_eq!(info.name, "ArmD6");
        assert_eq!(info.dof, 6);
    }

    #[test]
    fn test_command_is_acknowledged_and_remembered() {
        let service = CommandService::new();
        assert!(service.last_command().is_none());

        let response = service.handle(ControlCmd { mode: 2, arg: 1.5 }).unwrap();
        assert_eq!(response.code, 2);

        let last = service.last_command().unwrap();
        assert_eq!(last.mode, 2);
        assert_eq!(last.arg, 1.5);
    }
}
