// Copyright Robokit Contributors (https://github.com/robokit)
// SPDX-License-Identifier: Apache-2.0

//! Telemetry source of the daemon: a deterministic joint-space trajectory
//! generator standing in for the robot's control loop.

// Standard library imports
use std::f64::consts::PI;

// Local crate
use robokit_daq::JointState;

/// Generates one sinusoidal joint trajectory per degree of freedom, each
/// phase-shifted so the joints are distinguishable in recorded data.
pub struct JointStateGenerator {
    dof: usize,
    amplitude: f64,
    step: u64,
    step_seconds: f64,
}

impl JointStateGenerator {
    pub fn new(dof: usize, period_ms: u64) -> Self {
        JointStateGenerator {
            dof,
            amplitude: PI / 4.0,
            step: 0,
            step_seconds: period_ms as f64 / 1_000.0,
        }
    }

    /// Produce the next sample and advance the trajectory.
    pub fn next_state(&mut self) -> JointState {
        let t = self.step as f64 * self.step_seconds;
        self.step += 1;

        let mut state = JointState {
            position: Vec::with_capacity(self.dof),
            velocity: Vec::with_capacity(self.dof),
            acceleration: Vec::with_capacity(self.dof),
            torque: vec![0.0; self.dof],
        };
        for joint in 0..self.dof {
            let phase = 2.0 * PI * (joint as f64 / self.dof as f64);
            let angle = 2.0 * PI * t + phase;
            state.position.push(self.amplitude * angle.sin());
            state.velocity.push(self.amplitude * 2.0 * PI * angle.cos());
            state
                .acceleration
                .push(-self.amplitude * (2.0 * PI).powi(2) * angle.sin());
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimensions_match_dof() {
        let mut generator = JointStateGenerator::new(12, 10);
        let state = generator.next_state();
        assert_eq!(state.position.len(), 12);
        assert_eq!(state.velocity.len(), 12);
        assert_eq!(state.acceleration.len(), 12);
        assert_eq!(state.torque.len(), 12);
    }

    #[test]
    fn test_trajectory_advances() {
        let mut generator = JointStateGenerator::new(1, 10);
        let first = generator.next_state();
        let second = generator.next_state();
        assert_ne!(first.position, second.position);
    }

    #[test]
    fn test_positions_stay_within_amplitude() {
        let mut generator = JointStateGenerator::new(6, 3);
        for _ in 0..500 {
            let state = generator.next_state();
            for position in state.position {
                assert!(position.abs() <= PI / 4.0 + 1e-9);
            }
        }
    }
}
