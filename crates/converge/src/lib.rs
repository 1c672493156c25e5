//! Ferry converge: conflict-resolving updates and waiting for status phases.

#![forbid(unsafe_code)]

pub mod poll;
pub mod update;

pub use poll::{abandons_phase, in_desired_state, poll_probe, poll_until, reaches_phase, wait_for, FnProbe, Observation, PhaseWait, PollOutcome, Probe};
pub use update::{update, update_with};
