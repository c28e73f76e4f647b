//! Observation sequencing
//!
//! Drives an observing run as a state machine over the mount, camera and
//! focuser:
//!
//! - States from scheduling through slewing, pointing and tracking to parking
//! - Errors inside a state send the run to parking instead of aborting it
//! - Plain-language narration of what the observatory is doing
//! - Console and daily-file logging setup

pub mod config;
pub mod logging;
pub mod machine;
pub mod narration;
pub mod observatory;
pub mod states;

pub use config::StateMachineConfig;
pub use logging::{current_log_file, init_logging, log_directory};
pub use machine::{MachineError, StateMachine};
pub use narration::{LogNarrator, MemoryNarrator, Narrator, SharedNarrator};
pub use observatory::{Mount, Observatory, SharedMount, Target};
pub use states::{
    default_states, HousekeepingState, ParkedState, ParkingState, PointingState, SchedulingState, SharedState,
    SlewingState, State, StateName, TrackingState,
};
