// Error types for simulation setup and clock control

use thiserror::Error;

use crate::state_manager::ClockState;

/// Result type for fallible setup and control operations
pub type Result<T> = std::result::Result<T, SimulationError>;

/// Errors raised while configuring or controlling a simulation.
///
/// The physics functions themselves never fail; degenerate input shows up
/// as non-finite body state instead.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown parent body: {0}")]
    UnknownParent(String),

    #[error("Invalid time factor: {0} (must be finite and > 0)")]
    InvalidTimeFactor(f64),

    #[error("Clock cannot start from state {0:?}")]
    ClockNotIdle(ClockState),

    #[error("Failed to spawn clock thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Reasons a single tick of the background loop was discarded
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TickError {
    #[error("integration step panicked: {0}")]
    Panicked(String),

    #[error("simulated date overflowed after {elapsed_seconds} s")]
    DateOverflow { elapsed_seconds: f64 },
}
