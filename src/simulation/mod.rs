//! Simulation core.
//!
//! This module provides the discrete-event infrastructure the protocol
//! components run on:
//! - Virtual time and the deterministic event queue
//! - Locations, rectangles and radio-wave propagation math
//! - Radio identifiers, shared radio properties and configuration errors
//! - The `Simulation` loop wiring field, radios, MACs and network layers
//!
//! ## Module Organization
//!
//! - `time`: `SimTime` nanosecond clock and unit constants
//! - `scheduler`: (time, insertion)-ordered event queue
//! - `geometry`: `Location`, `Rect`
//! - `signal_calculations`: path loss, fading, dBm/mW conversion
//! - `types`: `RadioId`, `RadioProperties`, `ConfigError`, defaults
//! - `network`: `Simulation`, its events and errors

pub mod geometry;
pub mod network;
pub mod scheduler;
pub mod signal_calculations;
pub mod time;
pub mod types;

pub use network::{Event, FieldEvent, NetEvent, Node, SimError, Simulation, SimulationStats};
pub use time::SimTime;
pub use types::{ConfigError, RadioId};
