//! Discrete-event simulator for wireless ad-hoc networks running the
//! IEEE 802.11 distributed coordination function.
//!
//! Stations live on a `field::Field`, which propagates every transmission
//! to the radios in range through a `spatial` index. Each station stacks a
//! `radio::Radio`, a `mac::Mac802_11` and a network layer (`net`); the
//! `simulation::Simulation` loop carries events between them in virtual
//! time. `common::scene` builds a simulation from a JSON or TOML file.

pub mod common;
pub mod field;
pub mod mac;
pub mod net;
pub mod radio;
pub mod simulation;
pub mod spatial;
