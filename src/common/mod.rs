//! Scene files and run reports shared by the binary and the scenario tests.

pub mod report;
pub mod scene;
