//! Command line interface module
//!
//! This module provides argument parsing and the runner that wires
//! configuration, mirrors, checkpoints and cancellation into a fetch.

pub mod args;
pub mod runner;

pub use args::{Args, Command};
pub use runner::Runner;
