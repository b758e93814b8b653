//! Journey CLI library.
//!
//! Wires the session controller to on-disk storage and the ingest service so
//! each process run reports as one session.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands};
pub use config::Config;
