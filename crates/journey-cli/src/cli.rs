//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use journey_core::StageNumber;

/// Session analytics for scripts and command-line tools.
///
/// Every reporting command runs as one session: the previous session is
/// reported, a new one starts, and the command's report is recorded in it.
#[derive(Debug, Parser)]
#[command(name = "journey", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start a session without reporting anything else.
    Start,

    /// Report an event.
    Event {
        /// Event name, e.g. `click_play`.
        name: String,

        /// Record consecutive repeats once in the sequence.
        #[arg(long)]
        collapsible: bool,
    },

    /// Report an error event.
    Error {
        /// Error name, e.g. `error_fetching_data`.
        name: String,
    },

    /// Report a crash event.
    Crash {
        /// Crash name.
        name: String,
    },

    /// Report reaching a funnel stage.
    Stage {
        /// Stage number, 1 to 10.
        #[arg(allow_negative_numbers = true)]
        stage: StageNumber,

        /// Stage name (defaults to `stage<NUMBER>`).
        name: Option<String>,
    },

    /// Report the current event tallies.
    Flush,

    /// Show the stored session without reporting anything.
    Status {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
