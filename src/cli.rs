//! Command-line interface for voxpipe
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Voice assistant pipeline orchestration
#[derive(Parser, Debug)]
#[command(
    name = "voxpipe",
    version = crate::version_string(),
    about = "Voice assistant pipeline orchestration"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a WAV file through the pipeline and print the event stream
    Run {
        /// Input WAV file (16-bit PCM)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,

        /// Keyword the demo spotter reports when speech is present
        #[arg(long, value_name = "WORD", default_value = "hello")]
        wake: String,

        /// Transcript the demo recognizer returns for the utterance
        #[arg(long, value_name = "TEXT", default_value = "what's the weather like")]
        transcript: String,

        /// Feed audio at capture speed instead of as fast as possible
        #[arg(long)]
        realtime: bool,

        /// Pretty-print events instead of one JSON object per line
        #[arg(long)]
        pretty: bool,
    },

    /// Validate a configuration file and print the effective values
    CheckConfig,
}
