//! Command-line argument parsing for perfcore
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// perfcore - inspect and exercise the performance core
#[derive(Parser, Debug)]
#[command(name = "perfcore")]
#[command(version)]
#[command(about = "Cache, pools, background tasks and monitoring with a single coordinator", long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -v (info), -vv (debug), -vvv (trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run a synthetic workload and print the performance export
    Report {
        /// How long to run the workload
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,
    },

    /// Run one optimization cycle and print its summary
    Optimize,

    /// Print current optimization suggestions
    Suggest,

    /// Display the effective configuration
    Config {
        /// Write it to this path instead
        #[arg(long, value_name = "PATH")]
        write: Option<PathBuf>,
    },
}

/// Verbosity level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
    Trace,
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            return Verbosity::Quiet;
        }
        match self.verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            2 => Verbosity::Debug,
            _ => Verbosity::Trace,
        }
    }
}

impl Verbosity {
    /// Default `tracing` filter directive for this level
    pub fn filter_directive(&self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
            Verbosity::Trace => "trace",
        }
    }
}
