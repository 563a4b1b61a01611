//! This module contains the command-line interface [`Cli`] parser for running and inspecting the
//! attendance service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The command line configuration struct, where the command-line interface parser is automatically
/// derived by [`clap::Parser`].
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file to read instead of `config.toml`.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API.
    Serve,

    /// Create the ledger tables if they do not exist.
    InitDb,

    /// Print a student's attendance totals.
    Report {
        /// The student's user id.
        user: String,

        /// Limit the report to one course.
        #[arg(long)]
        course: Option<String>,
    },

    /// Print a student's reconciled lectures for a day.
    Schedule {
        /// The student's user id.
        user: String,

        /// The day to show (`YYYY-MM-DD`), today if omitted.
        #[arg(long)]
        date: Option<String>,
    },

    /// List the course catalog, optionally for a single branch and semester.
    Catalog {
        #[arg(long, requires = "semester")]
        branch: Option<String>,

        #[arg(long)]
        semester: Option<i32>,
    },
}
