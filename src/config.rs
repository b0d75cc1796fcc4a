use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::task::TaskStatus;

#[derive(Debug, Parser)]
#[command(name = "taskboard", version, about = "Kanban task board for the terminal")]
pub struct Cli {
    /// Directory holding the stored board
    #[arg(long, env = "TASKBOARD_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log file (defaults to taskboard.log inside the data directory)
    #[arg(long, env = "TASKBOARD_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Open the interactive board (default)
    Board,
    /// Print every task grouped by column
    List,
    /// Add a task to the "to do" column
    Add {
        title: String,
        #[arg(default_value = "")]
        description: String,
    },
    /// Move a task to another column
    Move {
        id: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    /// Delete a task
    Delete { id: String },
    /// Write a JSON backup of the board
    Export {
        /// Output file; prints to stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Merge tasks from a JSON backup
    Import { path: PathBuf },
    /// Show storage usage
    Stats,
    /// Delete every task
    Clear {
        /// Confirm the irreversible clear
        #[arg(long)]
        yes: bool,
    },
}

fn parse_status(value: &str) -> Result<TaskStatus, String> {
    value.parse::<TaskStatus>().map_err(|err| err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
        let log_file = cli
            .log_file
            .clone()
            .unwrap_or_else(|| data_dir.join("taskboard.log"));
        Self { data_dir, log_file }
    }
}

/// `$HOME/.taskboard`, falling back to the working directory.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".taskboard")
}
