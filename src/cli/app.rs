use super::commands::records::AddArgs;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "roster")]
#[command(about = "Keep a personnel roster in a CSV file, from the terminal")]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Roster CSV file, overrides `data_file` from the config
    #[arg(long, global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch the interactive TUI (default)
    Tui,
    /// Print the roster
    List {
        /// Fuzzy filter over names, department and title
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Write the roster to another CSV file
    Export {
        /// Destination file
        path: PathBuf,
    },
    /// Add a person
    Add(AddArgs),
}
