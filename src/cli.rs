use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::util::ByteSize;

#[derive(Parser, Debug)]
#[command(name = "herd", about = "Workflow catalog for VM provisioning")]
pub struct Cli {
    /// Path to config file (default: ~/.config/herd/herd.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Also write debug logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Browse and apply workflows
    Workflows {
        #[command(subcommand)]
        action: WorkflowsCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowsCommand {
    /// List workflows available on this host
    List {
        /// Download the archive even if the cached copy is fresh
        #[arg(long)]
        refresh: bool,
    },

    /// Show a single workflow
    Info {
        /// Workflow name or alias
        name: String,
    },

    /// Show the VM a workflow would create
    Plan {
        /// Workflow name or alias
        name: String,

        /// Number of CPUs (default: workflow minimum)
        #[arg(long)]
        cpus: Option<u32>,

        /// Memory size, e.g. 4G (default: workflow minimum)
        #[arg(long)]
        memory: Option<ByteSize>,

        /// Disk size, e.g. 20G (default: workflow minimum)
        #[arg(long)]
        disk: Option<ByteSize>,
    },
}
