// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crishim")]
#[command(about = "Container lifecycle shim running commands as host processes")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new crishim.yml configuration file
    Init {
        /// Overwrite an existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Run a command in a new container and print its output
    Run {
        /// Container name within its sandbox
        #[arg(long, default_value = "main")]
        name: String,

        /// Remove the container after it exits
        #[arg(long)]
        rm: bool,

        /// Environment variables (KEY=VALUE)
        #[arg(short, long = "env")]
        env: Vec<String>,

        /// Working directory of the command
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Command and arguments
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// List containers recorded in the state directory
    Ps,

    /// Remove containers
    Rm {
        /// Container IDs or unique ID prefixes
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Show resource usage of a running container
    Stats {
        /// Container ID or unique ID prefix
        id: String,
    },
}
