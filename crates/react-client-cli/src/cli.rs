//! Command-line argument definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Dev server and toolchain for JSX single-page apps.
#[derive(Debug, Parser)]
#[command(name = "react-client", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug-level logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the development server
    Dev(DevArgs),
}

/// Arguments of the `dev` command.
#[derive(Debug, Args)]
pub struct DevArgs {
    /// Project root directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Listen port
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Do not open the browser on start
    #[arg(long)]
    pub no_open: bool,
}
