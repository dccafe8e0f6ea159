//! `react-client` binary entry point.

use clap::Parser;
use miette::Result;
use react_client_cli::{cli, commands, logger};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    logger::init_logger(args.verbose, args.quiet, args.no_color);

    match args.command {
        cli::Command::Dev(dev_args) => commands::dev(dev_args).await,
    }
}
