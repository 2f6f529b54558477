use anyhow::Result;
use bb_dev::cli::{Cli, Command};
use bb_dev::{config_cmd, start_cmd};
use clap::Parser;

fn main() -> Result<()> {
    // Print orchestration diagnostics even when no caller configured tracing.
    let _ = tracing_subscriber::fmt::try_init();

    let cli = Cli::parse();
    match cli.command {
        Command::Start(args) => start_cmd::run(&args),
        Command::Config(config_command) => config_cmd::run(config_command),
    }
}
