use clap::Parser;
use colored::Colorize;
use std::process::exit;

use notewright::cli::{handle_command, CliArgs};
use notewright::utils::init_logger;

#[tokio::main]
async fn main() {
    init_logger();

    let args = CliArgs::parse();
    log::debug!("Executing command: {:?}", args.command);

    if let Err(e) = handle_command(args).await {
        log::error!("Command execution failed: {:?}", e);
        eprintln!("{} {:#}", "Error:".red(), e);
        exit(1);
    }
}
