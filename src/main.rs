use std::process::ExitCode;

use clap::Parser;
use jjm::CommandStatus;
use jjm::cli::Cli;
use jjm::telemetry;

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.global.debug);

    match jjm::run(&cli) {
        Ok(status) => status.into(),
        Err(e) => {
            eprintln!("error: {e:#}");
            CommandStatus::Failed.into()
        }
    }
}
