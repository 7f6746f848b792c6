use anyhow::Context;
use colored::Colorize;
use gantry::RunStatus;
use std::process::ExitCode;

fn main() -> ExitCode {
    match gantry::run().context("gantry command failed") {
        Ok(RunStatus::Success) => ExitCode::SUCCESS,
        Ok(RunStatus::Rejected) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {:#}", "error:".bright_red().bold(), e);
            ExitCode::from(2)
        }
    }
}
