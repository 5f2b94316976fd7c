use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::capture::{
    self, FirmwareArgs, FirmwareConfig, TelemetryOptions,
    config::{ClassifierArgs, TelemetryArgs},
    telemetry,
};

/// Zenith Go: press a button, photograph the scene, ask a vision model whether
/// it shows a hazard, and upload the photo and verdict over FTP.
#[derive(Debug, Parser)]
#[command(name = "zenith-go", version, about)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Wait for button presses and run one capture session per press (default mode).
    Run(FirmwareArgs),
    /// Run a single capture session immediately and print its report as JSON.
    Once(FirmwareArgs),
    /// Classify an existing image and print the verdict as JSON.
    Classify {
        /// JPEG file to classify.
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
        #[command(flatten)]
        classifier: ClassifierArgs,
        #[command(flatten)]
        telemetry: TelemetryArgs,
    },
}

pub fn handle_commands(cli: CliArgs) -> Result<()> {
    match cli.command {
        Command::Run(args) => {
            let config = FirmwareConfig::try_from(args)?;
            let _telemetry = telemetry::enter_runtime(&config.telemetry);
            capture::run(config)
        }
        Command::Once(args) => {
            let config = FirmwareConfig::try_from(args)?;
            let _telemetry = telemetry::enter_runtime(&config.telemetry);
            let report = capture::run_once(config)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Classify {
            image,
            classifier,
            telemetry: telemetry_args,
        } => {
            let options = TelemetryOptions::from(telemetry_args);
            let _telemetry = telemetry::enter_runtime(&options);
            let verdict = capture::classify_file(classifier.try_into()?, &image)?;
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
    }
}
