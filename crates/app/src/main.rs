mod scenario;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use fbt_pipeline_core::{
    AvatarDescription, CalibrationData, CalibrationSlot, PipelineConfig, TrackedRole,
};
use tracing_subscriber::EnvFilter;

use crate::scenario::Scenario;

fn main() -> fbt_pipeline_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            scenario,
            avatar,
            settings,
            calibration,
            auto_calibrate,
            output,
        } => {
            let config = PipelineConfig {
                settings_path: settings.map(|path| path.display().to_string()),
                calibration_path: calibration.map(|path| path.display().to_string()),
            };
            run_simulate(&scenario, avatar.as_deref(), config, auto_calibrate, output.as_deref())
        }
        Commands::Inspect { calibration } => run_inspect(&calibration),
    }
}

fn run_simulate(
    path: &Path,
    avatar: Option<&Path>,
    config: PipelineConfig,
    auto_calibrate: bool,
    output: Option<&Path>,
) -> fbt_pipeline_core::Result<()> {
    tracing::info!(?path, "running scenario");

    let mut scenario: Scenario = serde_json::from_str(&fs::read_to_string(path)?)?;
    if let Some(avatar) = avatar {
        scenario.avatar = Some(AvatarDescription::from_json(&fs::read_to_string(avatar)?)?);
    }

    let reports = scenario::run(scenario, config, auto_calibrate)?;
    let json = serde_json::to_string_pretty(&reports)?;

    match output {
        Some(output) => {
            fs::write(output, json)?;
            tracing::info!(?output, frames = reports.len(), "wrote frame reports");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn run_inspect(path: &Path) -> fbt_pipeline_core::Result<()> {
    let data = CalibrationData::load(path)?;

    println!("automatic (calibrated: {})", data.automatic.is_calibrated);
    print_slots(|role| data.automatic.slot(role));

    let mut avatars: Vec<_> = data.manual.keys().collect();
    avatars.sort();
    for avatar in avatars {
        if let Some(entry) = data.manual(avatar) {
            println!("manual {avatar} (calibrated: {})", entry.is_calibrated);
            print_slots(|role| entry.slot(role));
        }
    }
    Ok(())
}

fn print_slots(slot: impl Fn(TrackedRole) -> CalibrationSlot) {
    for role in TrackedRole::FULL_BODY {
        match slot(role) {
            CalibrationSlot::Uncalibrated => println!("  {role}: uncalibrated"),
            CalibrationSlot::Identity => println!("  {role}: identity"),
            CalibrationSlot::Offset { pose } => println!(
                "  {role}: position {:?} rotation {:?}",
                pose.position, pose.rotation
            ),
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Full-body tracking pipeline driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a scripted device scenario and print the per-frame solver state.
    Simulate {
        /// Scenario file with devices, frames and actions.
        scenario: PathBuf,
        /// Avatar description to spawn instead of the scenario's own.
        #[arg(short, long)]
        avatar: Option<PathBuf>,
        /// Settings file, created on first save.
        #[arg(short, long)]
        settings: Option<PathBuf>,
        /// Calibration file, created on first save.
        #[arg(short, long)]
        calibration: Option<PathBuf>,
        /// Run automatic calibration after the first tick.
        #[arg(long)]
        auto_calibrate: bool,
        /// Write the frame reports here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the slots stored in a calibration file.
    Inspect {
        /// Path to the calibration file.
        calibration: PathBuf,
    },
}
