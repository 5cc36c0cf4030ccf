//! Paleogeo CLI
//!
//! Georeference scanned map rasters into tiled GeoTIFFs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paleogeo::config::SAMPLE_CONFIG;
use paleogeo::{build_runtime, init_rayon, read_geotiff, run_batch, CancellationFlag, Config, ItemOutcome};

#[derive(Parser)]
#[command(name = "paleogeo")]
#[command(about = "Georeference map rasters into tiled GeoTIFFs", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// Override concurrency level
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Georeference the configured inputs (default if no command specified)
    Run {
        /// Input files, replacing the configured inputs
        inputs: Vec<PathBuf>,
    },

    /// Validate configuration
    Validate,

    /// Generate a sample configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Print the georeferencing of a written GeoTIFF
    Inspect {
        /// GeoTIFF to inspect
        path: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        None => run_command(cli.config, cli.concurrency, Vec::new()),

        Some(Commands::Run { inputs }) => run_command(cli.config, cli.concurrency, inputs),

        Some(Commands::Validate) => {
            validate_command(cli.config)?;
            Ok(ExitCode::SUCCESS)
        }

        Some(Commands::GenerateConfig { output }) => {
            generate_config_command(output)?;
            Ok(ExitCode::SUCCESS)
        }

        Some(Commands::Inspect { path }) => {
            inspect_command(path)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_command(config_path: PathBuf, concurrency: Option<usize>, inputs: Vec<PathBuf>) -> Result<ExitCode> {
    let mut config = Config::from_file(&config_path)?;

    // Apply overrides
    if let Some(c) = concurrency {
        config.processing.concurrency = c;
    }
    if !inputs.is_empty() {
        config.input.paths = inputs;
        config.input.directory = None;
    }

    config.validate()?;

    // Initialize Rayon
    init_rayon(config.processing.rayon_threads)?;

    // Build and run Tokio runtime
    let runtime = build_runtime(config.processing.worker_threads)?;
    let report = runtime.block_on(async {
        let cancel = CancellationFlag::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight files");
                on_signal.cancel();
            }
        });
        run_batch(config, cancel).await
    })?;

    println!("\n=== Georeferencing Summary ===");
    println!("{}", report);
    for item in report.failures() {
        if let ItemOutcome::Failed { kind, message } = &item.outcome {
            println!("  FAILED {} [{}]: {}", item.input.display(), kind, message);
        }
    }
    println!("==============================\n");

    if report.has_failures() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn validate_command(config_path: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    config.validate()?;
    let inputs = config.input_files()?;
    println!("Configuration is valid ({} inputs)", inputs.len());
    Ok(())
}

fn generate_config_command(output: PathBuf) -> Result<()> {
    std::fs::write(&output, SAMPLE_CONFIG)?;
    println!("Generated sample configuration at: {}", output.display());
    Ok(())
}

fn inspect_command(path: PathBuf) -> Result<()> {
    let raster = read_geotiff(&path)?;
    let (xmin, xmax, ymin, ymax) = raster.bounds();
    let t = &raster.transform;

    println!("\n=== {} ===", path.display());
    println!("Size: {}x{} pixels", raster.data.width(), raster.data.height());
    println!("Bands: {} ({}-bit)", raster.data.bands(), raster.data.bits_per_sample());
    println!("CRS: {} ({})", raster.crs, raster.crs.citation());
    println!(
        "Transform: x = {} + {}*col + {}*row, y = {} + {}*col + {}*row",
        t.a, t.b, t.c, t.d, t.e, t.f
    );
    match raster.data.nodata() {
        Some(nodata) => println!("Nodata: {}", nodata),
        None => println!("Nodata: none"),
    }
    println!(
        "Bounds: [{:.6}, {:.6}, {:.6}, {:.6}]",
        xmin, ymin, xmax, ymax
    );
    println!();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_default() {
        // No subcommand - should default to Run
        let cli = Cli::try_parse_from(["paleogeo"]);
        assert!(cli.is_ok());
        assert!(cli.unwrap().command.is_none());
    }

    #[test]
    fn test_cli_parse_run_with_inputs() {
        let cli = Cli::try_parse_from(["paleogeo", "run", "a.jpg", "b.jpg", "--concurrency", "2"]).unwrap();
        assert_eq!(cli.concurrency, Some(2));
        match cli.command {
            Some(Commands::Run { inputs }) => assert_eq!(inputs.len(), 2),
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_parse_validate() {
        let cli = Cli::try_parse_from(["paleogeo", "validate", "-c", "test.json"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("test.json"));
    }

    #[test]
    fn test_cli_parse_inspect_requires_path() {
        assert!(Cli::try_parse_from(["paleogeo", "inspect"]).is_err());
        assert!(Cli::try_parse_from(["paleogeo", "inspect", "out.tif"]).is_ok());
    }
}
