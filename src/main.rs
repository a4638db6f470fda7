pub mod canvas;
pub mod config;
pub mod data;
pub mod error;
pub mod flowers;
pub mod projection;
pub mod render;
pub mod server;
pub mod types;

use anyhow::{anyhow, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Inputs {
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    config: PathBuf,
    /// Flower table; skips the config file when given
    #[arg(long, value_name = "FILE")]
    flowers: Option<PathBuf>,
    /// State boundaries (.shp or .geojson)
    #[arg(long, value_name = "FILE")]
    boundaries: Option<PathBuf>,
}

impl Inputs {
    fn load(&self, needs_boundaries: bool) -> Result<config::AppConfig> {
        match (&self.flowers, &self.boundaries) {
            (Some(flowers), Some(boundaries)) => Ok(config::AppConfig::default_for(
                flowers.clone(),
                boundaries.clone(),
            )),
            (Some(_), None) if needs_boundaries => {
                Err(anyhow!("--boundaries is required together with --flowers"))
            }
            (Some(flowers), None) => Ok(config::AppConfig::default_for(flowers.clone(), PathBuf::new())),
            (None, Some(_)) => Err(anyhow!("--flowers is required together with --boundaries")),
            (None, None) => config::AppConfig::load_from_file(&self.config),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Join flowers to state boundaries and render the maps
    Render {
        #[command(flatten)]
        inputs: Inputs,
        /// Output directory, overriding the config
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
    /// Look flowers up by state or by common name
    Lookup {
        #[command(flatten)]
        inputs: Inputs,
        #[arg(long, conflicts_with = "common_name")]
        state: Option<String>,
        #[arg(long)]
        common_name: Option<String>,
    },
    /// Serve the rendered maps and a point lookup API
    Serve {
        #[command(flatten)]
        inputs: Inputs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Render { inputs, out } => {
            let mut app_config = inputs.load(true)?;
            if let Some(out) = out {
                app_config.output.dir = out.clone();
            }

            // 1. Load and join data
            let loaded = data::load_data(&app_config)?;

            // 2. Reproject and render
            let report = &loaded.report;
            info!(
                "{} states matched, {} flower rows and {} boundaries left out",
                report.matched,
                report.unmatched_flowers.len(),
                report.unmatched_boundaries.len()
            );
            let written = render::render_maps(&app_config, &loaded.features)?;

            info!("Rendered {} maps into {:?}", written.len(), app_config.output.dir);
        }
        Commands::Lookup { inputs, state, common_name } => {
            let app_config = inputs.load(false)?;
            let input = &app_config.input;
            let table = flowers::load_flowers(
                &input.flowers,
                input.delimiter,
                &input.join_column_flowers,
                &input.common_name_column,
            )?;

            if table.is_empty() {
                warn!("{:?} has no flower rows", input.flowers);
            }

            let rows = match (state, common_name) {
                (Some(state), _) => table.by_state(state),
                (None, Some(name)) => table.by_common_name(name),
                (None, None) => table.records.iter().collect(),
            };

            println!("{}", table.headers.join("\t"));
            for row in &rows {
                let values: Vec<&str> = row.columns.iter().map(|(_, v)| v.as_str()).collect();
                println!("{}", values.join("\t"));
            }
            info!("{} matching rows", rows.len());
        }
        Commands::Serve { inputs } => {
            let app_config = inputs.load(true)?;

            let loaded = data::load_data(&app_config)?;
            server::start_server(app_config, loaded.features, loaded.flowers).await?;
        }
    }

    Ok(())
}
