//! Layerprobe CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use layerprobe::{ConnectionOptions, Engine, Exporter, Resolver, Result};

#[derive(Parser)]
#[command(name = "layerprobe", version, about = "Export container images and locate package directories")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an image against the engine, pulling it if missing
    Resolve {
        /// Image reference (e.g., debian:bookworm)
        image: String,
    },
    /// Export an image and reconstruct its layered filesystem
    Export {
        /// Image reference
        image: String,
    },
    /// Export an image and list candidate package directories
    Scan {
        /// Image reference
        image: String,
    },
    /// Remove an image from the engine
    Remove {
        /// Image reference
        image: String,
        /// Force removal even when tagged in multiple repositories
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let engine = Engine::connect(&ConnectionOptions::from_env()).await?;

    match cli.command {
        Command::Resolve { image } => {
            let resolution = Resolver::new(&engine).resolve(&image).await?;
            println!("{}", serde_json::to_string_pretty(&resolution.inspect)?);
        }
        Command::Export { image } => {
            let result = Exporter::new(&engine).export(&image).await?;
            let summary = serde_json::json!({
                "allLayersDir": result.all_layers_dir,
                "explodedDir": result.exploded_dir,
                "layers": result.manifest.layers,
                "workingDir": result.last_layer_config.working_dir(),
                "pkgPaths": result.pkg_paths,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Scan { image } => {
            let result = Exporter::new(&engine).export(&image).await?;
            for path in &result.pkg_paths {
                println!("{}", path.display());
            }
        }
        Command::Remove { image, force } => {
            let deleted = engine.remove_image(&image, force).await?;
            for item in deleted {
                if let Some(untagged) = item.untagged {
                    println!("Untagged: {untagged}");
                }
                if let Some(removed) = item.deleted {
                    println!("Deleted: {removed}");
                }
            }
        }
    }

    Ok(())
}
