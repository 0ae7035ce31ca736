//! Trellis CLI
//!
//! Single binary for building, watching and serving a Trellis site.
//!
//! This is the binary entry point. The library functionality is in `lib.rs`.

use std::path::PathBuf;

use clap::Parser;
use color_eyre::eyre::Result;

/// Command-line interface for Trellis.
#[derive(Parser)]
#[command(
    name = "trellis",
    version,
    about = "An incremental static content build engine"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "trellis.toml")]
    config: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(clap::Subcommand)]
enum Commands {
    /// Render every page to the destination directory
    Build {
        /// Override the destination directory
        #[arg(short, long)]
        dest: Option<PathBuf>,
        /// Keep running and apply changes incrementally
        #[arg(short, long)]
        watch: bool,
    },
    /// Build, then rebuild incrementally on every source change
    Watch,
    /// Start the development server with on-demand rendering and live reload
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
        /// Open browser automatically
        #[arg(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    trellis::init_tracing(cli.verbose);

    match cli.command {
        Commands::Build { dest, watch } => {
            let builder = trellis::cmd::build::run(&cli.config, dest.as_deref())?;
            if watch || builder.config().watch {
                trellis::cmd::watch::follow(builder).await?;
            }
        }
        Commands::Watch => {
            trellis::cmd::watch::run(&cli.config).await?;
        }
        Commands::Serve { port, open } => {
            trellis::cmd::serve::run(&cli.config, port, open).await?;
        }
    }

    Ok(())
}
