//! # Bundle Controller
//!
//! Kubernetes controller that installs `Bundle` resources (helm charts,
//! kustomizations and plain manifests) and keeps the cluster converged.
//!
//! ## Usage
//!
//! ```bash
//! # Run the controller (default)
//! bundle-controller run
//!
//! # Fetch bundles into a cache directory
//! bundle-controller -c ./cache download bundles.yaml
//!
//! # Render bundles to stdout
//! bundle-controller template bundles.yaml
//!
//! # Print the CRD
//! bundle-controller crdgen | kubectl apply -f -
//! ```

use anyhow::Result;
use bundle_controller::cli;
use bundle_controller::config::ControllerConfig;
use bundle_controller::controller::artifact::SourceResolver;
use bundle_controller::controller::render::Renderers;
use bundle_controller::crd::crd_yaml;
use bundle_controller::runtime::initialization::{initialize, init_logging, install_crypto_provider};
use bundle_controller::runtime::watch_loop::run_watch_loop;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "bundle-controller", version, about = "Bundle Controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Cache directory for downloaded bundles
    #[arg(short, long, global = true, env = "CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Directory searched for `<name>-<version>` before downloading (repeatable)
    #[arg(short = 's', long = "search-dir", global = true)]
    search_dirs: Vec<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller
    Run,
    /// Download bundles into the cache
    Download {
        /// Bundle manifests or directories, `-` for stdin
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Render bundles to stdout
    Template {
        /// Bundle manifests or directories, `-` for stdin
        #[arg(required = true)]
        files: Vec<String>,
    },
    /// Print the Bundle CustomResourceDefinition
    Crdgen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Before anything opens a TLS connection
    install_crypto_provider();

    let mut config = ControllerConfig::from_env();
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    if !args.search_dirs.is_empty() {
        config.search_dirs = args.search_dirs;
    }
    init_logging(&config)?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            let init = initialize(config).await?;
            run_watch_loop(init.client, init.reconciler, init.server_state).await
        }
        Commands::Download { files } => {
            let bundles = cli::load_bundles(&files)?;
            let resolver = resolver(&config)?;
            for resolved in cli::download(&resolver, &bundles).await? {
                println!("{}", resolved.path.display());
            }
            Ok(())
        }
        Commands::Template { files } => {
            let bundles = cli::load_bundles(&files)?;
            let resolver = resolver(&config)?;
            let renderers = Renderers::from_config(&config);
            print!("{}", cli::template(&resolver, &renderers, &bundles).await?);
            Ok(())
        }
        Commands::Crdgen => {
            print!("{}", crd_yaml()?);
            Ok(())
        }
    }
}

fn resolver(config: &ControllerConfig) -> Result<SourceResolver> {
    SourceResolver::new(
        config.cache_dir.clone(),
        config.search_dirs.clone(),
        config.git_bin.clone(),
    )
}
