//! Trellis - feature lifecycle engine for optional platform subsystems

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trellis::areas::{mesh_features, serverless_features};
use trellis::cluster::KubeClusterAccess;
use trellis::feature::FeatureSet;
use trellis::target::TargetSpec;

/// Trellis - installs optional platform capability areas into a cluster
#[derive(Parser, Debug)]
#[command(name = "trellis", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply one or more capability areas to the cluster
    ///
    /// Areas run in order (service mesh before serverless, since serving
    /// rides on the mesh). The first failing feature aborts the run; nothing
    /// already applied is rolled back.
    Apply(ApplyArgs),
}

/// Apply mode arguments
#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Path to the target configuration YAML file
    ///
    /// Any omitted field falls back to its default, so an empty file is a
    /// valid baseline configuration.
    #[arg(short = 'f', long = "config")]
    config_file: Option<PathBuf>,

    /// Root directory holding the manifest template tree
    #[arg(long, env = "TRELLIS_MANIFESTS", default_value = "/opt/trellis/manifests")]
    manifests: PathBuf,

    /// Which capability area to apply
    #[arg(long, value_enum, default_value = "all")]
    area: Area,
}

#[derive(Copy, Clone, Debug, PartialEq, ValueEnum)]
enum Area {
    /// Service mesh control plane only
    Mesh,
    /// Serverless runtime only (assumes the mesh is present)
    Serverless,
    /// Both areas in dependency order
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Apply(args) => run_apply(args).await,
    }
}

async fn run_apply(args: ApplyArgs) -> anyhow::Result<()> {
    let target = load_target(args.config_file.as_deref()).await?;
    let target = Arc::new(target);

    let mut sets: Vec<FeatureSet> = Vec::new();
    if matches!(args.area, Area::Mesh | Area::All) {
        sets.push(mesh_features(&target, &args.manifests)?);
    }
    if matches!(args.area, Area::Serverless | Area::All) {
        sets.push(serverless_features(&target, &args.manifests)?);
    }

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;
    let cluster = KubeClusterAccess::new(client);

    // Ctrl-C unwinds in-flight waits; partially applied features stay as-is
    // and a re-run converges them.
    let cancel = CancellationToken::new();
    let signal_guard = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            signal_guard.cancel();
        }
    });

    for mut set in sets {
        set.run(&cluster, &cancel).await?;
    }

    tracing::info!("All requested areas applied");
    Ok(())
}

async fn load_target(path: Option<&std::path::Path>) -> anyhow::Result<TargetSpec> {
    let Some(path) = path else {
        tracing::info!("No config file given, using built-in defaults");
        return Ok(TargetSpec::default());
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
    let target: TargetSpec = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("Failed to parse target configuration: {}", e))?;
    Ok(target)
}
