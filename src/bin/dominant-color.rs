use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dominant_color_service::http::{AppState, create_router};
use dominant_color_service::{
    AppConfig, CloudinaryStore, DeletionScheduler, KmeansOptions, TokioClock, UploadService, dominant_color_bytes,
    palette_bytes,
};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Find the dominant color of images, locally or as an upload service.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP upload service
    Serve(ServeArgs),
    /// Print the dominant color of local image files
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Optional TOML config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:5000
    #[arg(short, long)]
    bind: Option<String>,

    /// Seconds to keep uploads in the store before deleting them
    #[arg(long)]
    deletion_delay: Option<u64>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// One or more input image paths
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Also print a palette of this many clusters, largest first
    #[arg(short = 'k', long)]
    palette: Option<usize>,

    /// Seed for palette centroid selection
    #[arg(long, default_value_t = dominant_color_service::quantize::DEFAULT_SEED)]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Inspect(args) => inspect(args),
    }
}

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("invalid log filter")?;
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
    Ok(())
}

async fn serve(args: ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    }
    .with_process_env()?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(delay) = args.deletion_delay {
        config.deletion_delay_secs = delay;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.json_logs |= args.json_logs;

    init_tracing(&config.log_level, config.json_logs)?;
    config.validate().context("invalid configuration")?;

    let store = Arc::new(CloudinaryStore::new(config.cloudinary.clone()).context("building store client")?);
    let scheduler = DeletionScheduler::start(store.clone(), Arc::new(TokioClock), config.scheduler_config());
    let uploads = Arc::new(UploadService::new(store, scheduler.clone(), config.upload_policy()));
    let app = create_router(AppState::new(uploads));

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    let pending = scheduler.pending();
    if pending > 0 {
        tracing::warn!(
            pending,
            delay = ?Duration::from_secs(config.deletion_delay_secs),
            "shutting down with deletions still pending; those assets will remain in the store"
        );
    }
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    for input in &args.inputs {
        let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
        let color = dominant_color_bytes(&bytes).with_context(|| format!("analyzing {}", input.display()))?;
        println!("{}\t{color}", input.display());

        if let Some(k) = args.palette {
            let options = KmeansOptions::new(k).seed(args.seed);
            for cluster in palette_bytes(&bytes, &options)? {
                println!("  {}\t{}", cluster.color, cluster.population);
            }
        }
    }
    Ok(())
}
