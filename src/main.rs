use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use roadcrew::artifact::local_hostname;
use roadcrew::configuration::{CliArgs, Config};
use roadcrew::error_handling::policy::Classified;
use roadcrew::error_handling::types::{PipelineError, PreflightError};
use roadcrew::pipeline::{Coordinator, PipelineStats};
use roadcrew::preflight::run_preflight_checks;
use roadcrew::upload::{ObjectStore, S3ObjectStore};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Info unless RUST_LOG says otherwise
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let args = CliArgs::parse();

    match run(args).await {
        Ok(stats) => info!("Exiting: {}", stats),
        Err(e) => {
            error!("Fatal {:?} error: {}, exiting...", e.kind(), e);
            std::process::exit(1);
        }
    }
}

async fn run(args: CliArgs) -> Result<PipelineStats, PipelineError> {
    let config = Config::load(&args).and_then(Config::validate)?;
    info!(
        "Configuration loaded: bucket {} ({}), interval {:?}, tmp dir {}",
        config.store.bucket,
        config.store.region,
        config.capture_interval,
        config.tmp_dir.display()
    );

    let hostname = local_hostname().map_err(PreflightError::HostnameUnavailable)?;

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&config.store));

    if args.skip_preflight {
        warn!("Skipping preflight checks");
    } else {
        run_preflight_checks(&config, store.as_ref()).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received interrupt, finishing current capture");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => error!("Unable to listen for interrupt: {}", e),
        }
    });

    Coordinator::new(&config, store, hostname, shutdown_rx).run().await
}
