use clap::Parser;
use kube_mirror_agent::config::{Cli, Config, LogFormat, LoggingConfig};
use kube_mirror_agent::{Error, Result, agent, kubernetes};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    setup_subscriber(&cfg.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "starting kube-mirror"
    );

    let client = kubernetes::cluster::client(&cfg.kubernetes, &cfg.resources.watch_config).await?;

    let cancel = CancellationToken::new();
    let mut agent_handle = tokio::spawn(agent::run(cfg, client, cancel.child_token()));
    let mut shutdown_handle = tokio::spawn(shutdown_signal());

    tokio::select! {
        joined = &mut agent_handle => {
            joined.map_err(|e| Error::Task(e.to_string()))??;
        }
        _ = &mut shutdown_handle => {
            cancel.cancel();
            match agent_handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "agent exited with error during shutdown"),
                Err(e) => error!(error = %e, "agent task failed to complete"),
            }
        }
    }

    info!("Exiting...");
    Ok(())
}

fn setup_subscriber(cfg: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| cfg.level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    match cfg.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {
            info!("captured ctrl_c signal");
        },
        _ = terminate => {
            info!("captured terminate signal");
        },
    }
}
