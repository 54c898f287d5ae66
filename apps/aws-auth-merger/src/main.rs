//! aws-auth-merger: keeps `kube-system/aws-auth` in sync with the aws-auth
//! source ConfigMaps of a namespace.

use std::sync::Arc;

use authmerge_controller::{
    ChangeNotifier, ControllerError, ControllerResult, KubeConfigMapStore, Reconciler,
};
use clap::Parser;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod cli;
mod logging;

use cli::Cli;

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init_logging(&cli.loglevel, cli.log_format);

    if let Err(e) = run(cli).await {
        error!(error = %e, "aws-auth-merger stopped");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> ControllerResult<()> {
    let config = cli.merger_config();
    config.validate()?;

    let client = kube_client(&cli).await?;
    info!("Successfully created Kubernetes API client");

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let store = Arc::new(KubeConfigMapStore::new(client.clone()));
    let reconciler = Reconciler::new(store, config.clone());
    reconciler.bootstrap().await?;

    let mut notifier = ChangeNotifier::start(client, &config, shutdown.child_token()).await?;

    let result = reconciler
        .run_event_loop(notifier.events_mut(), shutdown.clone())
        .await;
    notifier.shutdown().await;
    result
}

/// Build a client from `--kubeconfig` when given, else from the in-cluster
/// ServiceAccount.
async fn kube_client(cli: &Cli) -> ControllerResult<Client> {
    let config = match cli.kubeconfig_path() {
        Some(path) => {
            info!(kubeconfig = %path.display(), "Sourcing credentials from kubeconfig");
            let kubeconfig = Kubeconfig::read_from(&path)
                .map_err(|e| ControllerError::Kubeconfig(e.to_string()))?;
            let options = KubeConfigOptions {
                context: cli.context.clone(),
                ..KubeConfigOptions::default()
            };
            kube::Config::from_custom_kubeconfig(kubeconfig, &options)
                .await
                .map_err(|e| ControllerError::Kubeconfig(e.to_string()))?
        }
        None => {
            info!("Sourcing credentials from the ServiceAccount (in-cluster mode)");
            kube::Config::incluster().map_err(|e| ControllerError::Kubeconfig(e.to_string()))?
        }
    };

    Client::try_from(config).map_err(|e| ControllerError::Kubeconfig(e.to_string()))
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
    shutdown.cancel();
}
