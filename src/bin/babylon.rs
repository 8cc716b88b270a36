//! Process entry point: wires configuration, the orchestrator client, the
//! observability stack, and the controller loop together, mirroring
//! `original_source/main.go`'s `Setup`/bootstrap sequence and the
//! teacher's own `kube::Client::try_default()` usage in `src/bin/irt.rs`.
use std::sync::Arc;

use babylon::cleanup_judge::CleanUpJudge;
use babylon::executioner::Executioner;
use babylon::failure_judge::FailureJudge;
use babylon::flags::StaticFlags;
use babylon::history::InMemoryHistory;
use babylon::metrics::Metrics;
use babylon::orchestrator::{DryRunClient, KubeClient};
use babylon::{controller::Controller, Config};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(armed = config.armed, cluster = %config.cluster, "starting babylon");

    let client = KubeClient::try_default().await?;
    let metrics = Arc::new(Metrics::new());
    let history = Arc::new(InMemoryHistory::new());
    let mut enabled_flags = Vec::new();
    if config.babylon_alerts {
        enabled_flags.push(babylon::channel::BABYLON_ALERTS_FLAG.to_string());
    }
    let flags = Arc::new(StaticFlags::new(enabled_flags));

    let failure_judge = FailureJudge::new(&config, metrics.clone(), history.clone(), flags.clone());
    let cleanup_judge = CleanUpJudge::new(Arc::new(config.clone()));
    let executioner = Executioner::new(&config, metrics.clone(), history, flags)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown.cancel();
    });

    let http_cancel = cancel.clone();
    let http_metrics = metrics.clone();
    let port = config.port.clone();
    let http_server = tokio::spawn(async move {
        if let Err(e) = babylon::http::serve(&port, http_metrics, http_cancel).await {
            tracing::error!("http server exited: {e}");
        }
    });

    if config.armed {
        let controller = Arc::new(Controller::new(client, &config, failure_judge, cleanup_judge, executioner));
        controller.run(cancel).await;
    } else {
        let controller = Arc::new(Controller::new(
            DryRunClient::new(client),
            &config,
            failure_judge,
            cleanup_judge,
            executioner,
        ));
        controller.run(cancel).await;
    }

    let _ = http_server.await;
    Ok(())
}
