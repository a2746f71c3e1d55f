use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use carpark::api::{self, AppState};
use carpark::config::Config;
use carpark::engine::Engine;
use carpark::notifier::LogNotifier;
use carpark::notify::NotifyHub;
use carpark::reaper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    carpark::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(NotifyHub::new()))?);

    tokio::spawn(reaper::run_compactor(engine.clone(), config.compact_threshold));
    if let Some(every) = config.reaper_interval {
        tokio::spawn(reaper::run_reaper(engine.clone(), every));
    }

    let state = Arc::new(AppState {
        engine,
        notifier: Arc::new(LogNotifier),
    });
    let app = api::router(state);

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("carpark listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!(
        "  reaper: {}",
        config
            .reaper_interval
            .map_or("disabled".to_string(), |d| format!("every {}s", d.as_secs()))
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("carpark stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM; in-flight requests are drained by axum.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    ctrl_c.await;
    info!("shutdown signal received");
}
