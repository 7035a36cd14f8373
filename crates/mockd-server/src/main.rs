//! The mockd server binary
//!
//! Command-line parsing lives in the external CLI; this binary only reads
//! the `MOCKD_*` environment (notably `MOCKD_CONFIG`) and runs the engine
//! until SIGINT/SIGTERM.

use mockd_core::MockdConfig;
use mockd_server::Engine;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("MOCKD_CONFIG") {
        Ok(path) => MockdConfig::from_file(&path).await?,
        Err(_) => MockdConfig::default(),
    };

    let mut engine = Engine::start(config).await?;
    info!("mockd running; press ctrl-c to stop");

    shutdown_signal().await;
    engine.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
