//! Serving a piped router over TCP with graceful shutdown.

use crate::config::ServerConfig;
use crate::error::{Result, WeaveError};
use crate::router::Router;
use std::future::{Future, IntoFuture};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;

pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
    let addr = config.addr();
    TcpListener::bind(&addr)
        .await
        .map_err(|err| WeaveError::transport(format!("Failed to bind {}: {}", addr, err)))
}

/// Serve `app` until `shutdown` resolves.
///
/// In-flight requests get `grace` to finish once shutdown starts; after that
/// the server stops without waiting for them.
pub async fn serve<F>(listener: TcpListener, app: axum::Router, shutdown: F, grace: Duration) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Listening");
    }

    let (started_tx, started_rx) = oneshot::channel::<()>();
    let signal = async move {
        shutdown.await;
        tracing::info!("Starting graceful shutdown...");
        let _ = started_tx.send(());
    };
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .into_future();
    let deadline = async move {
        match started_rx.await {
            Ok(()) => tokio::time::sleep(grace).await,
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| WeaveError::transport(format!("Server error: {}", err)))?;
            tracing::info!("Graceful shutdown complete");
            Ok(())
        }
        () = deadline => {
            tracing::warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed, dropping open connections");
            Ok(())
        }
    }
}

/// Bind, pipe and serve `router` with the settings of `config`, stopping on
/// Ctrl+C or SIGTERM.
pub async fn run(router: Router, config: &ServerConfig) -> Result<()> {
    let listener = bind(config).await?;
    let app = router.body_limit(config.body_limit).pipe();
    serve(listener, app, shutdown_signal(), config.shutdown_timeout()).await
}

/// Resolves once Ctrl+C or SIGTERM is received.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }
}
