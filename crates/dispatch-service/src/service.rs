//! Composition root: wires the concrete adapters to the dispatcher, binds
//! the HTTP listener, and runs until a drain-complete shutdown.

use std::sync::Arc;
use std::time::Duration;

use dispatch_core::NonceCache;
use tracing::info;

use crate::adapters::{GitWorktreeManager, HttpCallbackTransport, HttpTokenProvider};
use crate::dispatcher::Dispatcher;
use crate::domain::config::DispatchConfig;
use crate::domain::error::ServiceError;
use crate::router::build_router;

/// Build every collaborator from `config`, serve the HTTP surface, and block
/// until an orderly shutdown (`Ctrl-C` or `/admin/shutdown` followed by the
/// last live task finishing).
pub async fn run(config: DispatchConfig) -> Result<(), ServiceError> {
    config.validate().map_err(ServiceError::Config)?;

    if !config.workspace.base_repository.join(".git").exists() {
        return Err(ServiceError::BaseRepository(format!(
            "{} is not a git repository",
            config.workspace.base_repository.display()
        )));
    }

    let workspace = Arc::new(GitWorktreeManager::new(
        config.workspace.base_repository.clone(),
        config.workspace.worktree_root.clone(),
    ));

    let token_client = reqwest::Client::builder()
        .timeout(config.token_provider.refresh_timeout)
        .build()
        .map_err(|e| ServiceError::Internal(format!("building token-provider HTTP client: {e}")))?;
    let token_provider = Arc::new(HttpTokenProvider::new(
        token_client,
        config.token_provider.endpoint.clone(),
        config.token_provider.safety_margin,
        config.token_provider.refresh_timeout,
    ));

    let callback_client = reqwest::Client::builder()
        .timeout(config.callback.http_timeout)
        .build()
        .map_err(|e| ServiceError::Internal(format!("building callback HTTP client: {e}")))?;
    let callback_transport = Arc::new(HttpCallbackTransport::new(callback_client));

    let dispatcher = Arc::new(Dispatcher::new(&config, workspace, token_provider, callback_transport));
    let nonce_cache = Arc::new(NonceCache::new(300));

    let app = build_router(&config, Arc::clone(&dispatcher), nonce_cache);
    let addr = config.http_addr();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::Bind(e.to_string()))?;
    info!(%addr, "dispatch service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServiceError::Internal(e.to_string()))?;

    dispatcher.begin_draining();
    wait_for_drain(&dispatcher).await;
    info!("all in-flight tasks drained, exiting");

    Ok(())
}

async fn wait_for_drain<W, T, C>(dispatcher: &Dispatcher<W, T, C>)
where
    W: crate::ports::WorkspaceManager + Send + Sync + 'static,
    T: crate::ports::TokenProvider + Send + Sync + 'static,
    C: crate::ports::CallbackTransport + Send + Sync + 'static,
{
    let mut interval = tokio::time::interval(Duration::from_millis(200));
    while !dispatcher.is_drained() {
        interval.tick().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, no longer accepting new connections");
}
