use crate::cache::{CoordinatedCache, InMemoryStore, KvStore, RedisStore};
use crate::config::Config;
use crate::github::GitHubClient;
use crate::state::AppState;
use crate::utils::fmt_duration;
use crate::web::create_router;
use anyhow::Context;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
}

impl App {
    /// Connect to the store and build shared state.
    ///
    /// The store connection is opened exactly once here and owned by the
    /// state; it is released in [`App::run`] after the server has drained.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let store: Arc<dyn KvStore> = match config.redis_url.as_deref() {
            Some(url) => Arc::new(
                RedisStore::connect(url)
                    .await
                    .context("Failed to connect to Redis")?,
            ),
            None => {
                warn!(
                    "REDIS_URL not set; using a process-local store, so concurrent misses are only coordinated within this process"
                );
                Arc::new(InMemoryStore::new())
            }
        };

        let lock_options = config.lock_options();
        if lock_options.poll_interval >= lock_options.lease {
            warn!(
                lease = fmt_duration(lock_options.lease),
                poll_interval = fmt_duration(lock_options.poll_interval),
                "cache poll interval is not shorter than the lock lease; followers will poll at most once per lease"
            );
        }

        let github = GitHubClient::new(
            config.github_api_url.clone(),
            config.github_token.as_deref(),
            config.github_rate_limit,
        )
        .context("Failed to create GitHub client")?;

        info!(
            store = store.backend(),
            ttl = fmt_duration(config.cache_ttl()),
            lease = fmt_duration(lock_options.lease),
            poll_interval = fmt_duration(lock_options.poll_interval),
            max_wait = ?lock_options.max_wait,
            github_rate_limit = config.github_rate_limit.get(),
            authenticated = config.github_token.is_some(),
            "cache and upstream configured"
        );

        let cache = CoordinatedCache::with_options(store, lock_options);
        let app_state = AppState::new(cache, Arc::new(github), config.cache_ttl());

        Ok(App { config, app_state })
    }

    /// Serve until a shutdown signal arrives, then drain and release the store.
    pub async fn run(self) -> ExitCode {
        let App { config, app_state } = self;
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = ?e, %addr, "failed to bind");
                return ExitCode::FAILURE;
            }
        };
        info!(%addr, "web server listening");

        let router = create_router(app_state.clone());
        let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = drain_rx.await;
                })
                .await
        });

        shutdown_signal().await;
        info!(
            timeout = fmt_duration(config.shutdown_timeout),
            "shutdown signal received, draining connections"
        );
        let _ = drain_tx.send(());

        let code = if drain(server, config.shutdown_timeout).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };

        let store = app_state.cache.store().clone();
        drop(app_state);
        // Connection tasks spawned by the server may outlive it and keep their own clones.
        if Arc::strong_count(&store) == 1 {
            let backend = store.backend();
            drop(store);
            info!(store = backend, "store connection released");
        } else {
            warn!(
                store = store.backend(),
                holders = Arc::strong_count(&store) - 1,
                "store still referenced by abandoned connections; it closes at exit"
            );
        }
        code
    }
}

/// Wait up to `timeout` for the server task to finish, aborting it if it
/// does not. Returns `true` only for a clean stop.
///
/// On return the task has ended and dropped everything it owned.
async fn drain(mut server: JoinHandle<std::io::Result<()>>, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, &mut server).await {
        Ok(Ok(Ok(()))) => {
            info!("web server stopped");
            true
        }
        Ok(Ok(Err(e))) => {
            error!(error = ?e, "web server failed");
            false
        }
        Ok(Err(e)) => {
            error!(error = ?e, "web server task panicked");
            false
        }
        Err(_) => {
            warn!("graceful shutdown timed out, aborting open connections");
            server.abort();
            if let Err(e) = server.await
                && !e.is_cancelled()
            {
                error!(error = ?e, "web server task panicked while aborting");
            }
            false
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = ?e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = ?e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drain_reports_a_clean_stop() {
        let server = tokio::spawn(async { Ok(()) });
        assert!(drain(server, Duration::from_secs(1)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_aborts_a_server_that_outlives_the_timeout() {
        let state = Arc::new(());
        let held = state.clone();
        let server = tokio::spawn(async move {
            let _held = held;
            std::future::pending::<std::io::Result<()>>().await
        });

        assert!(!drain(server, Duration::from_secs(1)).await);
        assert_eq!(Arc::strong_count(&state), 1, "aborted task still holds state");
    }
}
