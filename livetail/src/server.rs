//! Relay server lifecycle: broker selection, HTTP listener, graceful shutdown

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use livetail_api::{create_router, AppState, SessionConfig};
use livetail_broker::{wait_for_redis, MemoryBroker, RedisSubscriberFactory, SubscriberFactory};
use livetail_core::{auth::JwtService, Config};

/// Upper bound on waiting for open streams to end after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RelayServer {
    config: Config,
    subscribers: Arc<dyn SubscriberFactory>,
    jwt_service: JwtService,
}

impl RelayServer {
    /// Pick the broker (Redis, or in-process when no URL is configured) and
    /// wait for it to answer before accepting requests.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let jwt_service = JwtService::from_config(&config.jwt)?;

        let subscribers: Arc<dyn SubscriberFactory> = if config.is_single_node() {
            warn!("Redis not configured, using in-process broker (single node only)");
            Arc::new(MemoryBroker::new())
        } else {
            let connect_timeout = Duration::from_secs(config.redis.connect_timeout_seconds);
            wait_for_redis(&config.redis.url, connect_timeout, config.redis.init_max_retries).await?;
            Arc::new(RedisSubscriberFactory::new(&config.redis.url)?.with_timeout(connect_timeout))
        };

        Ok(Self {
            config,
            subscribers,
            jwt_service,
        })
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> anyhow::Result<()> {
        let http_address = self.config.http_address();
        let shutdown = CancellationToken::new();

        let state = AppState::new(
            self.subscribers,
            self.jwt_service,
            SessionConfig::from(&self.config.relay),
        )
        .with_shutdown(shutdown.clone());
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let graceful = shutdown.clone().cancelled_owned();
        let mut server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(graceful).await {
                error!("HTTP server error: {}", e);
            }
            info!("HTTP server shut down gracefully");
        });

        tokio::select! {
            _ = &mut server => {
                error!("HTTP server stopped unexpectedly");
                return Err(anyhow::anyhow!("HTTP server stopped unexpectedly"));
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Cancels every open relay session, which ends its response body
        shutdown.cancel();
        if tokio::time::timeout(DRAIN_TIMEOUT, server).await.is_err() {
            warn!(
                "Drain timeout reached after {}s with streams still open, exiting",
                DRAIN_TIMEOUT.as_secs()
            );
        }

        info!("livetail relay shut down complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C signal");
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                info!("Received SIGTERM signal");
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
