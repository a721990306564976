use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::database::{FlagRepository, PgFlagRepository};
use crate::flags::change_listener::{start_change_listener, PgChangeSource};
use crate::flags::flag_service::FlagService;
use crate::flags::flag_store::FlagStore;
use crate::router;

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let repository = match PgFlagRepository::from_config(&config) {
        Ok(repository) => Arc::new(repository),
        Err(e) => {
            tracing::error!("Failed to create database pool: {}", e);
            return;
        }
    };
    let pool = repository.pool().clone();
    let repository: Arc<dyn FlagRepository> = repository;

    let store = Arc::new(FlagStore::new(repository.clone(), config.flag_cache_ttl()));

    // Without the listener, changes still show up once the cache TTL runs out
    if *config.change_listener_enabled {
        let source = PgChangeSource::new(pool, config.change_channel.clone());
        match start_change_listener(&source, store.clone()).await {
            Ok(_) => {}
            Err(e) => tracing::warn!(
                "Failed to start flag change listener on channel {}: {}",
                config.change_channel,
                e
            ),
        }
    }

    let flag_service = Arc::new(FlagService::new(store, repository));
    serve_service(flag_service, config, listener, shutdown).await
}

/// Serves an already assembled flag service.
pub async fn serve_service<F>(
    flag_service: Arc<FlagService>,
    config: Config,
    listener: TcpListener,
    shutdown: F,
) where
    F: Future<Output = ()> + Send + 'static,
{
    let app = router::router(flag_service, config);

    match listener.local_addr() {
        Ok(addr) => tracing::info!("listening on {:?}", addr),
        Err(e) => tracing::warn!("listening on unknown address: {}", e),
    }

    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    {
        tracing::error!("Server error: {}", e);
    }
}
