use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{api::errors::FlagError, flags::flag_store::FlagStore};

pub type ChangeHandler = Arc<dyn Fn() + Send + Sync>;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Something that announces that flag definitions changed.
///
/// Notifications carry no payload. Delivery is at-least-once: a source that may have
/// missed notifications fires the handler too.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Subscribes `handler` and returns the task driving it.
    ///
    /// Sources that connect to something remote may finish subscribing inside the task,
    /// retrying until they succeed.
    async fn on_change(&self, handler: ChangeHandler) -> Result<JoinHandle<()>, FlagError>;
}

/// Invalidates `store` whenever `source` reports a change.
pub async fn start_change_listener(
    source: &dyn ChangeSource,
    store: Arc<FlagStore>,
) -> Result<JoinHandle<()>, FlagError> {
    let handler: ChangeHandler = Arc::new(move || store.invalidate());
    let handle = source.on_change(handler).await?;
    info!("Flag change listener started");
    Ok(handle)
}

/// Postgres `LISTEN` on a notification channel. Writers `NOTIFY` it after changing flags
/// or overrides.
#[derive(Clone)]
pub struct PgChangeSource {
    pool: PgPool,
    channel: String,
}

impl PgChangeSource {
    pub fn new(pool: PgPool, channel: impl Into<String>) -> Self {
        Self {
            pool,
            channel: channel.into(),
        }
    }
}

impl PgChangeSource {
    // Retries until the channel is subscribed. Returns whether any attempt failed first.
    async fn subscribe(&self) -> (PgListener, bool) {
        let mut failed = false;
        loop {
            let attempt = async {
                let mut listener = PgListener::connect_with(&self.pool).await?;
                listener.listen(&self.channel).await?;
                Ok::<_, sqlx::Error>(listener)
            };
            match attempt.await {
                Ok(listener) => return (listener, failed),
                Err(e) => {
                    error!(channel = %self.channel, error = %e, "Could not subscribe to flag changes, retrying");
                    failed = true;
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChangeSource for PgChangeSource {
    async fn on_change(&self, handler: ChangeHandler) -> Result<JoinHandle<()>, FlagError> {
        let source = self.clone();

        Ok(tokio::spawn(async move {
            let (mut listener, recovered) = source.subscribe().await;
            info!(channel = %source.channel, "Subscribed to flag changes");
            // Changes made while we were not subscribed were never delivered
            if recovered {
                handler();
            }

            loop {
                match listener.try_recv().await {
                    Ok(Some(notification)) => {
                        debug!(channel = notification.channel(), "Received flag change notification");
                        handler();
                    }
                    // The connection dropped. The listener reconnects on the next call, and
                    // anything sent in between is lost.
                    Ok(None) => {
                        warn!(channel = %source.channel, "Flag change listener lost its connection");
                        handler();
                    }
                    Err(e) => {
                        error!(channel = %source.channel, error = %e, "Flag change listener failed, retrying");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                    }
                }
            }
        }))
    }
}

/// In-process change source, for single-node deployments and tests.
pub struct LocalChangeSource {
    sender: broadcast::Sender<()>,
}

impl Default for LocalChangeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalChangeSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    /// Announces a change. Returns how many subscribers will see it.
    pub fn notify(&self) -> usize {
        self.sender.send(()).unwrap_or(0)
    }
}

#[async_trait]
impl ChangeSource for LocalChangeSource {
    async fn on_change(&self, handler: ChangeHandler) -> Result<JoinHandle<()>, FlagError> {
        let mut receiver = self.sender.subscribe();

        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(()) => handler(),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Change listener lagged behind");
                        handler();
                    }
                    Err(RecvError::Closed) => {
                        debug!("Change source closed, stopping listener");
                        break;
                    }
                }
            }
        }))
    }
}
