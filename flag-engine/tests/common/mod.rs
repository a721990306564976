use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Notify;

use flag_engine::config::DEFAULT_TEST_CONFIG;
use flag_engine::flags::flag_service::FlagService;
use flag_engine::flags::flag_store::FlagStore;
use flag_engine::server::serve_service;
use flag_engine::test_utils::MockFlagRepository;

pub struct ServerHandle {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
}

impl ServerHandle {
    /// Serves flags backed by an in-memory repository.
    pub async fn for_repository(repository: Arc<MockFlagRepository>) -> ServerHandle {
        let config = DEFAULT_TEST_CONFIG.clone();
        let store = Arc::new(FlagStore::new(
            repository.clone(),
            config.flag_cache_ttl(),
        ));
        let flag_service = Arc::new(FlagService::new(store, repository));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let notify = Arc::new(Notify::new());
        let shutdown = notify.clone();

        tokio::spawn(async move {
            serve_service(flag_service, config, listener, async move {
                notify.notified().await
            })
            .await
        });
        ServerHandle { addr, shutdown }
    }

    pub async fn get(&self, path_and_query: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("http://{:?}{}", self.addr, path_and_query))
            .send()
            .await
            .expect("failed to send request")
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one()
    }
}
