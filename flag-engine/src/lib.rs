pub mod api;
pub mod config;
pub mod database;
pub mod flags;
pub mod metrics_consts;
pub mod metrics_utils;
pub mod router;
pub mod server;

// Test-support code is public so the integration tests under tests/ can use it
pub mod test_utils;
