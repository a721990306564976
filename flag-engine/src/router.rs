use std::sync::Arc;

use axum::{
    extract::State as AxumState,
    http::{Method, StatusCode},
    routing::get,
    Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

use crate::{
    api::endpoint, config::Config, flags::flag_service::FlagService,
    metrics_utils::setup_metrics_routes,
};

#[derive(Clone)]
pub struct State {
    pub flag_service: Arc<FlagService>,
    pub config: Config,
}

pub fn router(flag_service: Arc<FlagService>, config: Config) -> Router {
    let state = State {
        flag_service,
        config: config.clone(),
    };

    // Flags are read from browsers on arbitrary origins
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS, Method::HEAD])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
        .allow_origin(AllowOrigin::mirror_request());

    let status_router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(readiness))
        .route("/_liveness", get(liveness));

    let flags_router = Router::new()
        .route("/flags", get(endpoint::flags))
        .route("/flags/", get(endpoint::flags))
        .route("/flags/:key", get(endpoint::flag))
        .layer(ConcurrencyLimitLayer::new(config.max_concurrency));

    let router = Router::new()
        .merge(status_router)
        .merge(flags_router)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    // Global metrics recorders can play poorly with e.g. tests, so only install when asked
    if !config.enable_metrics {
        return router;
    }
    match setup_metrics_routes(router.clone()) {
        Ok(router) => router,
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, serving without /metrics");
            router
        }
    }
}

pub async fn index() -> &'static str {
    "flag engine"
}

async fn liveness() -> &'static str {
    "ok"
}

// Ready once flag definitions can be served, from the database or a cached snapshot
async fn readiness(AxumState(state): AxumState<State>) -> Result<&'static str, StatusCode> {
    match state.flag_service.store().load().await {
        Ok(_) => Ok("ready"),
        Err(e) => {
            error!(error = %e, "Readiness check failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
