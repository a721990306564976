use std::time::Duration;

use envconfig::Envconfig;
use opentelemetry::trace::TraceError;
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{Sampler, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use tokio::signal::unix::{signal, SignalKind};
use tracing::level_filters::LevelFilter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use flag_engine::config::Config;
use flag_engine::server::serve;

async fn shutdown() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler unavailable: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = terminate => {},
        _ = tokio::signal::ctrl_c() => {},
    };

    tracing::info!("Shutting down flag engine");
}

fn otlp_tracer(config: &Config, endpoint: &str) -> Result<Tracer, TraceError> {
    let sampler = Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(
        config.otel_sampling_rate,
    )));
    let resource = Resource::new(vec![KeyValue::new(
        "service.name",
        config.otel_service_name.clone(),
    )]);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(sampler)
                .with_resource(resource),
        )
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint)
                .with_timeout(Duration::from_secs(config.otel_export_timeout_secs)),
        )
        .install_batch(runtime::Tokio)
}

// JSON on stdout, or pretty output with span timings under DEBUG. Spans are exported
// over OTLP only when OTEL_URL is set.
fn init_tracing(config: &Config) {
    let stdout = if *config.debug {
        fmt::layer()
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    } else {
        fmt::layer()
            .json()
            .with_filter(EnvFilter::from_default_env())
            .boxed()
    };

    let (tracer, otel_error) = match config.otel_url.as_deref().map(|url| otlp_tracer(config, url)) {
        Some(Ok(tracer)) => (Some(tracer), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };
    let otel = tracer.map(|tracer| {
        OpenTelemetryLayer::new(tracer).with_filter(LevelFilter::from_level(config.otel_log_level))
    });

    tracing_subscriber::registry().with(stdout).with(otel).init();

    if let Some(e) = otel_error {
        tracing::warn!("OpenTelemetry export disabled: {}", e);
    }
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("Invalid configuration:");
    init_tracing(&config);

    tracing::info!(
        environment = %config.environment,
        cache_ttl_ms = config.flag_cache_ttl_ms,
        change_listener = *config.change_listener_enabled,
        "Starting flag engine"
    );

    let listener = tokio::net::TcpListener::bind(config.address)
        .await
        .expect("could not bind port");
    serve(config, listener, shutdown()).await;
}
