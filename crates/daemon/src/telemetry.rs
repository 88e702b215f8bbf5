//! OpenTelemetry export, compiled in with the `telemetry` feature
//!
//! # Environment Variables
//!
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g. http://localhost:4318)
//! - `OTEL_SERVICE_NAME`: service name (default: ticketline)

use anyhow::Result;

/// Subscriber the telemetry layer sits on
#[cfg(feature = "telemetry")]
type Base = tracing_subscriber::layer::Layered<tracing_subscriber::EnvFilter, tracing_subscriber::Registry>;

#[cfg(feature = "telemetry")]
pub type TelemetryLayer =
    tracing_opentelemetry::OpenTelemetryLayer<Base, opentelemetry_sdk::trace::Tracer>;

#[cfg(not(feature = "telemetry"))]
pub type TelemetryLayer = tracing_subscriber::layer::Identity;

/// Build the export layer when an OTLP endpoint is configured
pub fn layer() -> Result<Option<TelemetryLayer>> {
    match std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        Ok(endpoint) => layer_for(&endpoint),
        Err(_) => Ok(None),
    }
}

#[cfg(feature = "telemetry")]
fn layer_for(endpoint: &str) -> Result<Option<TelemetryLayer>> {
    build_layer(endpoint).map(Some)
}

#[cfg(not(feature = "telemetry"))]
fn layer_for(endpoint: &str) -> Result<Option<TelemetryLayer>> {
    // logging is not up yet
    eprintln!(
        "OTEL_EXPORTER_OTLP_ENDPOINT={} ignored: built without the 'telemetry' feature",
        endpoint
    );
    Ok(None)
}

#[cfg(feature = "telemetry")]
fn build_layer(endpoint: &str) -> Result<TelemetryLayer> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "ticketline".to_string());

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(tracing_opentelemetry::layer().with_tracer(tracer))
}

/// Flush pending spans
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
