//! Logging setup and optional OpenTelemetry export of marker passes.

use anyhow::{Context, Result, anyhow};
use opentelemetry::KeyValue;
use opentelemetry::trace::{Status, TraceContextExt, Tracer, TracerProvider as _};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{
    BatchConfigBuilder, BatchSpanProcessor, SdkTracer, SdkTracerProvider, SpanExporter,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::markers::MarkerMetadata;

const SERVICE_NAME: &str = "optfacts";

/// Exports one span per marker pass over OTLP/HTTP.
pub struct Telemetry {
    tracer: SdkTracer,
    provider: SdkTracerProvider,
}

impl Telemetry {
    /// Connects to an OTLP/HTTP collector. A bare host (`http://host:4318`)
    /// and a logs endpoint are both rewritten to the traces endpoint.
    pub fn new(endpoint: &str) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_http()
            .with_endpoint(traces_endpoint(endpoint)?)
            .build()
            .context("build OTLP span exporter")?;
        Self::with_exporter(exporter)
    }

    /// Runs one marker pass inside a `marker:<id>` span. The span records the
    /// number of changed facts, or the error when the pass fails.
    pub fn marker_span<F>(&self, marker: &MarkerMetadata, pass: F) -> Result<usize>
    where
        F: FnOnce() -> Result<usize>,
    {
        self.tracer.in_span(format!("marker:{}", marker.id), |cx| {
            let span = cx.span();
            span.set_attribute(KeyValue::new("optfacts.marker_id", marker.id));
            let result = pass();
            match &result {
                Ok(changed) => span.set_attribute(KeyValue::new(
                    "optfacts.changed_facts",
                    i64::try_from(*changed).unwrap_or(i64::MAX),
                )),
                Err(err) => span.set_status(Status::error(format!("{err:#}"))),
            }
            result
        })
    }

    /// Flushes pending spans.
    pub fn shutdown(&self) -> Result<()> {
        self.provider
            .shutdown()
            .map_err(|err| anyhow!("failed to shut down tracer provider: {err}"))
    }

    fn with_exporter<E: SpanExporter + 'static>(exporter: E) -> Result<Self> {
        // Passes end spans from the driver thread only; a small queue is enough.
        let batch_config = BatchConfigBuilder::default()
            .with_max_queue_size(4096)
            .with_max_export_batch_size(512)
            .with_scheduled_delay(Duration::from_millis(500))
            .build();
        let provider = SdkTracerProvider::builder()
            .with_resource(Resource::builder().with_service_name(SERVICE_NAME).build())
            .with_span_processor(
                BatchSpanProcessor::builder(exporter)
                    .with_batch_config(batch_config)
                    .build(),
            )
            .build();
        let tracer = provider.tracer(SERVICE_NAME);
        opentelemetry::global::set_tracer_provider(provider.clone());
        Ok(Self { tracer, provider })
    }
}

/// Runs `pass` in a marker span when telemetry is enabled, directly otherwise.
pub fn in_marker_span<F>(telemetry: Option<&Telemetry>, marker: &MarkerMetadata, pass: F) -> Result<usize>
where
    F: FnOnce() -> Result<usize>,
{
    match telemetry {
        Some(telemetry) => telemetry.marker_span(marker, pass),
        None => pass(),
    }
}

fn traces_endpoint(endpoint: &str) -> Result<String> {
    let mut url = reqwest::Url::parse(endpoint).context("parse OTLP endpoint")?;
    let traces_path = match url.path() {
        "" | "/" => Some("/v1/traces".to_string()),
        path => path
            .strip_suffix("/v1/logs")
            .map(|prefix| format!("{prefix}/v1/traces")),
    };
    if let Some(path) = traces_path {
        url.set_path(&path);
    }
    Ok(url.to_string())
}

/// Installs a stderr subscriber filtered by `RUST_LOG`, defaulting to
/// `optfacts=info,warn`. Later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{SERVICE_NAME}=info,warn")));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

/// Trace id of the active span, if any.
pub fn current_trace_id() -> Option<String> {
    let cx = opentelemetry::Context::current();
    let span_context = cx.span().span_context().clone();
    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}
