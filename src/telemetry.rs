use std::env;

use crate::config::Config;
use opentelemetry::global;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Flushes spans still buffered for Jaeger when dropped.
#[must_use = "buffered spans are flushed when the guard is dropped"]
pub struct TelemetryGuard {
    exporting: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.exporting {
            global::shutdown_tracer_provider();
        }
    }
}

/// Installs the log subscriber, filtered by `RUST_LOG` or else
/// `config.log_filter`. Spans also go to Jaeger when an endpoint is set.
pub fn init(config: &Config) -> Result<TelemetryGuard, Box<dyn std::error::Error>> {
    let telemetry = match config.jaeger_endpoint.as_deref() {
        Some(endpoint) => {
            env::remove_var("http_proxy");
            env::remove_var("https_proxy");
            env::remove_var("HTTP_PROXY");
            env::remove_var("HTTPS_PROXY");

            global::set_text_map_propagator(opentelemetry_jaeger::Propagator::new());

            let tracer = opentelemetry_jaeger::new_collector_pipeline()
                .with_endpoint(endpoint)
                .with_service_name(config.service_name.as_str())
                .with_isahc()
                .with_timeout(std::time::Duration::from_secs(2))
                .install_batch(opentelemetry::runtime::Tokio)?;

            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let exporting = telemetry.is_some();

    tracing_subscriber::registry()
        .with(telemetry)
        .with(filter(&config.log_filter)?)
        .with(fmt::Layer::default())
        .try_init()?;

    if let Some(endpoint) = &config.jaeger_endpoint {
        tracing::info!(%endpoint, service = %config.service_name, "Exporting spans to Jaeger");
    }
    Ok(TelemetryGuard { exporting })
}

fn filter(fallback: &str) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(fallback))
}
