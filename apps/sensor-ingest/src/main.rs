use anyhow::Result;
use sensor_ingest::config::Config;
use sensor_ingest::error::InitError;
use sensor_ingest::handler::MessageHandler;
use sensor_ingest::sink::PostgresSink;
use sensor_ingest::subscription::{SubscriptionConfig, SubscriptionManager, SubscriptionState};

/// Console output always; span export only when an OTLP collector is configured.
fn init_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_ingest=info".into());
    let export_layer = match otlp_endpoint {
        Some(endpoint) => Some(tracing_opentelemetry::layer().with_tracer(otlp_tracer(endpoint)?)),
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .with(export_layer)
        .try_init()?;
    Ok(())
}

fn otlp_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as TraceConfig, Resource};

    let resource = Resource::new(vec![
        KeyValue::new("service.name", env!("CARGO_PKG_NAME")),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ]);
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(normalize_otlp_http_endpoint(endpoint)),
        )
        .with_trace_config(TraceConfig::default().with_resource(resource))
        .install_batch(Tokio)?;
    Ok(tracer)
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() || trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn start_subscription(subscription: &mut SubscriptionManager) -> Result<(), InitError> {
    subscription.connect().await?;
    subscription.subscribe().await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error=%err, "could not listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.otlp_endpoint.as_deref())?;

    let sink = PostgresSink::open(&config.database_url, config.sink_write_timeout()).await?;
    let mut handler = MessageHandler::new(sink, config.payload_encoding);
    let mut subscription = SubscriptionManager::new(SubscriptionConfig::from_config(&config));

    if let Err(err) = start_subscription(&mut subscription).await {
        if subscription.state() != SubscriptionState::Disconnected {
            subscription.disconnect().await;
        }
        handler.into_sink().close().await;
        return Err(err.into());
    }

    subscription.run(&mut handler, shutdown_signal()).await;

    subscription.disconnect().await;
    handler.into_sink().close().await;
    opentelemetry::global::shutdown_tracer_provider();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{init_tracing, normalize_otlp_http_endpoint};

    #[test]
    fn otlp_endpoint_gets_traces_path() {
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(
            normalize_otlp_http_endpoint("http://collector:4318/v1/traces"),
            "http://collector:4318/v1/traces"
        );
        assert_eq!(normalize_otlp_http_endpoint("  "), "");
    }

    #[test]
    fn console_only_tracing_installs_once() {
        assert!(init_tracing(None).is_ok());
        assert!(init_tracing(None).is_err());
    }
}
