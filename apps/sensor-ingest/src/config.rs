use crate::codec::PayloadEncoding;
use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_CLIENT_ID: &str = "SENSOR_CLIENT_ID";
const DEFAULT_TOPIC: &str = "dissertation/sensor_data_1";
// The arm publishes every 10 seconds; stay far above that so one late
// heartbeat never trips the broker's timeout.
const DEFAULT_KEEPALIVE_SECS: u64 = 1200;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_topic: String,
    pub mqtt_keepalive_secs: u64,
    pub mqtt_connect_timeout_ms: u64,
    pub mqtt_reconnect_delay_ms: u64,
    pub payload_encoding: PayloadEncoding,
    pub sink_write_timeout_ms: u64,
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = value("SENSOR_DATABASE_URL")
            .or_else(|| value("DATABASE_URL"))
            .context("SENSOR_DATABASE_URL or DATABASE_URL is required")?;

        let mqtt_host = value("SENSOR_MQTT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let mqtt_port = parse_or(value("SENSOR_MQTT_PORT"), 1883);
        let mqtt_username = value("SENSOR_MQTT_USERNAME");
        let mqtt_password = value("SENSOR_MQTT_PASSWORD");
        let mqtt_client_id =
            value("SENSOR_MQTT_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        let mqtt_topic = value("SENSOR_MQTT_TOPIC").unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let mqtt_keepalive_secs = Some(parse_or(
            value("SENSOR_MQTT_KEEPALIVE_SECS"),
            DEFAULT_KEEPALIVE_SECS,
        ))
        .filter(|secs| *secs != 0)
        .unwrap_or(DEFAULT_KEEPALIVE_SECS)
        .min(u64::from(u16::MAX));
        let mqtt_connect_timeout_ms = parse_or(value("SENSOR_MQTT_CONNECT_TIMEOUT_MS"), 10_000);
        let mqtt_reconnect_delay_ms = parse_or(value("SENSOR_MQTT_RECONNECT_DELAY_MS"), 1_000);

        let payload_encoding = match value("SENSOR_PAYLOAD_ENCODING") {
            Some(raw) => PayloadEncoding::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(encoding=%raw, "unsupported payload encoding; using utf-8");
                PayloadEncoding::Utf8
            }),
            None => PayloadEncoding::Utf8,
        };
        let sink_write_timeout_ms = parse_or(value("SENSOR_SINK_WRITE_TIMEOUT_MS"), 5_000);
        let otlp_endpoint = value("OTEL_EXPORTER_OTLP_ENDPOINT");

        Ok(Self {
            database_url,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_topic,
            mqtt_keepalive_secs,
            mqtt_connect_timeout_ms,
            mqtt_reconnect_delay_ms,
            payload_encoding,
            sink_write_timeout_ms,
            otlp_endpoint,
        })
    }

    pub fn mqtt_keepalive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keepalive_secs)
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_millis(self.mqtt_connect_timeout_ms)
    }

    pub fn mqtt_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.mqtt_reconnect_delay_ms)
    }

    pub fn sink_write_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_write_timeout_ms)
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.parse::<T>().ok()).unwrap_or(default)
}
