//! Robotic-arm telemetry ingest: MQTT subscription -> payload codec -> one
//! storage connection.

pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod reading;
pub mod sink;
pub mod subscription;
