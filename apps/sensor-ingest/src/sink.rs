use crate::error::{InitError, SinkError};
use crate::reading::Reading;
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgStatement};
use sqlx::{Connection, Executor, Statement};
use std::str::FromStr;
use std::time::Duration;

/// Column order is the contract with the `sensor_data` schema.
pub const INSERT_READING_SQL: &str = "INSERT INTO sensor_data (timestamp, arm_id, force, temperature, pressure, rotation) \
     VALUES ($1, $2, $3, $4, $5, $6)";

/// Destination for validated readings.
///
/// `save` takes `&mut self`: a sink has exactly one writer, and callers that
/// dispatch messages concurrently must put their own lock or queue in front
/// of it.
#[async_trait]
pub trait ReadingSink: Send {
    async fn save(&mut self, reading: &Reading) -> Result<(), SinkError>;
}

/// One long-lived storage connection plus the prepared insert it executes.
pub struct PostgresSink {
    conn: PgConnection,
    insert: PgStatement<'static>,
    write_timeout: Duration,
}

impl PostgresSink {
    pub async fn open(database_url: &str, write_timeout: Duration) -> Result<Self, InitError> {
        let options = PgConnectOptions::from_str(database_url).map_err(|err| {
            tracing::error!(error=%err, "invalid storage connection url");
            InitError::StorageConnect(err)
        })?;
        Self::open_with(options, write_timeout).await
    }

    pub async fn open_with(
        options: PgConnectOptions,
        write_timeout: Duration,
    ) -> Result<Self, InitError> {
        // Server-side bound as well, so a timed-out insert does not keep running.
        let options = options.options([(
            "statement_timeout",
            write_timeout.as_millis().to_string(),
        )]);
        let mut conn = PgConnection::connect_with(&options).await.map_err(|err| {
            tracing::error!(error=%err, "could not create storage connection");
            InitError::StorageConnect(err)
        })?;
        let insert = match conn.prepare(INSERT_READING_SQL).await {
            Ok(statement) => statement,
            Err(err) => {
                tracing::error!(error=%err, "could not prepare insert statement");
                if let Err(close_err) = conn.close().await {
                    tracing::warn!(error=%close_err, "could not close storage connection");
                }
                return Err(InitError::StoragePrepare(err));
            }
        };
        tracing::info!(
            host = options.get_host(),
            port = options.get_port(),
            "storage connection ready"
        );
        Ok(Self {
            conn,
            insert,
            write_timeout,
        })
    }

    /// Releases the statement and the connection. Errors are logged, never
    /// returned: shutdown carries on regardless.
    pub async fn close(self) {
        let Self { conn, insert, .. } = self;
        drop(insert);
        match conn.close().await {
            Ok(()) => tracing::info!("storage connection closed"),
            Err(err) => tracing::error!(error=%err, "could not close storage connection"),
        }
    }
}

#[async_trait]
impl ReadingSink for PostgresSink {
    async fn save(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let query = self
            .insert
            .query()
            .bind(reading.timestamp())
            .bind(reading.arm_id().to_owned())
            .bind(reading.force())
            .bind(reading.temperature())
            .bind(reading.pressure())
            .bind(reading.rotation());

        match tokio::time::timeout(self.write_timeout, query.execute(&mut self.conn)).await {
            Ok(Ok(_)) => {
                tracing::debug!(values = %reading.values_literal(), "inserted reading");
                Ok(())
            }
            Ok(Err(err)) => Err(SinkError::Database(err)),
            Err(_) => Err(SinkError::Timeout(self.write_timeout)),
        }
    }
}
