use crate::reading::MIN_PLAUSIBLE_YEAR;
use chrono::{DateTime, Utc};
use rumqttc::ConnectReturnCode;
use std::time::Duration;

/// Startup failure of the broker or storage side. Fatal: the process must not
/// reach steady state without both.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("could not connect to MQTT broker at {address}")]
    BrokerConnect {
        address: String,
        #[source]
        source: BrokerError,
    },
    #[error("could not subscribe to topic {topic}")]
    BrokerSubscribe {
        topic: String,
        #[source]
        source: BrokerError,
    },
    #[error("could not connect to storage")]
    StorageConnect(#[source] sqlx::Error),
    #[error("could not prepare insert statement")]
    StoragePrepare(#[source] sqlx::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error(transparent)]
    Connection(#[from] rumqttc::ConnectionError),
    #[error(transparent)]
    Client(#[from] rumqttc::ClientError),
    #[error("broker refused the connection: {0:?}")]
    Refused(ConnectReturnCode),
    #[error("broker rejected the subscription")]
    SubscriptionRejected,
    #[error("no answer from broker within {0:?}")]
    Timeout(Duration),
}

/// Why an inbound message produced no reading.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DropReason {
    #[error("payload is not a json object")]
    MalformedPayload,
    #[error("payload carries no usable timestamp")]
    MissingTimestamp,
    #[error("timestamp {timestamp} predates {}", MIN_PLAUSIBLE_YEAR)]
    ImplausibleTimestamp { timestamp: DateTime<Utc> },
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("insert did not complete within {0:?}")]
    Timeout(Duration),
}
