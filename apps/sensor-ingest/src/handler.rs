
use crate::codec::{decode_reading, PayloadEncoding};
use crate::error::DropReason;
use crate::sink::ReadingSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Persisted,
    Dropped(DropReason),
    WriteFailed,
}

/// Callback surface of the subscription: turns each delivered message into at
/// most one stored reading. Nothing here returns an error to the transport.
pub struct MessageHandler<S> {
    sink: S,
    encoding: PayloadEncoding,
}

impl<S: ReadingSink> MessageHandler<S> {
    pub fn new(sink: S, encoding: PayloadEncoding) -> Self {
        Self { sink, encoding }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    #[tracing::instrument(skip(self, payload), fields(bytes = payload.len()))]
    pub async fn on_message_arrived(&mut self, topic: &str, payload: &[u8]) -> MessageOutcome {
        let reading = match decode_reading(payload, self.encoding) {
            Ok(reading) => reading,
            Err(reason) => {
                match reason {
                    // decode_json already reported the parse error.
                    DropReason::MalformedPayload => {
                        tracing::debug!(reason=%reason, "skipped undecodable sensor message")
                    }
                    _ => tracing::warn!(reason=%reason, "dropped sensor message"),
                }
                return MessageOutcome::Dropped(reason);
            }
        };

        match self.sink.save(&reading).await {
            Ok(()) => MessageOutcome::Persisted,
            Err(err) => {
                tracing::error!(
                    error=%err,
                    timestamp=%reading.timestamp(),
                    "could not insert entry for timestamp"
                );
                MessageOutcome::WriteFailed
            }
        }
    }

    pub fn on_connection_lost(&self, err: &rumqttc::ConnectionError) {
        // The event loop reconnects on the next poll; nothing to do here.
        tracing::error!(error=%err, "MQTT broker connection was lost");
    }

    /// Only fires for publishes made by this client; inbound sensor messages
    /// never reach it.
    pub fn on_delivery_acknowledged(&self, packet_id: u16) {
        tracing::info!(
            packet_id,
            "delivery acknowledged; payload is not retained by the transport"
        );
    }
}
