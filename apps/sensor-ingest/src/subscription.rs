use crate::config::Config;
use crate::error::{BrokerError, InitError};
use crate::handler::MessageHandler;
use crate::sink::ReadingSink;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, Incoming, MqttOptions, Outgoing, Publish,
    QoS, SubAck, SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::future::Future;
use tokio::time::{sleep, timeout, Duration};

const REQUEST_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    pub client_id: String,
    pub topic: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl SubscriptionConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client_id: config.mqtt_client_id.clone(),
            topic: config.mqtt_topic.clone(),
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            keep_alive: config.mqtt_keepalive(),
            connect_timeout: config.mqtt_connect_timeout(),
            reconnect_delay: config.mqtt_reconnect_delay(),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Persistent session (clean session off), so the broker queues messages
    /// for this client id while it is away.
    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(false);
        if let Some(username) = &self.username {
            options.set_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Disconnected,
    Connected,
    Subscribed,
    Receiving,
}

pub struct SubscriptionManager {
    config: SubscriptionConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    state: SubscriptionState,
    // Publishes that arrive before the subscription is confirmed (queued by
    // the broker for the persistent session).
    pending: VecDeque<Publish>,
}

impl SubscriptionManager {
    pub fn new(config: SubscriptionConfig) -> Self {
        let (client, eventloop) = AsyncClient::new(config.mqtt_options(), REQUEST_CHANNEL_CAPACITY);
        Self {
            config,
            client,
            eventloop,
            state: SubscriptionState::Disconnected,
            pending: VecDeque::new(),
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Waits for the broker's CONNACK. The initial connection is not retried;
    /// automatic reconnects only start once this has succeeded.
    pub async fn connect(&mut self) -> Result<(), InitError> {
        let limit = self.config.connect_timeout;
        let result = match timeout(limit, self.await_connack()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(limit)),
        };
        let address = self.config.address();
        match result {
            Ok(session_present) => {
                self.state = SubscriptionState::Connected;
                tracing::info!(broker=%address, session_present, "connected to MQTT broker");
                Ok(())
            }
            Err(source) => {
                tracing::error!(broker=%address, error=%source, "failed to connect to MQTT broker");
                Err(InitError::BrokerConnect { address, source })
            }
        }
    }

    pub async fn subscribe(&mut self) -> Result<(), InitError> {
        let limit = self.config.connect_timeout;
        let result = match timeout(limit, self.request_subscription()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(limit)),
        };
        let topic = self.config.topic.clone();
        match result {
            Ok(()) => {
                self.state = SubscriptionState::Subscribed;
                tracing::info!(topic=%topic, "subscribed to sensor feed");
                Ok(())
            }
            Err(source) => {
                tracing::error!(topic=%topic, error=%source, "failed to subscribe to topic");
                Err(InitError::BrokerSubscribe { topic, source })
            }
        }
    }

    /// Delivers messages to `handler` one at a time until `shutdown` resolves.
    /// Transport errors are logged and the event loop is polled again, which
    /// reconnects.
    pub async fn run<S, F>(&mut self, handler: &mut MessageHandler<S>, shutdown: F)
    where
        S: ReadingSink,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.state = SubscriptionState::Receiving;

        while let Some(publish) = self.pending.pop_front() {
            handler.on_message_arrived(&publish.topic, &publish.payload).await;
        }

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested; leaving receive loop");
                    break;
                }
                event = self.eventloop.poll() => match event {
                    Ok(Event::Incoming(Incoming::Publish(publish))) => {
                        handler.on_message_arrived(&publish.topic, &publish.payload).await;
                    }
                    Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                        self.on_reconnected(ack.session_present);
                    }
                    Ok(Event::Incoming(Incoming::SubAck(ack))) => match check_suback(&ack) {
                        Ok(()) => {
                            self.state = SubscriptionState::Receiving;
                            tracing::info!(topic=%self.config.topic, "re-subscribed to sensor feed");
                        }
                        Err(err) => {
                            tracing::error!(topic=%self.config.topic, error=%err, "broker rejected re-subscription");
                        }
                    },
                    Ok(Event::Incoming(Incoming::PubAck(ack))) => {
                        handler.on_delivery_acknowledged(ack.pkid);
                    }
                    Ok(Event::Incoming(Incoming::PubComp(ack))) => {
                        handler.on_delivery_acknowledged(ack.pkid);
                    }
                    Ok(Event::Incoming(Incoming::Disconnect)) => {
                        tracing::warn!("broker closed the session");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        self.state = SubscriptionState::Disconnected;
                        handler.on_connection_lost(&err);
                        sleep(self.config.reconnect_delay).await;
                    }
                }
            }
        }
    }

    /// Sends DISCONNECT without unsubscribing, so the broker keeps queueing
    /// for the persistent session.
    pub async fn disconnect(mut self) {
        if let Err(err) = self.client.disconnect().await {
            tracing::warn!(error=%err, "could not request MQTT disconnect");
            return;
        }
        let drained = timeout(self.config.connect_timeout, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        match drained {
            Ok(()) => tracing::info!("disconnected from MQTT broker"),
            Err(_) => tracing::warn!("timed out while disconnecting from MQTT broker"),
        }
    }

    async fn await_connack(&mut self) -> Result<bool, BrokerError> {
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Incoming::ConnAck(ack)) => {
                    if ack.code != ConnectReturnCode::Success {
                        return Err(BrokerError::Refused(ack.code));
                    }
                    return Ok(ack.session_present);
                }
                Event::Incoming(Incoming::Publish(publish)) => self.pending.push_back(publish),
                _ => {}
            }
        }
    }

    async fn request_subscription(&mut self) -> Result<(), BrokerError> {
        self.client
            .subscribe(self.config.topic.clone(), QoS::AtLeastOnce)
            .await?;
        loop {
            match self.eventloop.poll().await? {
                Event::Incoming(Incoming::SubAck(ack)) => return check_suback(&ack),
                Event::Incoming(Incoming::Publish(publish)) => self.pending.push_back(publish),
                _ => {}
            }
        }
    }

    fn on_reconnected(&mut self, session_present: bool) {
        if session_present {
            self.state = SubscriptionState::Receiving;
            tracing::info!("reconnected to MQTT broker; session retained");
            return;
        }
        self.state = SubscriptionState::Connected;
        match self
            .client
            .try_subscribe(self.config.topic.clone(), QoS::AtLeastOnce)
        {
            Ok(()) => {
                tracing::warn!(topic=%self.config.topic, "reconnected without a retained session; re-subscribing")
            }
            Err(err) => {
                tracing::error!(error=%err, "could not re-subscribe after reconnect")
            }
        }
    }
}

fn check_suback(ack: &SubAck) -> Result<(), BrokerError> {
    if ack
        .return_codes
        .iter()
        .all(|code| matches!(code, SubscribeReasonCode::Success(_)))
    {
        Ok(())
    } else {
        Err(BrokerError::SubscriptionRejected)
    }
}
