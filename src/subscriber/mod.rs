//! MQTT subscriber for the chat topic.
//!
//! Drives the broker connection through
//! `Disconnected -> Connecting -> Connected -> Subscribed`, subscribes on every
//! successful connect and hands each publish to the [`Dispatcher`]. Transport
//! errors after the first successful connect lead back to `Connecting` with a
//! capped exponential backoff; they never end the loop.

pub mod dispatch;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode,
};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

use self::dispatch::Dispatcher;
use crate::observability::metrics::record_received;

/// First reconnect delay; doubles on each consecutive failure.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the client request channel.
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long shutdown waits for the DISCONNECT packet to go out.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Error type for the subscriber loop.
#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("could not reach MQTT broker at {address}: {source}")]
    InitialConnect {
        address: String,
        #[source]
        source: ConnectionError,
    },
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound for the reconnect delay.
    pub reconnect_max: Duration,
}

impl BrokerConfig {
    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection state of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
}

impl LinkState {
    /// A connection attempt is starting.
    pub fn on_connect_attempt(self) -> Self {
        LinkState::Connecting
    }

    /// The broker answered the connect request.
    pub fn on_connack(self, code: ConnectReturnCode) -> Self {
        if code == ConnectReturnCode::Success {
            LinkState::Connected
        } else {
            LinkState::Disconnected
        }
    }

    /// The broker acknowledged the subscription.
    pub fn on_suback(self, accepted: bool) -> Self {
        match (self, accepted) {
            (LinkState::Connected, true) => LinkState::Subscribed,
            (state, _) => state,
        }
    }

    /// Whether a SUBSCRIBE should be sent now.
    pub fn wants_subscription(self) -> bool {
        self == LinkState::Connected
    }

    /// The transport failed or the connection was refused.
    pub fn on_transport_error(self) -> Self {
        LinkState::Disconnected
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to wait now; the following delay doubles, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

/// Subscribes to the chat topic and dispatches every delivered payload.
pub struct Subscriber {
    config: BrokerConfig,
    dispatcher: Dispatcher,
    state: LinkState,
}

impl Subscriber {
    pub fn new(config: BrokerConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            state: LinkState::Disconnected,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Run the subscription loop until `shutdown_rx` flips.
    ///
    /// Fails only when the very first connection attempt cannot reach the
    /// broker.
    #[tracing::instrument(skip_all, fields(broker = %self.config.address(), topic = %self.config.topic))]
    pub async fn run(
        &mut self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> Result<(), SubscriberError> {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
        let mut backoff = Backoff::new(INITIAL_RECONNECT_DELAY, self.config.reconnect_max);
        let mut connected_once = false;

        self.state = self.state.on_connect_attempt();
        tracing::info!("Connecting to MQTT broker");

        loop {
            let event = tokio::select! {
                event = eventloop.poll() => event,
                _ = shutdown_rx.changed() => break,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    self.state = self.state.on_connack(ack.code);
                    if !self.state.wants_subscription() {
                        tracing::error!(code = ?ack.code, "Broker refused connection");
                        continue;
                    }
                    connected_once = true;
                    backoff.reset();
                    tracing::info!("Connected to MQTT broker");

                    // A failed request leaves the link unsubscribed until the next ConnAck.
                    if let Err(e) = client.try_subscribe(self.config.topic.clone(), QoS::AtMostOnce) {
                        tracing::error!(error = %e, "Failed to request subscription");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let accepted = ack
                        .return_codes
                        .iter()
                        .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                    self.state = self.state.on_suback(accepted);
                    if accepted {
                        tracing::info!("Subscribed");
                    } else {
                        tracing::error!("Broker rejected subscription");
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    record_received(&publish.topic);
                    self.dispatcher.dispatch(publish.payload).await;
                }
                Ok(_) => {}
                Err(e) => {
                    self.state = self.state.on_transport_error();

                    let refused = match &e {
                        ConnectionError::ConnectionRefused(code) => {
                            tracing::error!(code = ?code, "Broker refused connection");
                            true
                        }
                        _ => false,
                    };

                    if !connected_once && !refused {
                        return Err(SubscriberError::InitialConnect {
                            address: self.config.address(),
                            source: e,
                        });
                    }

                    let delay = backoff.next_delay();
                    tracing::warn!(error = %e, retry_in = ?delay, "Broker connection lost");

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => break,
                    }

                    self.state = self.state.on_connect_attempt();
                    tracing::info!("Reconnecting to MQTT broker");
                }
            }
        }

        tracing::info!("Shutdown signal received, leaving broker");
        if matches!(self.state, LinkState::Connected | LinkState::Subscribed) {
            flush_disconnect(&client, &mut eventloop).await;
        }
        self.state = LinkState::Disconnected;
        Ok(())
    }
}

/// Send DISCONNECT and drive the event loop until it is on the wire.
async fn flush_disconnect(client: &AsyncClient, eventloop: &mut EventLoop) {
    if client.try_disconnect().is_err() {
        return;
    }

    let sent = tokio::time::timeout(DISCONNECT_GRACE, async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    })
    .await;

    if sent.is_err() {
        tracing::warn!("Timed out sending DISCONNECT");
    }
}
