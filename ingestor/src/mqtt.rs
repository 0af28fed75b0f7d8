use crate::config::BrokerConfig;
use crate::credentials::Credentials;
use crate::errors::{Error, Result};
use crate::metrics::MESSAGES_TOTAL;
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, Publish, QoS,
    SubscribeReasonCode,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const ACK_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed,
    /// Transport lost; the event loop reconnects on its next poll.
    Interrupted,
}

/// Delivery flags of a received PUBLISH.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryMeta {
    pub dup: bool,
    pub qos: QoS,
    pub retain: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
    pub meta: DeliveryMeta,
}

impl From<Publish> for Message {
    fn from(publish: Publish) -> Self {
        Self {
            meta: DeliveryMeta {
                dup: publish.dup,
                qos: publish.qos,
                retain: publish.retain,
            },
            topic: publish.topic,
            payload: publish.payload.to_vec(),
        }
    }
}

/// Receives every message delivered on the subscribed topic. Implementations
/// must not fail: errors are handled and logged inside `on_message`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn on_message(&self, message: Message);
}

/// Long-lived mTLS MQTT session on a single topic at QoS 1.
pub struct Subscriber {
    config: BrokerConfig,
    state: Arc<watch::Sender<SessionState>>,
    client: Option<AsyncClient>,
    eventloop: Option<EventLoop>,
    credentials: Option<Credentials>,
    delivery: Option<JoinHandle<()>>,
}

impl Subscriber {
    pub fn new(config: &BrokerConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config: config.clone(),
            state: Arc::new(state),
            client: None,
            eventloop: None,
            credentials: None,
            delivery: None,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Validates the endpoint, resolves credentials and waits for the
    /// broker's CONNACK. Never retries; on failure the reason is logged and
    /// returned and the session stays disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        self.state.send_replace(SessionState::Connecting);

        match self.try_connect().await {
            Ok(session_present) => {
                info!(
                    "Connected to MQTT broker {} (session present: {})",
                    self.config.endpoint, session_present
                );
                self.state.send_replace(SessionState::Connected);
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to MQTT broker: {}", e);
                self.client = None;
                self.eventloop = None;
                self.state.send_replace(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn try_connect(&mut self) -> Result<bool> {
        validate_endpoint(&self.config.endpoint)?;

        let credentials = Credentials::resolve(&self.config.credentials)?;
        let transport = credentials.transport();
        // kept even on failure so teardown removes temporary files
        self.credentials = Some(credentials);
        let transport = transport?;

        info!(
            "Connecting to MQTT broker at {}:{} as {}",
            self.config.endpoint, self.config.port, self.config.client_id
        );

        let mut mqtt_options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.endpoint.clone(),
            self.config.port,
        );
        mqtt_options.set_keep_alive(KEEP_ALIVE);
        mqtt_options.set_clean_session(false);
        mqtt_options.set_transport(transport);

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);

        let session_present = timeout(ACK_TIMEOUT, wait_for_connack(&mut eventloop))
            .await
            .map_err(|_| Error::Timeout("CONNACK"))??;

        self.client = Some(client);
        self.eventloop = Some(eventloop);
        Ok(session_present)
    }

    /// Subscribes at QoS 1 and returns once the broker has acknowledged.
    /// From then on every delivery is passed to `handler` on a dedicated
    /// task, one message at a time.
    pub async fn subscribe(&mut self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let client = self.client.clone().ok_or(Error::NotConnected)?;
        let mut eventloop = self.eventloop.take().ok_or(Error::NotConnected)?;

        info!("Subscribing to {}", topic);
        let acked = request_subscription(&client, &mut eventloop, topic, handler.as_ref()).await;

        let granted = match acked {
            Ok(qos) => qos,
            Err(e) => {
                error!("Failed to subscribe to {}: {}", topic, e);
                self.eventloop = Some(eventloop);
                return Err(e);
            }
        };

        info!("Subscribed to {} with {:?}, waiting for messages", topic, granted);
        self.state.send_replace(SessionState::Subscribed);

        self.delivery = Some(tokio::spawn(run_delivery_loop(
            eventloop,
            client,
            topic.to_string(),
            handler,
            self.state.clone(),
        )));
        Ok(())
    }

    /// Requests a graceful DISCONNECT and waits for the event loop to send
    /// it. Temporary credential files are removed whatever the outcome.
    pub async fn disconnect(&mut self) -> Result<()> {
        let result = self.close_session().await;
        if let Err(e) = &result {
            error!("Error while disconnecting from MQTT broker: {}", e);
        }

        if let Some(credentials) = self.credentials.take() {
            match credentials.close() {
                Ok(true) => info!("Temporary certificates removed"),
                Ok(false) => {}
                Err(e) => warn!("Failed to remove temporary certificates: {}", e),
            }
        }

        self.state.send_replace(SessionState::Disconnected);
        result
    }

    async fn close_session(&mut self) -> Result<()> {
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        info!("Disconnecting from MQTT broker...");
        client.disconnect().await?;

        if let Some(mut handle) = self.delivery.take() {
            match timeout(ACK_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Delivery task ended abnormally: {}", e),
                Err(_) => {
                    handle.abort();
                    return Err(Error::Timeout("DISCONNECT"));
                }
            }
        } else if let Some(mut eventloop) = self.eventloop.take() {
            timeout(ACK_TIMEOUT, flush_disconnect(&mut eventloop))
                .await
                .map_err(|_| Error::Timeout("DISCONNECT"))?;
        }

        info!("Disconnected");
        Ok(())
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(handle) = self.delivery.take() {
            handle.abort();
        }
    }
}

/// Accepts a bare broker hostname: no scheme prefix, no port suffix.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    if endpoint.trim().is_empty() {
        return Err(Error::Endpoint("MQTT_ENDPOINT is not set".to_string()));
    }
    if endpoint.contains("://") {
        return Err(Error::Endpoint(format!(
            "{} must not include a protocol prefix",
            endpoint
        )));
    }
    if endpoint.contains(':') {
        return Err(Error::Endpoint(format!(
            "{} must not include a port, use MQTT_PORT",
            endpoint
        )));
    }
    if endpoint.contains('/') || endpoint.chars().any(char::is_whitespace) {
        return Err(Error::Endpoint(format!("{:?} is not a hostname", endpoint)));
    }
    Ok(())
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<bool> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => return Ok(ack.session_present),
            Ok(_) => {}
            Err(e) => return Err(connect_error(e)),
        }
    }
}

/// rumqttc surfaces a refused CONNACK as a poll error, not as an event.
fn connect_error(err: ConnectionError) -> Error {
    match err {
        ConnectionError::ConnectionRefused(code) => {
            Error::Connection(format!("broker refused connection: {:?}", code))
        }
        other => Error::MqttConnection(other),
    }
}

async fn request_subscription(
    client: &AsyncClient,
    eventloop: &mut EventLoop,
    topic: &str,
    handler: &dyn MessageHandler,
) -> Result<QoS> {
    client.subscribe(topic, QoS::AtLeastOnce).await?;
    timeout(ACK_TIMEOUT, wait_for_suback(eventloop, topic, handler))
        .await
        .map_err(|_| Error::Timeout("SUBACK"))?
}

/// Polls until SUBACK. Queued deliveries of a persistent session may arrive
/// first and are handed to the handler as they come.
async fn wait_for_suback(
    eventloop: &mut EventLoop,
    topic: &str,
    handler: &dyn MessageHandler,
) -> Result<QoS> {
    loop {
        match eventloop.poll().await? {
            Event::Incoming(Packet::SubAck(ack)) => {
                return match ack.return_codes.first() {
                    Some(SubscribeReasonCode::Success(qos)) => Ok(*qos),
                    _ => Err(Error::SubscriptionRejected(topic.to_string())),
                };
            }
            Event::Incoming(Packet::Publish(publish)) => {
                MESSAGES_TOTAL.inc();
                handler.on_message(Message::from(publish)).await;
            }
            _ => {}
        }
    }
}

async fn flush_disconnect(eventloop: &mut EventLoop) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

async fn run_delivery_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    handler: Arc<dyn MessageHandler>,
    state: Arc<watch::Sender<SessionState>>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                MESSAGES_TOTAL.inc();
                debug!(
                    "Received message on topic {}, size: {} bytes",
                    publish.topic,
                    publish.payload.len()
                );
                // handled inline: a slow database throttles consumption
                handler.on_message(Message::from(publish)).await;
            }
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                info!(
                    "MQTT connection resumed ({:?}, session present: {})",
                    ack.code, ack.session_present
                );
                state.send_replace(SessionState::Connected);
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                    warn!("Failed to renew subscription to {}: {}", topic, e);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if matches!(ack.return_codes.first(), Some(SubscribeReasonCode::Success(_))) {
                    state.send_replace(SessionState::Subscribed);
                } else {
                    error!("Broker rejected subscription to {}", topic);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("DISCONNECT sent, stopping delivery loop");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("MQTT connection interrupted: {}", e);
                state.send_replace(SessionState::Interrupted);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}
