//! # Session manager.
//!
//! A [`Session`] owns one logical connection to one broker. [`Session::start`]
//! spawns the event loop, which connects, reconnects with backoff, announces
//! presence and re-subscribes on every connection, and forwards every inbound
//! publish into the session's bounded inbound channel.
//!
//! The inbound sender is owned by the event loop task alone. The channel is
//! therefore closed exactly when that task ends, which [`Session::stop`] only
//! allows after the connection has quiesced.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeFilter, TlsConfiguration, Transport,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::acks::AckTracker;
use crate::session::backoff::BackoffPolicy;
use crate::session::config::{BrokerAddress, SessionConfig, TransportScheme};
use crate::session::message::Message;
use crate::session::publisher::{Publisher, effective_qos};
use crate::session::status::{ConnectionState, StatusPayload, client_topic};
use crate::session::tls;
use crate::utils::error::{ConfigError, ConnectError, PublishError};

/// Time allowed for in-flight acknowledgements when disconnecting.
pub const DISCONNECT_LINGER: Duration = Duration::from_millis(250);

const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 64;

pub struct Session {
    config: SessionConfig,
    address: BrokerAddress,
    client: AsyncClient,
    eventloop: Option<EventLoop>,
    publisher: Publisher,
    tracker: Arc<Mutex<AckTracker>>,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound_tx: Option<mpsc::Sender<Message>>,
    inbound_rx: Option<mpsc::Receiver<Message>>,
    cancel: CancellationToken,
    disconnecting: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    stopped: bool,
}

impl Session {
    /// Validates `config` and prepares the client without connecting.
    ///
    /// TLS material is read here, so unreadable files fail this session up
    /// front instead of on every reconnect.
    pub fn initialize(mut config: SessionConfig) -> Result<Self, ConfigError> {
        let address = config.validate()?;
        config.client_id = config.client_id.trim().to_string();

        let mut options =
            MqttOptions::new(config.client_id.clone(), address.host.clone(), address.port);
        options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if let Some(paths) = config.tls_paths()? {
            let tls_config = tls::client_config(&paths)?;
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                tls_config,
            )));
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let tracker = Arc::new(Mutex::new(AckTracker::default()));
        let publisher = Publisher::new(
            client.clone(),
            tracker.clone(),
            config.client_id.clone(),
            config.publish_timeout,
        );
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        debug!(session = %config.name, url = %address, "session initialized");

        Ok(Self {
            config,
            address,
            client,
            eventloop: Some(eventloop),
            publisher,
            tracker,
            state: Arc::new(state),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            cancel: CancellationToken::new(),
            disconnecting: Arc::new(AtomicBool::new(false)),
            handle: None,
            stopped: false,
        })
    }

    /// Broker alias.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn scheme(&self) -> TransportScheme {
        self.address.scheme
    }

    /// `tcp://host:port` or `ssl://host:port`.
    pub fn broker_url(&self) -> String {
        self.address.to_string()
    }

    pub fn subscriptions(&self) -> &BTreeMap<String, u8> {
        &self.config.subscriptions
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver observing every state transition of this session.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Hands out the inbound stream. Only the first call returns it.
    pub fn take_inbound(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.inbound_rx.take()
    }

    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub async fn publish(
        &self,
        topic: &str,
        qos: u8,
        payload: impl Into<Vec<u8>>,
    ) -> Result<(), PublishError> {
        self.publisher.publish(topic, qos, payload).await
    }

    /// Spawns the event loop. Calling it again, or after stop, does nothing.
    pub fn start(&mut self) {
        let (Some(eventloop), Some(inbound)) = (self.eventloop.take(), self.inbound_tx.take())
        else {
            warn!(session = %self.config.name, "session already started or stopped");
            return;
        };

        self.state.send_replace(ConnectionState::Connecting);
        info!(
            session = %self.config.name,
            client_id = %self.config.client_id,
            url = %self.address,
            "connecting"
        );

        let subscriptions = self
            .config
            .subscriptions
            .iter()
            .map(|(topic, qos)| SubscribeFilter::new(topic.clone(), effective_qos(*qos)))
            .collect();

        let event_loop = SessionLoop {
            name: self.config.name.clone(),
            client_id: self.config.client_id.clone(),
            url: self.address.to_string(),
            status_topic: client_topic(&self.config.register_prefix, &self.config.client_id),
            subscriptions,
            eventloop,
            client: self.client.clone(),
            publisher: self.publisher.clone(),
            tracker: self.tracker.clone(),
            state: self.state.clone(),
            inbound,
            backoff: self.config.reconnect,
            cancel: self.cancel.clone(),
            disconnecting: self.disconnecting.clone(),
        };
        self.handle = Some(tokio::spawn(event_loop.run()));
    }

    /// Announces off-line, disconnects, and closes the inbound channel.
    ///
    /// The state ends as [`ConnectionState::Disconnected`] and never changes
    /// again.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.eventloop = None;

        if let Some(mut handle) = self.handle.take() {
            let status_topic = client_topic(&self.config.register_prefix, &self.config.client_id);
            match StatusPayload::offline(&self.config.client_id).to_bytes() {
                Ok(status) => match timeout(
                    DISCONNECT_LINGER,
                    self.publisher.publish(&status_topic, 0, status),
                )
                .await
                {
                    Ok(Ok(())) => debug!(session = %self.config.name, "off-line status sent"),
                    Ok(Err(err)) => {
                        debug!(session = %self.config.name, "off-line status not sent: {err}")
                    }
                    Err(_) => debug!(session = %self.config.name, "off-line status timed out"),
                },
                Err(err) => {
                    warn!(session = %self.config.name, "off-line status not encoded: {err}")
                }
            }

            self.disconnecting.store(true, Ordering::Release);
            if let Err(err) = self.client.try_disconnect() {
                debug!(session = %self.config.name, "disconnect request failed: {err}");
            }
            if timeout(DISCONNECT_LINGER, &mut handle).await.is_err() {
                self.cancel.cancel();
                let _ = handle.await;
            }
        }

        self.cancel.cancel();
        self.inbound_tx = None;
        self.tracker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        self.state.send_replace(ConnectionState::Disconnected);
        info!(session = %self.config.name, "session stopped");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State moved into the event loop task.
struct SessionLoop {
    name: String,
    client_id: String,
    url: String,
    status_topic: String,
    subscriptions: Vec<SubscribeFilter>,
    eventloop: EventLoop,
    client: AsyncClient,
    publisher: Publisher,
    tracker: Arc<Mutex<AckTracker>>,
    state: Arc<watch::Sender<ConnectionState>>,
    inbound: mpsc::Sender<Message>,
    backoff: BackoffPolicy,
    cancel: CancellationToken,
    disconnecting: Arc<AtomicBool>,
}

impl SessionLoop {
    async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                event = self.eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        attempt = 0;
                        self.on_connected();
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = Message::new(
                        self.name.clone(),
                        self.client_id.clone(),
                        publish.topic,
                        publish.qos as u8,
                        publish.payload.to_vec(),
                    );
                    // blocks the event loop while the inbound channel is full
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        sent = self.inbound.send(message) => {
                            if sent.is_err() {
                                debug!(session = %self.name, "inbound stream not consumed; message dropped");
                            }
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    self.tracker().on_acked(ack.pkid);
                }
                Ok(Event::Incoming(Packet::PubComp(comp))) => {
                    self.tracker().on_acked(comp.pkid);
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(session = %self.name, pkid = ack.pkid, "subscriptions acknowledged");
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.tracker().on_sent(pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!(session = %self.name, "disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(source) => {
                    if self.disconnecting.load(Ordering::Acquire) {
                        break;
                    }
                    {
                        let mut tracker =
                            self.tracker.lock().unwrap_or_else(PoisonError::into_inner);
                        tracker.connection_lost();
                        // Nothing from the lost connection is resent; its callers have
                        // already failed. Cleaning again under the lock also drops publishes
                        // queued just before the tracker stopped accepting.
                        self.eventloop.clean();
                        self.eventloop.pending.clear();
                    }
                    self.state.send_replace(ConnectionState::Connecting);

                    let err = ConnectError {
                        broker: self.url.clone(),
                        source,
                    };
                    let delay = self.backoff.next(attempt);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        session = %self.name,
                        label = err.as_label(),
                        retry_in = ?delay,
                        "{err}"
                    );

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.tracker().close();
        debug!(session = %self.name, "event loop exited");
    }

    fn on_connected(&mut self) {
        self.tracker().on_connected();
        self.state.send_replace(ConnectionState::Connected);
        info!(session = %self.name, client_id = %self.client_id, url = %self.url, "connected");

        match StatusPayload::online(&self.client_id).to_bytes() {
            Ok(status) => {
                if let Err(err) = self.publisher.announce(&self.status_topic, status) {
                    warn!(session = %self.name, label = err.as_label(), "{err}");
                }
            }
            Err(err) => warn!(session = %self.name, "on-line status not encoded: {err}"),
        }

        if self.subscriptions.is_empty() {
            return;
        }
        match self.client.try_subscribe_many(self.subscriptions.clone()) {
            Ok(()) => {
                for filter in &self.subscriptions {
                    info!(session = %self.name, topic = %filter.path, qos = ?filter.qos, "subscribed");
                }
            }
            Err(err) => warn!(session = %self.name, "failed to subscribe: {err}"),
        }
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, AckTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
