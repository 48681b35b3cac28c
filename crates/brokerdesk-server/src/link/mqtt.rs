//! [`BrokerLink`] over `rumqttc`.
//!
//! The `EventLoop` is driven by one spawned task. It completes request
//! waiters from outgoing packets and acks, feeds inbound publishes into the
//! ingestion queue, and reconnects with exponential backoff.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use brokerdesk_core::config::MqttConfig;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode,
};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::pending::{AckKind, AckResult, PendingAcks};
use super::{
    BrokerLink, ConnectParams, Connected, InboundMessage, LinkConnector, LinkError, LinkEvent,
    LinkState, qos_level,
};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// State shared between the link handle and its event-loop task.
struct Shared {
    pending: PendingAcks,
    state: watch::Sender<LinkState>,
    closing: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Connected);
        Self {
            pending: PendingAcks::default(),
            state,
            closing: AtomicBool::new(false),
        }
    }

    fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }
}

/// A connected `rumqttc` client.
pub struct MqttLink {
    client: AsyncClient,
    shared: Arc<Shared>,
    /// Keeps waiter order identical to request-channel order.
    send_lock: tokio::sync::Mutex<()>,
    operation_timeout: Duration,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttLink {
    async fn acknowledged<F>(&self, kind: AckKind, awaits_ack: bool, send: F) -> AckResult
    where
        F: Future<Output = Result<(), rumqttc::ClientError>> + Send,
    {
        if let LinkState::Disconnected(_) = self.state() {
            return Err(LinkError::Closed);
        }

        let (ticket, rx) = {
            let _guard = self.send_lock.lock().await;
            let (ticket, rx) = self.shared.pending.enqueue(kind, awaits_ack);
            match tokio::time::timeout(self.operation_timeout, send).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.shared.pending.cancel_last();
                    debug!(error = %e, ?kind, "Client refused request");
                    return Err(match self.state() {
                        LinkState::Disconnected(_) => LinkError::Closed,
                        _ => LinkError::Rejected(e.to_string()),
                    });
                }
                // The request channel stayed full; nothing was handed over.
                Err(_) => {
                    self.shared.pending.cancel_last();
                    return Err(LinkError::Timeout);
                }
            }
            (ticket, rx)
        };

        match tokio::time::timeout(self.operation_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LinkError::ConnectionLost),
            Err(_) => {
                self.shared.pending.abandon(ticket);
                Err(LinkError::Timeout)
            }
        }
    }
}

#[async_trait]
impl BrokerLink for MqttLink {
    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), LinkError> {
        if qos == QoS::ExactlyOnce {
            return Err(LinkError::Rejected("QoS 2 is not supported".into()));
        }
        self.acknowledged(AckKind::Subscribe, true, self.client.subscribe(topic, qos))
            .await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.acknowledged(AckKind::Unsubscribe, true, self.client.unsubscribe(topic))
            .await
    }

    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), LinkError> {
        if qos == QoS::ExactlyOnce {
            return Err(LinkError::Rejected("QoS 2 is not supported".into()));
        }
        let awaits_ack = qos != QoS::AtMostOnce;
        self.acknowledged(
            AckKind::Publish,
            awaits_ack,
            self.client.publish(topic, qos, retain, payload),
        )
        .await
    }

    async fn disconnect(&self, grace: Duration) {
        self.shared.closing.store(true, Ordering::Release);
        if let Err(e) = self.client.try_disconnect() {
            debug!(error = %e, "DISCONNECT not queued");
        }

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = driver {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!(grace_ms = grace.as_millis(), "Event loop did not stop in time, aborting");
                handle.abort();
            }
        }

        self.shared
            .set_state(LinkState::Disconnected("closed by client".into()));
        self.shared.pending.close(&LinkError::Closed);
        info!("Disconnected from broker");
    }

    fn state(&self) -> LinkState {
        self.shared.state.borrow().clone()
    }
}

impl Drop for MqttLink {
    fn drop(&mut self) {
        if let Some(handle) = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Connects [`MqttLink`]s using the configured MQTT tuning.
pub struct MqttConnector {
    config: MqttConfig,
}

impl MqttConnector {
    pub const fn new(config: MqttConfig) -> Self {
        Self { config }
    }

    fn options(&self, params: &ConnectParams) -> Result<MqttOptions, LinkError> {
        // MqttOptions panics on these rather than reporting them.
        if params.client_id.is_empty() || params.client_id.starts_with(' ') {
            return Err(LinkError::Connect(format!(
                "invalid client id {:?}",
                params.client_id
            )));
        }

        let mut options =
            MqttOptions::new(params.client_id.as_str(), params.host.as_str(), params.port);
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(self.config.clean_session);
        if !params.username.is_empty() {
            options.set_credentials(params.username.as_str(), params.password.as_str());
        }
        Ok(options)
    }
}

#[async_trait]
impl LinkConnector for MqttConnector {
    async fn connect(
        &self,
        params: ConnectParams,
        inbound: mpsc::Sender<InboundMessage>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Connected, LinkError> {
        let options = self.options(&params)?;
        let (client, mut eventloop) = AsyncClient::new(options, self.config.request_capacity);

        let session_present =
            tokio::time::timeout(self.config.connect_timeout(), await_connack(&mut eventloop))
                .await
                .map_err(|_| LinkError::Timeout)??;

        info!(
            host = %params.host,
            port = params.port,
            client_id = %params.client_id,
            session_present,
            "Connected to broker"
        );

        let shared = Arc::new(Shared::new());
        let driver = tokio::spawn(drive(
            eventloop,
            Arc::clone(&shared),
            inbound,
            events,
            self.config.ping_timeout(),
        ));
        let link = MqttLink {
            client,
            shared,
            send_lock: tokio::sync::Mutex::new(()),
            operation_timeout: self.config.operation_timeout(),
            driver: Mutex::new(Some(driver)),
        };

        Ok(Connected {
            link: Arc::new(link),
            session_present,
        })
    }
}

/// Poll until the first CONNACK. Returns whether the broker resumed a session.
async fn await_connack(eventloop: &mut EventLoop) -> Result<bool, LinkError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(ack.session_present)
                } else {
                    Err(LinkError::Refused(format!("{:?}", ack.code)))
                };
            }
            Ok(_) => {}
            Err(ConnectionError::ConnectionRefused(code)) => {
                return Err(LinkError::Refused(format!("{code:?}")));
            }
            Err(e) => return Err(LinkError::Connect(e.to_string())),
        }
    }
}

/// Errors after which reconnecting cannot help.
const fn is_fatal(err: &ConnectionError) -> bool {
    matches!(
        err,
        ConnectionError::ConnectionRefused(_)
            | ConnectionError::NotConnAck(_)
            | ConnectionError::RequestsDone
    )
}

async fn drive(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    inbound: mpsc::Sender<InboundMessage>,
    events: mpsc::Sender<LinkEvent>,
    ping_timeout: Duration,
) {
    let mut backoff = INITIAL_BACKOFF;
    // Set while a PINGREQ is unanswered.
    let mut ping_deadline: Option<Instant> = None;

    loop {
        let polled = match ping_deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, eventloop.poll()).await {
                Ok(polled) => polled,
                Err(_) => {
                    warn!(
                        ping_timeout_ms = ping_timeout.as_millis(),
                        "No PINGRESP in time, dropping the connection"
                    );
                    ping_deadline = None;
                    eventloop.clean();
                    shared.pending.connection_lost();
                    shared.set_state(LinkState::Reconnecting);
                    continue;
                }
            },
            None => eventloop.poll().await,
        };

        match polled {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                backoff = INITIAL_BACKOFF;
                ping_deadline = None;
                shared.set_state(LinkState::Connected);
                info!(session_present = ack.session_present, "Reconnected to broker");
                if !ack.session_present && events.try_send(LinkEvent::SessionLost).is_err() {
                    warn!("Session lost but nobody is listening for it");
                }
            }
            Ok(Event::Incoming(packet)) => {
                ping_deadline = None;
                on_incoming(&shared, &inbound, packet);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect))
                if shared.closing.load(Ordering::Acquire) =>
            {
                debug!("DISCONNECT written, stopping event loop");
                break;
            }
            Ok(Event::Outgoing(Outgoing::PingReq)) => {
                ping_deadline.get_or_insert_with(|| Instant::now() + ping_timeout);
            }
            Ok(Event::Outgoing(outgoing)) => on_outgoing(&shared, outgoing),
            Err(e) => {
                ping_deadline = None;
                shared.pending.connection_lost();
                if shared.closing.load(Ordering::Acquire) {
                    break;
                }
                if is_fatal(&e) {
                    error!(error = %e, "Broker connection failed permanently");
                    shared.set_state(LinkState::Disconnected(e.to_string()));
                    break;
                }

                warn!(
                    error = %e,
                    retry_in_secs = backoff.as_secs(),
                    "Broker connection lost, reconnecting"
                );
                shared.set_state(LinkState::Reconnecting);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    shared.pending.close(&LinkError::Closed);
    debug!("Event loop stopped");
}

fn on_incoming(shared: &Shared, inbound: &mpsc::Sender<InboundMessage>, packet: Packet) {
    match packet {
        Packet::Publish(publish) => {
            let message = InboundMessage {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
                qos: qos_level(publish.qos),
                retained: publish.retain,
            };
            match inbound.try_send(message) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(message)) => {
                    warn!(topic = %message.topic, "Ingestion queue full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(message)) => {
                    debug!(topic = %message.topic, "Ingestion stopped, dropping message");
                }
            }
        }
        Packet::SubAck(ack) => {
            let rejected = ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure));
            let result = if rejected {
                Err(LinkError::Rejected("broker refused the subscription".into()))
            } else {
                Ok(())
            };
            shared.pending.on_ack(AckKind::Subscribe, ack.pkid, result);
        }
        Packet::UnsubAck(ack) => shared.pending.on_ack(AckKind::Unsubscribe, ack.pkid, Ok(())),
        Packet::PubAck(ack) => shared.pending.on_ack(AckKind::Publish, ack.pkid, Ok(())),
        Packet::Disconnect => warn!("Broker sent DISCONNECT"),
        _ => {}
    }
}

fn on_outgoing(shared: &Shared, outgoing: Outgoing) {
    match outgoing {
        Outgoing::Subscribe(pkid) => shared.pending.on_outgoing(AckKind::Subscribe, pkid),
        Outgoing::Unsubscribe(pkid) => shared.pending.on_outgoing(AckKind::Unsubscribe, pkid),
        Outgoing::Publish(pkid) => shared.pending.on_outgoing(AckKind::Publish, pkid),
        _ => {}
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
#[path = "mqtt_tests.rs"]
mod tests;
