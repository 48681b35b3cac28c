//! In-memory [`BrokerLink`] and [`LinkConnector`] for tests.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    BrokerLink, ConnectParams, Connected, InboundMessage, LinkConnector, LinkError, LinkEvent,
    LinkState, QoS,
};

/// A call observed by [`FakeLink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LinkCall {
    Subscribe(String),
    Unsubscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    Disconnect,
}

/// Records every call and answers from configured rules.
pub(crate) struct FakeLink {
    calls: Mutex<Vec<LinkCall>>,
    rejected: Mutex<HashSet<String>>,
    timed_out: Mutex<HashSet<String>>,
    state: Mutex<LinkState>,
}

impl FakeLink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            rejected: Mutex::new(HashSet::new()),
            timed_out: Mutex::new(HashSet::new()),
            state: Mutex::new(LinkState::Connected),
        })
    }

    /// Answer requests for `topic` with a broker rejection.
    pub(crate) fn reject(&self, topic: &str) {
        self.rejected.lock().unwrap().insert(topic.to_string());
    }

    /// Never acknowledge requests for `topic`.
    pub(crate) fn time_out(&self, topic: &str) {
        self.timed_out.lock().unwrap().insert(topic.to_string());
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
    }

    pub(crate) fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Subscribe(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn unsubscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                LinkCall::Unsubscribe(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    fn answer(&self, topic: &str, call: LinkCall) -> Result<(), LinkError> {
        self.calls.lock().unwrap().push(call);
        if matches!(*self.state.lock().unwrap(), LinkState::Disconnected(_)) {
            return Err(LinkError::Closed);
        }
        if self.timed_out.lock().unwrap().contains(topic) {
            return Err(LinkError::Timeout);
        }
        if self.rejected.lock().unwrap().contains(topic) {
            return Err(LinkError::Rejected(format!("broker refused {topic}")));
        }
        Ok(())
    }
}

#[async_trait]
impl BrokerLink for FakeLink {
    async fn subscribe(&self, topic: &str, _qos: QoS) -> Result<(), LinkError> {
        self.answer(topic, LinkCall::Subscribe(topic.to_string()))
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.answer(topic, LinkCall::Unsubscribe(topic.to_string()))
    }

    async fn publish(
        &self,
        topic: &str,
        _qos: QoS,
        _retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), LinkError> {
        self.answer(
            topic,
            LinkCall::Publish {
                topic: topic.to_string(),
                payload,
            },
        )
    }

    async fn disconnect(&self, _grace: Duration) {
        self.calls.lock().unwrap().push(LinkCall::Disconnect);
        self.set_state(LinkState::Disconnected("closed by client".into()));
    }

    fn state(&self) -> LinkState {
        self.state.lock().unwrap().clone()
    }
}

/// Hands out one shared [`FakeLink`] and keeps the channels the session
/// passed in, so tests can inject inbound traffic.
pub(crate) struct FakeConnector {
    pub(crate) link: Arc<FakeLink>,
    session_present: bool,
    failure: Mutex<Option<LinkError>>,
    inbound: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    events: Mutex<Option<mpsc::Sender<LinkEvent>>>,
    connects: Mutex<Vec<ConnectParams>>,
}

impl FakeConnector {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_session_present(false)
    }

    pub(crate) fn with_session_present(session_present: bool) -> Arc<Self> {
        Arc::new(Self {
            link: FakeLink::new(),
            session_present,
            failure: Mutex::new(None),
            inbound: Mutex::new(None),
            events: Mutex::new(None),
            connects: Mutex::new(Vec::new()),
        })
    }

    /// Make the next connect attempt fail.
    pub(crate) fn fail_next(&self, error: LinkError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub(crate) fn inbound(&self) -> mpsc::Sender<InboundMessage> {
        self.inbound.lock().unwrap().clone().unwrap()
    }

    pub(crate) fn events(&self) -> mpsc::Sender<LinkEvent> {
        self.events.lock().unwrap().clone().unwrap()
    }

    pub(crate) fn connects(&self) -> Vec<ConnectParams> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl LinkConnector for FakeConnector {
    async fn connect(
        &self,
        params: ConnectParams,
        inbound: mpsc::Sender<InboundMessage>,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Connected, LinkError> {
        self.connects.lock().unwrap().push(params);
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }

        *self.inbound.lock().unwrap() = Some(inbound);
        *self.events.lock().unwrap() = Some(events);
        self.link.set_state(LinkState::Connected);

        Ok(Connected {
            link: Arc::clone(&self.link) as Arc<dyn BrokerLink>,
            session_present: self.session_present,
        })
    }
}
