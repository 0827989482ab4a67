//! In-process hub for tests and offline runs.
//!
//! [`InMemoryTransport::pair`] returns the client side, which implements
//! [`Transport`], and a [`HubPeer`] that plays the server: it pushes events,
//! scripts replies to invocations and records every call the client made.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{Arrangement, Step};
use crate::session::{
    RECEIVE_ARRANGEMENT, RECEIVE_MESSAGE, RECEIVE_STEP, REQUEST_ARRANGEMENT, REQUEST_STEP,
};
use crate::transport::{Transport, TransportEvent};

/// Calls the client side made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Connect,
    Subscribe(String),
    Invoke { method: String, arguments: Vec<Value> },
    Stop,
}

type Delivery = Result<TransportEvent, String>;

#[derive(Default)]
struct HubState {
    subscriptions: HashSet<String>,
    calls: Vec<TransportCall>,
    replies: HashMap<String, Vec<TransportEvent>>,
    connect_error: Option<String>,
    hold_connect: bool,
    invoke_errors: HashMap<String, String>,
    dropped: Vec<String>,
    stopped: bool,
}

#[derive(Clone)]
struct Shared(Arc<Mutex<HubState>>);

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event, applying the subscription filter to invocations.
    fn deliver(&self, tx: &mpsc::UnboundedSender<Delivery>, event: TransportEvent) -> bool {
        let mut state = self.lock();
        if let TransportEvent::Invocation { target, .. } = &event {
            if !state.subscriptions.contains(target) {
                state.dropped.push(target.clone());
                return false;
            }
        }
        tx.send(Ok(event)).is_ok()
    }
}

pub struct InMemoryTransport {
    shared: Shared,
    events_tx: mpsc::UnboundedSender<Delivery>,
    events_rx: mpsc::UnboundedReceiver<Delivery>,
    invocations_tx: mpsc::UnboundedSender<(String, Vec<Value>)>,
}

/// Server side of an [`InMemoryTransport`]. Dropping it fails the connection.
pub struct HubPeer {
    shared: Shared,
    events_tx: mpsc::UnboundedSender<Delivery>,
    invocations_rx: mpsc::UnboundedReceiver<(String, Vec<Value>)>,
}

impl InMemoryTransport {
    pub fn pair() -> (Self, HubPeer) {
        let shared = Shared(Arc::new(Mutex::new(HubState::default())));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (invocations_tx, invocations_rx) = mpsc::unbounded_channel();
        (
            Self {
                shared: shared.clone(),
                events_tx: events_tx.clone(),
                events_rx,
                invocations_tx,
            },
            HubPeer {
                shared,
                events_tx,
                invocations_rx,
            },
        )
    }
}

#[async_trait::async_trait]
impl Transport for InMemoryTransport {
    async fn connect(&mut self) -> anyhow::Result<()> {
        let (hold, error) = {
            let mut state = self.shared.lock();
            state.calls.push(TransportCall::Connect);
            (state.hold_connect, state.connect_error.clone())
        };
        if hold {
            std::future::pending::<()>().await;
        }
        match error {
            Some(err) => Err(anyhow::anyhow!(err)),
            None => Ok(()),
        }
    }

    fn subscribe(&mut self, target: &str) {
        let mut state = self.shared.lock();
        state.calls.push(TransportCall::Subscribe(target.to_string()));
        state.subscriptions.insert(target.to_string());
    }

    async fn invoke(&mut self, method: &str, arguments: Vec<Value>) -> anyhow::Result<()> {
        let replies = {
            let mut state = self.shared.lock();
            if state.stopped {
                return Err(anyhow::anyhow!("Transport is shut down"));
            }
            state.calls.push(TransportCall::Invoke {
                method: method.to_string(),
                arguments: arguments.clone(),
            });
            if let Some(err) = state.invoke_errors.get(method) {
                return Err(anyhow::anyhow!(err.clone()));
            }
            state.replies.get(method).cloned().unwrap_or_default()
        };
        // The peer may have gone away; the call itself still counts as sent.
        let _ = self.invocations_tx.send((method.to_string(), arguments));
        for event in replies {
            self.shared.deliver(&self.events_tx, event);
        }
        Ok(())
    }

    async fn recv(&mut self) -> anyhow::Result<TransportEvent> {
        if self.shared.lock().stopped {
            return Err(anyhow::anyhow!("Transport is shut down"));
        }
        match self.events_rx.recv().await {
            Some(Ok(event)) => Ok(event),
            Some(Err(err)) => Err(anyhow::anyhow!(err)),
            None => Err(anyhow::anyhow!("Channel closed")),
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        let mut state = self.shared.lock();
        state.calls.push(TransportCall::Stop);
        state.stopped = true;
        Ok(())
    }
}

impl HubPeer {
    /// Make the next `connect` fail with the given message.
    pub fn fail_connect(&self, message: impl Into<String>) {
        self.shared.lock().connect_error = Some(message.into());
    }

    /// Keep every `connect` pending until the client gives up on it.
    pub fn hold_connect(&self) {
        self.shared.lock().hold_connect = true;
    }

    /// Make `invoke(method)` fail with the given message. The call is still recorded.
    pub fn fail_invoke(&self, method: impl Into<String>, message: impl Into<String>) {
        self.shared
            .lock()
            .invoke_errors
            .insert(method.into(), message.into());
    }

    /// Push these events synchronously from inside the client's `invoke(method)`.
    pub fn reply_to(&self, method: impl Into<String>, events: Vec<TransportEvent>) {
        self.shared.lock().replies.insert(method.into(), events);
    }

    /// Push a named server event. Returns `false` when the client had no
    /// subscription for it and the event was dropped.
    pub fn emit(&self, target: &str, arguments: Vec<Value>) -> bool {
        self.shared
            .deliver(&self.events_tx, TransportEvent::invocation(target, arguments))
    }

    /// Push an event without the subscription filter.
    pub fn push(&self, event: TransportEvent) {
        let _ = self.events_tx.send(Ok(event));
    }

    pub fn close(&self, reason: Option<&str>) {
        self.push(TransportEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Report a connection failure on the client's next `recv`.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.events_tx.send(Err(message.into()));
    }

    /// Next invocation the client sent, or `None` once the client is gone.
    pub async fn next_invocation(&mut self) -> Option<(String, Vec<Value>)> {
        self.invocations_rx.recv().await
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.shared.lock().calls.clone()
    }

    /// Invocations recorded so far, as (method, arguments).
    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.shared
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Invoke { method, arguments } => {
                    Some((method.clone(), arguments.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn stop_count(&self) -> usize {
        self.shared
            .lock()
            .calls
            .iter()
            .filter(|call| matches!(call, TransportCall::Stop))
            .count()
    }

    /// Targets dropped because the client had not subscribed to them.
    pub fn dropped(&self) -> Vec<String> {
        self.shared.lock().dropped.clone()
    }

    pub fn is_subscribed(&self, target: &str) -> bool {
        self.shared.lock().subscriptions.contains(target)
    }
}

impl Drop for HubPeer {
    fn drop(&mut self) {
        let _ = self.events_tx.send(Err("Channel closed".to_string()));
    }
}

/// What a scripted match collected from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport {
    pub start_verb: String,
    pub player: String,
    pub arrangement: Option<Arrangement>,
    pub steps: Vec<Step>,
}

impl HubPeer {
    /// Play the server side of a short match: wait for the start verb, ask
    /// for an arrangement, ask for `turns` steps, then close the connection.
    pub async fn play_scripted_match(&mut self, turns: usize) -> anyhow::Result<MatchReport> {
        let (start_verb, args) = self
            .next_invocation()
            .await
            .ok_or_else(|| anyhow::anyhow!("Client left before starting a match"))?;
        let player = args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut report = MatchReport {
            start_verb,
            player,
            arrangement: None,
            steps: Vec::new(),
        };

        self.emit(REQUEST_ARRANGEMENT, vec![]);
        let (method, args) = self.expect_invocation().await?;
        if method != RECEIVE_ARRANGEMENT {
            return Err(anyhow::anyhow!("Expected {}, got {}", RECEIVE_ARRANGEMENT, method));
        }
        let payload = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("{} without a string payload", RECEIVE_ARRANGEMENT))?;
        report.arrangement = Some(Arrangement::from_payload(payload)?);
        self.emit(RECEIVE_MESSAGE, vec![Value::from("arrangement accepted")]);

        for _ in 0..turns {
            self.emit(REQUEST_STEP, vec![]);
            let (method, args) = self.expect_invocation().await?;
            if method != RECEIVE_STEP {
                return Err(anyhow::anyhow!("Expected {}, got {}", RECEIVE_STEP, method));
            }
            let coord = |i: usize| {
                args.get(i)
                    .and_then(Value::as_u64)
                    .and_then(|v| u8::try_from(v).ok())
                    .ok_or_else(|| anyhow::anyhow!("{} argument {} is not a coordinate", RECEIVE_STEP, i))
            };
            report.steps.push(Step::new(coord(0)?, coord(1)?));
        }

        self.emit(RECEIVE_MESSAGE, vec![Value::from("match over")]);
        self.close(Some("match over"));
        Ok(report)
    }

    async fn expect_invocation(&mut self) -> anyhow::Result<(String, Vec<Value>)> {
        self.next_invocation()
            .await
            .ok_or_else(|| anyhow::anyhow!("Client left mid-match"))
    }
}
