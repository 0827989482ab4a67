//! One hub connection driven from connect to close.
//!
//! A [`Session`] owns the transport, the bot and the state field. `run`
//! connects, registers the event handlers, sends the start verb for the
//! configured [`PlayMode`](crate::PlayMode) and then handles server events one
//! at a time until the hub closes the connection, the transport fails, or a
//! [`SessionHandle`] requests a stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tokio::sync::Notify;

use crate::bot::Bot;
use crate::common::{DispatchError, SessionError, SessionOutcome, SessionState};
use crate::config::{ClientConfig, BOARD_SIZE};
use crate::transport::{Transport, TransportEvent};

pub const REQUEST_ARRANGEMENT: &str = "requestArrangement";
pub const REQUEST_STEP: &str = "requestStep";
pub const RECEIVE_MESSAGE: &str = "receiveMessage";

pub const RECEIVE_ARRANGEMENT: &str = "ReceiveArrangement";
pub const RECEIVE_STEP: &str = "ReceiveStep";

/// Server events the session subscribes to, in registration order.
pub const SERVER_EVENTS: [&str; 3] = [REQUEST_ARRANGEMENT, REQUEST_STEP, RECEIVE_MESSAGE];

struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

/// Cloneable view of a running session: read its state or ask it to stop.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<RwLock<SessionState>>,
    stop: Arc<StopSignal>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        *self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Request an orderly stop. Idempotent; safe from any task.
    pub fn stop(&self) {
        if !self.stop.requested.swap(true, Ordering::SeqCst) {
            log::debug!("[Session] stop requested");
        }
        // notify_one stores a permit, so a stop before the loop starts still lands.
        self.stop.notify.notify_one();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop.requested.load(Ordering::SeqCst)
    }
}

pub struct Session {
    config: ClientConfig,
    bot: Box<dyn Bot>,
    transport: Box<dyn Transport>,
    handle: SessionHandle,
    on_state_change: Option<Box<dyn Fn(SessionState) + Send + Sync>>,
    transport_stopped: bool,
    dropped_events: usize,
}

impl Session {
    pub fn new(config: ClientConfig, bot: Box<dyn Bot>, transport: Box<dyn Transport>) -> Self {
        Self {
            config,
            bot,
            transport,
            handle: SessionHandle {
                state: Arc::new(RwLock::new(SessionState::Disconnected)),
                stop: Arc::new(StopSignal {
                    requested: AtomicBool::new(false),
                    notify: Notify::new(),
                }),
            },
            on_state_change: None,
            transport_stopped: false,
            dropped_events: 0,
        }
    }

    /// Called on every state transition, from the task running the session.
    pub fn set_on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(SessionState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> SessionState {
        self.handle.state()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Events dropped so far because of malformed payloads or bot failures.
    pub fn dropped_events(&self) -> usize {
        self.dropped_events
    }

    /// Give the bot back so it can play another match.
    pub fn into_bot(self) -> Box<dyn Bot> {
        self.bot
    }

    fn set_state(&self, next: SessionState) {
        {
            let mut state = self
                .handle
                .state
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *state == next {
                return;
            }
            log::debug!("[Session] {} -> {}", *state, next);
            *state = next;
        }
        if let Some(callback) = &self.on_state_change {
            callback(next);
        }
    }

    /// Stop the transport at most once per session.
    async fn shutdown_transport(&mut self) {
        if self.transport_stopped {
            return;
        }
        self.transport_stopped = true;
        if let Err(e) = self.transport.stop().await {
            log::warn!("[Session] transport stop failed: {:#}", e);
        }
    }

    async fn fail(&mut self, err: SessionError) -> SessionError {
        log::error!("[Session] {}", err);
        self.set_state(SessionState::Errored);
        self.shutdown_transport().await;
        err
    }

    async fn finish_stopped(&mut self) -> SessionOutcome {
        self.shutdown_transport().await;
        self.set_state(SessionState::Closed);
        log::info!("[Session] disconnected (stopped)");
        SessionOutcome::Stopped
    }

    /// Drive the session to completion. May be called once.
    pub async fn run(&mut self) -> Result<SessionOutcome, SessionError> {
        let current = self.state();
        if current != SessionState::Disconnected {
            return Err(SessionError::AlreadyStarted(current));
        }
        if self.handle.is_stop_requested() {
            return Ok(self.finish_stopped().await);
        }

        self.set_state(SessionState::Connecting);
        let stop = Arc::clone(&self.handle.stop);
        let connected = tokio::select! {
            biased;
            _ = stop.notify.notified() => None,
            res = self.transport.connect() => Some(res),
        };
        match connected {
            None => return Ok(self.finish_stopped().await),
            Some(Err(e)) => return Err(self.fail(SessionError::Connection(e)).await),
            Some(Ok(())) => {}
        }
        self.set_state(SessionState::Connected);
        log::info!("[Session] connected to {}", self.config.hub_url());

        // Handlers go in before the start verb so nothing the hub sends in
        // response can arrive unhandled.
        for event in SERVER_EVENTS {
            self.transport.subscribe(event);
        }
        let verb = self.config.mode.verb();
        let name = self.player_name();
        if let Err(e) = self.transport.invoke(verb, vec![Value::from(name.clone())]).await {
            return Err(self.fail(SessionError::Transport(e)).await);
        }
        self.set_state(SessionState::Playing);
        log::info!("[Session] started {} as {}", verb, name);

        loop {
            let next = tokio::select! {
                biased;
                _ = stop.notify.notified() => None,
                res = self.transport.recv() => Some(res),
            };
            if self.handle.is_stop_requested() {
                return Ok(self.finish_stopped().await);
            }
            match next {
                None => return Ok(self.finish_stopped().await),
                Some(Err(e)) => return Err(self.fail(SessionError::Transport(e)).await),
                Some(Ok(TransportEvent::Closed { reason })) => {
                    self.shutdown_transport().await;
                    self.set_state(SessionState::Closed);
                    match &reason {
                        Some(r) => log::info!("[Session] disconnected: {}", r),
                        None => log::info!("[Session] disconnected"),
                    }
                    return Ok(SessionOutcome::Closed { reason });
                }
                Some(Ok(TransportEvent::Malformed { reason })) => {
                    self.drop_event(DispatchError::MalformedPayload {
                        event: "<undecodable>".to_string(),
                        reason,
                    });
                }
                Some(Ok(TransportEvent::Invocation { target, arguments })) => {
                    match self.dispatch(&target, arguments).await {
                        Ok(()) => {}
                        Err(Dispatch::Stopped) => return Ok(self.finish_stopped().await),
                        Err(Dispatch::Dropped(err)) => self.drop_event(err),
                        Err(Dispatch::Transport(e)) => {
                            return Err(self.fail(SessionError::Transport(e)).await)
                        }
                    }
                }
            }
        }
    }

    fn drop_event(&mut self, err: DispatchError) {
        self.dropped_events += 1;
        log::warn!("[Session] dropped event: {}", err);
    }

    /// Name sent with the start verb: the configured player name, or the
    /// bot's own name when none is configured.
    pub fn player_name(&self) -> String {
        if self.config.player_name.trim().is_empty() {
            self.bot.name()
        } else {
            self.config.player_name.clone()
        }
    }

    /// Run a bot call unless a stop arrives first.
    async fn ask_bot<T, F>(stop: &StopSignal, event: &str, call: F) -> Result<T, Dispatch>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        tokio::select! {
            biased;
            _ = stop.notify.notified() => Err(Dispatch::Stopped),
            res = call => res.map_err(|error| {
                Dispatch::Dropped(DispatchError::Bot {
                    event: event.to_string(),
                    error,
                })
            }),
        }
    }

    /// Send a reply unless a stop was requested while the bot was working.
    async fn reply(&mut self, method: &str, arguments: Vec<Value>) -> Result<(), Dispatch> {
        if self.handle.is_stop_requested() {
            return Err(Dispatch::Stopped);
        }
        self.transport
            .invoke(method, arguments)
            .await
            .map_err(Dispatch::Transport)
    }

    async fn dispatch(&mut self, target: &str, arguments: Vec<Value>) -> Result<(), Dispatch> {
        let stop = Arc::clone(&self.handle.stop);
        match target {
            REQUEST_ARRANGEMENT => {
                let arrangement =
                    Self::ask_bot(&stop, target, self.bot.provide_arrangement()).await?;
                let payload = arrangement.to_payload().map_err(|error| DispatchError::Bot {
                    event: target.to_string(),
                    error,
                })?;
                self.reply(RECEIVE_ARRANGEMENT, vec![Value::String(payload)])
                    .await?;
                log::info!("[Session] arrangement sent");
            }
            REQUEST_STEP => {
                let step = Self::ask_bot(&stop, target, self.bot.provide_step()).await?;
                if self.config.validate_steps {
                    step.validate(BOARD_SIZE).map_err(DispatchError::from)?;
                }
                self.reply(RECEIVE_STEP, step.to_arguments()).await?;
                log::info!("[Session] step ({}, {}) sent", step.x, step.y);
            }
            RECEIVE_MESSAGE => {
                let text = message_text(&arguments).ok_or_else(|| DispatchError::MalformedPayload {
                    event: target.to_string(),
                    reason: format!("expected a string argument, got {:?}", arguments),
                })?;
                log::info!("[Session] received: {}", text);
                self.bot.on_message(text);
            }
            other => log::debug!("[Session] no handler for {}", other),
        }
        Ok(())
    }
}

/// Outcome of a failed dispatch: drop the event, stop, or end the session.
enum Dispatch {
    Dropped(DispatchError),
    Stopped,
    Transport(anyhow::Error),
}

impl From<DispatchError> for Dispatch {
    fn from(err: DispatchError) -> Self {
        Dispatch::Dropped(err)
    }
}

fn message_text(arguments: &[Value]) -> Option<&str> {
    match arguments {
        [Value::String(text), ..] => Some(text.as_str()),
        _ => None,
    }
}
