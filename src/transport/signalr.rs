//! SignalR hub connection over WebSockets with the JSON hub protocol.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::config::ClientConfig;
use crate::protocol::{
    decode_handshake_response, decode_message, encode_message, encode_record, negotiate_url,
    websocket_url, HandshakeRequest, HubMessage, NegotiateResponse, RecordBuffer,
};
use crate::transport::keepalive::KeepAlive;
use crate::transport::{Transport, TransportEvent};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Frame {
    Data,
    Malformed(String),
    Closed(Option<String>),
}

enum Wake {
    Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Tick,
}

pub struct SignalRTransport {
    hub_url: String,
    skip_negotiation: bool,
    keep_alive_interval: Duration,
    server_timeout: Duration,
    http: reqwest::Client,
    stream: Option<WsStream>,
    records: RecordBuffer,
    subscriptions: HashSet<String>,
    keep_alive: KeepAlive,
    shutdown: Arc<AtomicBool>,
}

impl SignalRTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            hub_url: config.hub_url(),
            skip_negotiation: config.skip_negotiation,
            keep_alive_interval: config.keep_alive_interval,
            server_timeout: config.server_timeout,
            http: reqwest::Client::new(),
            stream: None,
            records: RecordBuffer::new(),
            subscriptions: HashSet::new(),
            keep_alive: KeepAlive::new(config.keep_alive_interval, config.server_timeout),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn hub_url(&self) -> &str {
        &self.hub_url
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Returns the `id` for the WebSocket url, or `None` when negotiation is skipped.
    async fn negotiate(&self) -> anyhow::Result<Option<String>> {
        if self.skip_negotiation {
            return Ok(None);
        }
        let url = negotiate_url(&self.hub_url)?;
        log::debug!("Negotiating at {}", url);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Negotiate request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow::anyhow!("Negotiate rejected: {}", e))?;
        let body: NegotiateResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Invalid negotiate response: {}", e))?;
        body.websocket_id().map(Some)
    }

    async fn handshake(&mut self) -> anyhow::Result<()> {
        self.send_text(encode_record(&HandshakeRequest::default())?)
            .await?;
        loop {
            if let Some(record) = self.records.next_record() {
                let response = decode_handshake_response(&record)?;
                return match response.error {
                    Some(err) => Err(anyhow::anyhow!("Handshake rejected: {}", err)),
                    None => Ok(()),
                };
            }
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Transport is not connected"))?;
            let frame = timeout(self.server_timeout, stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Handshake timeout after {:?}", self.server_timeout))?;
            match self.absorb(frame)? {
                Frame::Data => {}
                Frame::Malformed(reason) => {
                    return Err(anyhow::anyhow!("Invalid handshake response: {}", reason))
                }
                Frame::Closed(reason) => {
                    return Err(anyhow::anyhow!(
                        "Connection closed during handshake{}",
                        reason.map(|r| format!(": {}", r)).unwrap_or_default()
                    ))
                }
            }
        }
    }

    async fn send_text(&mut self, text: String) -> anyhow::Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Transport is not connected"))?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| anyhow::anyhow!("Write error: {}", e))?;
        self.keep_alive.mark_sent();
        Ok(())
    }

    /// Feed one WebSocket read into the record buffer.
    fn absorb(
        &mut self,
        frame: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> anyhow::Result<Frame> {
        match frame {
            Some(Ok(Message::Text(text))) => {
                self.keep_alive.mark_received();
                self.records.push(&text);
                Ok(Frame::Data)
            }
            Some(Ok(Message::Binary(bytes))) => {
                self.keep_alive.mark_received();
                match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        self.records.push(text);
                        Ok(Frame::Data)
                    }
                    Err(e) => Ok(Frame::Malformed(format!("binary frame is not UTF-8: {}", e))),
                }
            }
            Some(Ok(Message::Close(close))) => Ok(Frame::Closed(
                close
                    .map(|c| c.reason.to_string())
                    .filter(|reason| !reason.is_empty()),
            )),
            Some(Ok(_)) => {
                self.keep_alive.mark_received();
                Ok(Frame::Data)
            }
            Some(Err(e)) => Err(anyhow::anyhow!("Read error: {}", e)),
            None => Ok(Frame::Closed(None)),
        }
    }

    /// Next buffered record that the session cares about, if any.
    fn next_buffered_event(&mut self) -> Option<TransportEvent> {
        while let Some(record) = self.records.next_record() {
            match decode_message(&record) {
                Err(e) => {
                    return Some(TransportEvent::Malformed {
                        reason: e.to_string(),
                    })
                }
                Ok(HubMessage::Invocation {
                    target, arguments, ..
                }) => {
                    if self.subscriptions.contains(&target) {
                        return Some(TransportEvent::Invocation { target, arguments });
                    }
                    log::warn!("No client method with the name '{}' found", target);
                }
                Ok(HubMessage::Close { error, .. }) => {
                    return Some(TransportEvent::Closed { reason: error });
                }
                Ok(HubMessage::Ping) => {}
                Ok(other) => log::debug!("Ignoring hub message: {:?}", other),
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl Transport for SignalRTransport {
    async fn connect(&mut self) -> anyhow::Result<()> {
        if self.is_shutdown() {
            return Err(anyhow::anyhow!("Transport is shut down"));
        }
        if self.stream.is_some() {
            return Err(anyhow::anyhow!("Transport is already connected"));
        }
        let id = self.negotiate().await?;
        let url = websocket_url(&self.hub_url, id.as_deref())?;
        log::debug!("Connecting to {}", url);
        let (stream, _) = timeout(self.server_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| anyhow::anyhow!("Connect timeout after {:?}", self.server_timeout))?
            .map_err(|e| anyhow::anyhow!("WebSocket connect error: {}", e))?;
        self.stream = Some(stream);
        self.records = RecordBuffer::new();
        self.keep_alive = KeepAlive::new(self.keep_alive_interval, self.server_timeout);
        if let Err(e) = self.handshake().await {
            self.stream = None;
            return Err(e);
        }
        Ok(())
    }

    fn subscribe(&mut self, target: &str) {
        self.subscriptions.insert(target.to_string());
    }

    async fn invoke(&mut self, method: &str, arguments: Vec<Value>) -> anyhow::Result<()> {
        if self.is_shutdown() {
            return Err(anyhow::anyhow!("Transport is shut down"));
        }
        let text = encode_message(&HubMessage::invocation(method, arguments))?;
        log::debug!("Invoking {}", method);
        self.send_text(text).await
    }

    async fn recv(&mut self) -> anyhow::Result<TransportEvent> {
        loop {
            if self.is_shutdown() {
                return Err(anyhow::anyhow!("Transport is shut down"));
            }
            if let Some(event) = self.next_buffered_event() {
                return Ok(event);
            }

            let deadline = self.keep_alive.next_deadline();
            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| anyhow::anyhow!("Transport is not connected"))?;
            // Frames already waiting win over an expired deadline.
            let wake = tokio::select! {
                biased;
                frame = stream.next() => Wake::Frame(frame),
                _ = sleep_until(deadline) => Wake::Tick,
            };

            match wake {
                Wake::Frame(frame) => match self.absorb(frame)? {
                    Frame::Data => {}
                    Frame::Malformed(reason) => return Ok(TransportEvent::Malformed { reason }),
                    Frame::Closed(reason) => {
                        self.stream = None;
                        return Ok(TransportEvent::Closed { reason });
                    }
                },
                Wake::Tick => {
                    if self.keep_alive.is_timed_out() {
                        return Err(anyhow::anyhow!(
                            "Server timeout elapsed without receiving a message ({:?})",
                            self.keep_alive.server_timeout()
                        ));
                    }
                    if self.keep_alive.ping_due() {
                        self.send_text(encode_message(&HubMessage::Ping)?).await?;
                    }
                }
            }
        }
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(mut stream) = self.stream.take() {
            let close = encode_message(&HubMessage::Close {
                error: None,
                allow_reconnect: None,
            })?;
            if let Err(e) = stream.send(Message::Text(close)).await {
                log::debug!("Close message not delivered: {}", e);
            }
            if let Err(e) = stream.close(None).await {
                log::debug!("WebSocket close failed: {}", e);
            }
        }
        Ok(())
    }
}
