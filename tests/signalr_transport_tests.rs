/// SignalRTransport against a loopback hub built on tokio-tungstenite.
use std::sync::{Arc, Mutex};

use cybertank::{
    sample_arrangement, Arrangement, Bot, ClientConfig, FixtureBot, PlayMode, Session,
    SessionError, SessionOutcome, SignalRTransport, Step, Transport, TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const RS: char = '\u{1e}';

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Option<String> {
    while let Some(msg) = ws.next().await {
        match msg.ok()? {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Next non-ping record from the client, parsed.
async fn next_record(ws: &mut WebSocketStream<TcpStream>) -> Option<Value> {
    loop {
        let text = next_text(ws).await?;
        for record in text.split(RS).filter(|r| !r.is_empty()) {
            let value: Value = serde_json::from_str(record).ok()?;
            if value["type"] != json!(6) {
                return Some(value);
            }
        }
    }
}

async fn accept_hub(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let handshake = next_text(&mut ws).await.unwrap();
    assert_eq!(handshake, format!("{{\"protocol\":\"json\",\"version\":1}}{}", RS));
    ws.send(Message::Text(format!("{{}}{}", RS))).await.unwrap();
    ws
}

fn loopback_config(addr: std::net::SocketAddr, mode: PlayMode) -> ClientConfig {
    ClientConfig::new(format!("http://{}", addr), mode, "loopback").with_skip_negotiation(true)
}

#[tokio::test]
async fn test_full_match_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept_hub(&listener).await;
        let start = next_record(&mut ws).await.unwrap();
        assert_eq!(start["target"], json!("Fight"));
        assert_eq!(start["arguments"], json!(["loopback"]));

        // Two records in one frame, plus an event nobody subscribed to.
        let batch = format!(
            "{}{}{}{}{}{}",
            json!({"type": 1, "target": "requestArrangement", "arguments": []}),
            RS,
            json!({"type": 1, "target": "unknownEvent", "arguments": []}),
            RS,
            json!({"type": 1, "target": "requestStep", "arguments": []}),
            RS,
        );
        ws.send(Message::Text(batch)).await.unwrap();

        let arrangement = next_record(&mut ws).await.unwrap();
        let step = next_record(&mut ws).await.unwrap();

        ws.send(Message::Text(format!(
            "{}{}",
            json!({"type": 1, "target": "receiveMessage", "arguments": ["gg"]}),
            RS
        )))
        .await
        .unwrap();
        ws.send(Message::Text(format!(
            "{}{}",
            json!({"type": 7, "error": "match over"}),
            RS
        )))
        .await
        .unwrap();

        let mut trailing = Vec::new();
        while let Some(record) = next_record(&mut ws).await {
            trailing.push(record);
        }
        (arrangement, step, trailing)
    });

    let config = loopback_config(addr, PlayMode::Fight);
    let transport = SignalRTransport::new(&config);
    let mut session = Session::new(config, Box::new(FixtureBot::new("loopback")), Box::new(transport));
    let outcome = session.run().await.unwrap();
    assert_eq!(
        outcome,
        SessionOutcome::Closed {
            reason: Some("match over".to_string())
        }
    );
    assert_eq!(session.dropped_events(), 0);

    let (arrangement, step, trailing) = server.await.unwrap();
    assert_eq!(arrangement["type"], json!(1));
    assert_eq!(arrangement["target"], json!("ReceiveArrangement"));
    let payload = arrangement["arguments"][0].as_str().unwrap();
    assert!(payload.starts_with("[[1,0,0,1,0,0,0,0,1,1]"));
    assert_eq!(step["target"], json!("ReceiveStep"));
    assert_eq!(step["arguments"], json!([1, 0]));
    assert_eq!(trailing, vec![json!({"type": 7})]);
}

#[tokio::test]
async fn test_negotiate_then_connect_with_token() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ws_uri = Arc::new(Mutex::new(String::new()));
    let seen_uri = Arc::clone(&ws_uri);

    let server = tokio::spawn(async move {
        let (mut http, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = http.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            request.extend_from_slice(&chunk[..n]);
        }
        let head = String::from_utf8_lossy(&request).to_string();
        let body = json!({
            "negotiateVersion": 1,
            "connectionId": "abc",
            "connectionToken": "tok-123",
            "availableTransports": [{"transport": "WebSockets", "transferFormats": ["Text", "Binary"]}]
        })
        .to_string();
        let reply = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        http.write_all(reply.as_bytes()).await.unwrap();
        http.shutdown().await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen_uri.lock().unwrap() = req.uri().to_string();
            Ok(resp)
        })
        .await
        .unwrap();
        next_text(&mut ws).await.unwrap();
        ws.send(Message::Text(format!("{{}}{}", RS))).await.unwrap();
        let start = next_record(&mut ws).await.unwrap();
        ws.send(Message::Text(format!("{}{}", json!({"type": 7}), RS)))
            .await
            .unwrap();
        while next_record(&mut ws).await.is_some() {}
        (head, start)
    });

    let config = ClientConfig::new(format!("http://{}", addr), PlayMode::Debug, "negotiator");
    let transport = SignalRTransport::new(&config);
    let mut session =
        Session::new(config, Box::new(FixtureBot::new("negotiator")), Box::new(transport));
    let outcome = session.run().await.unwrap();
    assert_eq!(outcome, SessionOutcome::Closed { reason: None });

    let (head, start) = server.await.unwrap();
    assert!(head.starts_with("POST /gameHub/negotiate?negotiateVersion=1 HTTP/1.1"));
    assert_eq!(*ws_uri.lock().unwrap(), "/gameHub?id=tok-123");
    assert_eq!(start["target"], json!("Debug"));
}

#[tokio::test]
async fn test_rejected_handshake_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        next_text(&mut ws).await.unwrap();
        ws.send(Message::Text(format!(
            "{}{}",
            json!({"error": "Requested protocol 'json' is not available."}),
            RS
        )))
        .await
        .unwrap();
        while next_text(&mut ws).await.is_some() {}
    });

    let config = loopback_config(addr, PlayMode::Debug);
    let transport = SignalRTransport::new(&config);
    let mut session = Session::new(config, Box::new(FixtureBot::new("x")), Box::new(transport));
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)));
    assert!(err.to_string().contains("not available"));
    drop(session);
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_refused_is_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = loopback_config(addr, PlayMode::Debug);
    let transport = SignalRTransport::new(&config);
    let mut session = Session::new(config, Box::new(FixtureBot::new("x")), Box::new(transport));
    let err = session.run().await.unwrap_err();
    assert!(matches!(err, SessionError::Connection(_)));
}

#[tokio::test]
async fn test_keep_alive_ping_and_server_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept_hub(&listener).await;
        let mut pings = 0;
        // The hub stays silent; count what the client sends until it gives up.
        while let Some(text) = next_text(&mut ws).await {
            pings += text
                .split(RS)
                .filter(|r| *r == json!({"type": 6}).to_string())
                .count();
        }
        pings
    });

    let config = loopback_config(addr, PlayMode::Debug)
        .with_keep_alive(Duration::from_millis(50), Duration::from_millis(400));
    let mut transport = SignalRTransport::new(&config);
    transport.connect().await.unwrap();
    transport.subscribe("requestStep");
    let err = transport.recv().await.unwrap_err();
    assert!(err.to_string().contains("Server timeout"));
    transport.stop().await.unwrap();
    transport.stop().await.unwrap();
    assert!(transport.is_shutdown());

    let pings = server.await.unwrap();
    assert!(pings >= 2, "expected keep-alive pings, got {}", pings);
}

#[tokio::test]
async fn test_malformed_record_surfaces_as_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept_hub(&listener).await;
        ws.send(Message::Text(format!("{{not json{}", RS))).await.unwrap();
        ws.send(Message::Text(format!(
            "{}{}",
            json!({"type": 1, "target": "requestStep", "arguments": []}),
            RS
        )))
        .await
        .unwrap();
        while next_text(&mut ws).await.is_some() {}
    });

    let config = loopback_config(addr, PlayMode::Debug);
    let mut transport = SignalRTransport::new(&config);
    transport.connect().await.unwrap();
    transport.subscribe("requestStep");
    assert!(matches!(
        transport.recv().await.unwrap(),
        TransportEvent::Malformed { .. }
    ));
    assert_eq!(
        transport.recv().await.unwrap(),
        TransportEvent::invocation("requestStep", vec![])
    );
    transport.stop().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn test_binary_frames_must_be_utf8() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept_hub(&listener).await;
        ws.send(Message::Binary(vec![0xff, 0xfe, 0x1e])).await.unwrap();
        let record = format!(
            "{}{}",
            json!({"type": 1, "target": "requestStep", "arguments": []}),
            RS
        );
        ws.send(Message::Binary(record.into_bytes())).await.unwrap();
        while next_text(&mut ws).await.is_some() {}
    });

    let config = loopback_config(addr, PlayMode::Debug);
    let mut transport = SignalRTransport::new(&config);
    transport.connect().await.unwrap();
    transport.subscribe("requestStep");
    match transport.recv().await.unwrap() {
        TransportEvent::Malformed { reason } => assert!(reason.contains("UTF-8")),
        other => panic!("expected a malformed event, got {:?}", other),
    }
    assert_eq!(
        transport.recv().await.unwrap(),
        TransportEvent::invocation("requestStep", vec![])
    );
    transport.stop().await.unwrap();
    server.await.unwrap();
}

/// Bot that takes longer than the server timeout to pick a step.
struct SlowStepBot {
    think: Duration,
}

#[async_trait::async_trait]
impl Bot for SlowStepBot {
    fn name(&self) -> String {
        "slow".to_string()
    }

    async fn provide_arrangement(&mut self) -> anyhow::Result<Arrangement> {
        Ok(sample_arrangement())
    }

    async fn provide_step(&mut self) -> anyhow::Result<Step> {
        tokio::time::sleep(self.think).await;
        Ok(Step::new(2, 3))
    }
}

#[tokio::test]
async fn test_slow_turn_does_not_trip_server_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept_hub(&listener).await;
        next_record(&mut ws).await.unwrap();
        ws.send(Message::Text(format!(
            "{}{}",
            json!({"type": 1, "target": "requestStep", "arguments": []}),
            RS
        )))
        .await
        .unwrap();
        // Keep pinging while the client's bot is busy; these pile up unread.
        for _ in 0..24 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ws.send(Message::Text(format!("{}{}", json!({"type": 6}), RS)))
                .await
                .unwrap();
        }
        ws.send(Message::Text(format!("{}{}", json!({"type": 7}), RS)))
            .await
            .unwrap();
        let mut received = Vec::new();
        while let Some(record) = next_record(&mut ws).await {
            received.push(record);
        }
        received
    });

    let config = loopback_config(addr, PlayMode::Debug)
        .with_keep_alive(Duration::from_millis(50), Duration::from_millis(400));
    let transport = SignalRTransport::new(&config);
    let bot = SlowStepBot {
        think: Duration::from_millis(600),
    };
    let mut session = Session::new(config, Box::new(bot), Box::new(transport));
    let outcome = session.run().await.unwrap();
    assert_eq!(outcome, SessionOutcome::Closed { reason: None });

    let received = server.await.unwrap();
    assert_eq!(received[0]["target"], json!("ReceiveStep"));
    assert_eq!(received[0]["arguments"], json!([2, 3]));
}
