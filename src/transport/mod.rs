use serde_json::Value;

pub mod in_memory;
pub mod keepalive;
pub mod signalr;

/// Something the hub pushed to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A named server event with its positional arguments.
    Invocation { target: String, arguments: Vec<Value> },
    /// A record arrived that could not be decoded. The connection is still usable.
    Malformed { reason: String },
    /// The hub closed the connection.
    Closed { reason: Option<String> },
}

impl TransportEvent {
    pub fn invocation(target: impl Into<String>, arguments: Vec<Value>) -> Self {
        TransportEvent::Invocation {
            target: target.into(),
            arguments,
        }
    }
}

/// Connection to one named hub.
///
/// Events for targets nobody subscribed to are dropped by the transport.
/// `recv` must be cancellation safe: the session races it against its stop
/// signal and may drop the future before it completes.
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> anyhow::Result<()>;

    /// Register interest in a named server event.
    fn subscribe(&mut self, target: &str);

    /// Fire-and-forget remote call with positional arguments.
    async fn invoke(&mut self, method: &str, arguments: Vec<Value>) -> anyhow::Result<()>;

    /// Next event from the hub. `Err` means the connection failed.
    async fn recv(&mut self) -> anyhow::Result<TransportEvent>;

    /// Tear down the connection. Safe to call more than once.
    async fn stop(&mut self) -> anyhow::Result<()>;
}
