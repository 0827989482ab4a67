//! Commonly used types and utilities for ease of import.

pub use crate::{
    Arrangement, Bot, ClientConfig, FixtureBot, PlayMode, Session, SessionError, SessionHandle,
    SessionOutcome, SessionState, Step,
};

pub use crate::transport::{
    in_memory::{HubPeer, InMemoryTransport},
    signalr::SignalRTransport,
    Transport, TransportEvent,
};
