pub mod bot;
mod common;
mod config;
pub mod domain;
mod logging;
pub mod prelude;
pub mod protocol;
pub mod session;
pub mod transport;

pub use bot::*;
pub use common::*;
pub use config::*;
pub use domain::{Arrangement, LayoutError, PlayMode, Step};
pub use logging::{init_logging, level_from};
pub use session::{Session, SessionHandle};
pub use transport::in_memory::{HubPeer, InMemoryTransport, MatchReport, TransportCall};
pub use transport::signalr::SignalRTransport;
pub use transport::{Transport, TransportEvent};
