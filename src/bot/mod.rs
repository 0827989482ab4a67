//! Bot trait and implementations
//!
//! A Bot supplies the decisions a session forwards to the hub:
//! - the initial arrangement when the hub sends `requestArrangement`
//! - a step for every `requestStep`
//! - a display name, used when the config carries no player name
//!
//! Bots own no transport state. The session awaits `provide_arrangement` and
//! `provide_step` inline, one event at a time, so a bot that needs long
//! computation should move it onto `tokio::task::spawn_blocking` and await the
//! result rather than block the runtime thread.

use crate::domain::{Arrangement, Step};

#[async_trait::async_trait]
pub trait Bot: Send {
    /// Display name. Sent with the start verb only when
    /// `ClientConfig::player_name` is empty.
    fn name(&self) -> String;

    /// Initial layout, requested once per match.
    async fn provide_arrangement(&mut self) -> anyhow::Result<Arrangement>;

    /// Next move, requested once per turn.
    async fn provide_step(&mut self) -> anyhow::Result<Step>;

    /// Chat-style notification from the hub.
    fn on_message(&mut self, _text: &str) {}
}

pub mod fixture;
pub use fixture::{sample_arrangement, FixtureBot};

pub mod random;
pub use random::RandomStepBot;

/// Most recent hub messages kept by the bundled bots.
pub(crate) const MESSAGE_HISTORY: usize = 64;
