use std::time::Duration;

use crate::domain::PlayMode;

pub const BOARD_SIZE: usize = 10;

pub const DEFAULT_SERVER_URL: &str = "https://cybertank.sibedge.com:5001";
pub const DEFAULT_HUB_NAME: &str = "gameHub";
pub const DEFAULT_PLAYER_NAME: &str = "rustbot";

/// Interval between client pings while the connection is otherwise quiet.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Silence from the server longer than this fails the connection.
pub const DEFAULT_SERVER_TIMEOUT: Duration = Duration::from_secs(30);

/// Static options supplied by the embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub server_url: String,
    pub hub_name: String,
    pub mode: PlayMode,
    /// Sent with the start verb. Empty falls back to the bot's name.
    pub player_name: String,
    /// Connect straight to the WebSocket endpoint without the negotiate round trip.
    pub skip_negotiation: bool,
    pub keep_alive_interval: Duration,
    pub server_timeout: Duration,
    /// Reject steps whose coordinates fall outside `0..BOARD_SIZE` before sending.
    pub validate_steps: bool,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, mode: PlayMode, player_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            hub_name: DEFAULT_HUB_NAME.to_string(),
            mode,
            player_name: player_name.into(),
            skip_negotiation: false,
            keep_alive_interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            server_timeout: DEFAULT_SERVER_TIMEOUT,
            validate_steps: true,
        }
    }

    pub fn with_hub_name(mut self, hub_name: impl Into<String>) -> Self {
        self.hub_name = hub_name.into();
        self
    }

    pub fn with_skip_negotiation(mut self, skip: bool) -> Self {
        self.skip_negotiation = skip;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration, server_timeout: Duration) -> Self {
        self.keep_alive_interval = interval;
        self.server_timeout = server_timeout;
        self
    }

    pub fn with_step_validation(mut self, validate: bool) -> Self {
        self.validate_steps = validate;
        self
    }

    /// Full hub endpoint, e.g. `https://host:5001/gameHub`.
    pub fn hub_url(&self) -> String {
        format!(
            "{}/{}",
            self.server_url.trim_end_matches('/'),
            self.hub_name.trim_start_matches('/')
        )
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_URL, PlayMode::Debug, DEFAULT_PLAYER_NAME)
    }
}
