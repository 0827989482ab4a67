use tokio::time::{Duration, Instant};

/// Tracks traffic in both directions for the SignalR keep-alive rules:
/// the client pings when it has sent nothing for `interval`, and gives up on
/// the server after `server_timeout` without receiving anything.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    interval: Duration,
    server_timeout: Duration,
    last_sent: Instant,
    last_received: Instant,
}

impl KeepAlive {
    pub fn new(interval: Duration, server_timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval,
            server_timeout,
            last_sent: now,
            last_received: now,
        }
    }

    pub fn mark_sent(&mut self) {
        self.last_sent = Instant::now();
    }

    pub fn mark_received(&mut self) {
        self.last_received = Instant::now();
    }

    pub fn ping_due(&self) -> bool {
        self.last_sent.elapsed() >= self.interval
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_received.elapsed() >= self.server_timeout
    }

    pub fn server_timeout(&self) -> Duration {
        self.server_timeout
    }

    /// Earliest moment something has to happen: a ping or the timeout check.
    pub fn next_deadline(&self) -> Instant {
        let ping_at = self.last_sent + self.interval;
        let timeout_at = self.last_received + self.server_timeout;
        ping_at.min(timeout_at)
    }
}
