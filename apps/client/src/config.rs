use std::time::Duration;

use movement_core::constants::PLAYER_SPEED;

const COLOR_PALETTE: [&str; 8] = [
    "blue", "red", "green", "orange", "purple", "teal", "pink", "yellow",
];

/// Bounded exponential backoff for (re)connecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed attempts tolerated before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(self.max_delay)
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Base WebSocket URL of the presence server, e.g. `ws://localhost:9502`.
    pub server_url: String,
    pub room_id: String,
    pub display_name: String,
    pub color: Option<String>,
    /// Units per second.
    pub speed: f32,
    pub retry: RetryPolicy,
    /// Remote participants without an update for this long are shown idle.
    pub idle_after: Duration,
    /// A session whose registration is not acknowledged in time is dropped
    /// and retried.
    pub ack_timeout: Duration,
}

impl AgentConfig {
    pub fn new(
        server_url: impl Into<String>,
        room_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            room_id: room_id.into(),
            display_name: display_name.into(),
            color: None,
            speed: PLAYER_SPEED,
            retry: RetryPolicy::default(),
            idle_after: Duration::from_millis(250),
            ack_timeout: Duration::from_secs(5),
        }
    }

    pub fn room_url(&self) -> String {
        format!(
            "{}/rooms/{}/ws",
            self.server_url.trim_end_matches('/'),
            urlencoding::encode(&self.room_id)
        )
    }

    pub fn resolved_color(&self) -> String {
        self.color
            .clone()
            .unwrap_or_else(|| color_for(&self.display_name).to_string())
    }
}

/// Stable palette color for a display name.
pub fn color_for(name: &str) -> &'static str {
    let hash = name.bytes().fold(0_u64, |acc, byte| {
        acc.wrapping_mul(31).wrapping_add(byte as u64)
    });
    COLOR_PALETTE[(hash % COLOR_PALETTE.len() as u64) as usize]
}
