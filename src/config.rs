//! Deployment configuration for the session core. Values come from the
//! embedding application or from `COURIER_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for token renewal and realtime reconnection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Base URL of the REST backend, e.g. `https://api.courier.example`.
    pub api_base: String,
    /// WebSocket endpoint for the STOMP broker, e.g. `wss://api.courier.example/ws`.
    pub realtime_url: String,
    /// Margin before token expiry at which the proactive refresh fires.
    pub refresh_threshold: Duration,
    /// First reconnect delay; grows linearly per attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound on a single reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Reconnect attempts before giving up and reporting realtime unavailable.
    pub max_reconnect_attempts: u32,
    /// Where to persist the bearer token across restarts. `None` keeps it in memory.
    pub token_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".to_string(),
            realtime_url: "ws://127.0.0.1:8080/ws".to_string(),
            refresh_threshold: Duration::from_secs(60),
            reconnect_base_delay: Duration::from_secs(2),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            token_path: None,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

impl SessionConfig {
    /// Build a config from `COURIER_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("COURIER_API_BASE") { cfg.api_base = v; }
        if let Ok(v) = std::env::var("COURIER_REALTIME_URL") { cfg.realtime_url = v; }
        if let Some(d) = env_secs("COURIER_REFRESH_THRESHOLD_SECS") { cfg.refresh_threshold = d; }
        if let Some(d) = env_secs("COURIER_RECONNECT_BASE_SECS") { cfg.reconnect_base_delay = d; }
        if let Some(d) = env_secs("COURIER_RECONNECT_MAX_SECS") { cfg.reconnect_max_delay = d; }
        if let Ok(v) = std::env::var("COURIER_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse() { cfg.max_reconnect_attempts = n; }
        }
        if let Ok(v) = std::env::var("COURIER_TOKEN_PATH") { cfg.token_path = Some(PathBuf::from(v)); }
        cfg
    }

    /// Delay before the given reconnect attempt (1-based), linear and capped.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let d = self.reconnect_base_delay.saturating_mul(attempt.max(1));
        d.min(self.reconnect_max_delay)
    }
}
