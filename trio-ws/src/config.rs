use std::str::FromStr;

/// Runtime settings, read from the environment once at process start.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Per-turn countdown before a timed-out seat folds.
    pub countdown_seconds: i64,
    /// Client-side compare animation length, echoed in PK events.
    pub animation_seconds: i64,
    /// Snapshot TTL; a reconnect within a round must see consistent state.
    pub snapshot_ttl_hours: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            bind_addr: env_or("TRIO_BIND_ADDR", "0.0.0.0:8080".to_string()),
            countdown_seconds: env_or("TRIO_COUNTDOWN_SECONDS", 60),
            animation_seconds: env_or("TRIO_ANIMATION_SECONDS", 6),
            snapshot_ttl_hours: env_or("TRIO_SNAPSHOT_TTL_HOURS", 24),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "0.0.0.0:8080".to_string(),
            countdown_seconds: 60,
            animation_seconds: 6,
            snapshot_ttl_hours: 24,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
