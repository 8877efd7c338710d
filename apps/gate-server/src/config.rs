//! Environment-driven configuration for the gateway.
//!
//! Everything is plain `GATE_*` variables; invalid values fail startup with
//! a diagnostic rather than being silently defaulted.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use gate_store::NewAccount;

use crate::companion::CompanionSpec;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid GATE_PORT: {0}")]
    InvalidPort(String),
    #[error("invalid GATE_BIND: {0}")]
    InvalidBind(String),
    #[error("invalid GATE_DEFAULT_RANK: {0}")]
    InvalidRank(String),
    #[error("invalid GATE_COMPANION_ARGS (expected JSON array of strings): {0}")]
    InvalidCompanionArgs(String),
    #[error("invalid GATE_COMPANION_ENV (expected JSON object of strings): {0}")]
    InvalidCompanionEnv(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub state_dir: PathBuf,
    pub default_account: NewAccount,
    pub admin_token: Option<String>,
    pub companion: Option<CompanionSpec>,
    pub http_drain: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind = env_or("GATE_BIND", "127.0.0.1");
        let port_raw = env_or("GATE_PORT", "9000");
        let port: u16 = port_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(port_raw))?;
        let addr: SocketAddr = format!("{bind}:{port}")
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind))?;

        let rank_raw = env_or("GATE_DEFAULT_RANK", "1");
        let rank: i64 = rank_raw
            .parse()
            .map_err(|_| ConfigError::InvalidRank(rank_raw))?;

        Ok(Self {
            addr,
            state_dir: PathBuf::from(env_or("GATE_STATE_DIR", "state")),
            default_account: NewAccount {
                username: env_or("GATE_DEFAULT_USERNAME", "admin"),
                password: env_or("GATE_DEFAULT_PASSWORD", "admin123"),
                rank,
                email: env_or("GATE_DEFAULT_EMAIL", "admin@example.com"),
            },
            admin_token: std::env::var("GATE_ADMIN_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            companion: companion_from_env()?,
            http_drain: env_ms("GATE_HTTP_DRAIN_MS", 5000),
        })
    }
}

fn companion_from_env() -> Result<Option<CompanionSpec>, ConfigError> {
    let Some(command) = std::env::var("GATE_COMPANION_CMD")
        .ok()
        .filter(|c| !c.trim().is_empty())
    else {
        return Ok(None);
    };
    let args = match std::env::var("GATE_COMPANION_ARGS") {
        Ok(raw) => serde_json::from_str::<Vec<String>>(&raw)
            .map_err(|_| ConfigError::InvalidCompanionArgs(raw))?,
        Err(_) => Vec::new(),
    };
    let env = match std::env::var("GATE_COMPANION_ENV") {
        Ok(raw) => serde_json::from_str::<HashMap<String, String>>(&raw)
            .map_err(|_| ConfigError::InvalidCompanionEnv(raw))?,
        Err(_) => HashMap::new(),
    };
    Ok(Some(CompanionSpec {
        command,
        args,
        env,
        workdir: std::env::var("GATE_COMPANION_DIR").ok().map(PathBuf::from),
        health_url: env_or("GATE_COMPANION_HEALTH_URL", "http://127.0.0.1:8000/health"),
        initial_delay: env_ms("GATE_COMPANION_INITIAL_DELAY_MS", 500),
        poll_interval: env_ms("GATE_COMPANION_POLL_INTERVAL_MS", 2000),
        probe_timeout: env_ms("GATE_COMPANION_PROBE_TIMEOUT_MS", 2000),
        max_retries: env_u32("GATE_COMPANION_MAX_RETRIES", 30),
        stop_grace: env_ms("GATE_COMPANION_STOP_GRACE_MS", 3000),
    }))
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_ms(key: &str, default: u64) -> Duration {
    let ms = std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_millis(ms)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
