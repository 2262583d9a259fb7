// src/config/bridge.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backoff::{ReconnectBackoff, RetryPolicy};

pub const ENV_CONFIG_PATH: &str = "BRIDGE_CONFIG_PATH";
pub const ENV_STORE_PATH: &str = "BRIDGE_STORE_PATH";
pub const ENV_LISTEN_ADDR: &str = "BRIDGE_LISTEN_ADDR";
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// JSON mapping store shared with `bridgectl`.
    pub store_path: PathBuf,
    /// Admin HTTP listener; empty disables the admin API.
    pub listen_addr: String,
    pub reconcile_interval_secs: u64,
    /// How long a cancelled worker may take to release its connection.
    pub shutdown_grace_ms: u64,
    pub stream: StreamConfig,
    pub reconnect: ReconnectConfig,
    pub delivery: DeliveryConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("data/mappings.json"),
            listen_addr: "0.0.0.0:8080".to_string(),
            reconcile_interval_secs: 30,
            shutdown_grace_ms: 5_000,
            stream: StreamConfig::default(),
            reconnect: ReconnectConfig::default(),
            delivery: DeliveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub connect_timeout_secs: u64,
    /// ntfy sends a keepalive every 45s; silence longer than this is a dead link.
    pub idle_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            idle_timeout_secs: 120,
            user_agent: concat!("ntfy-discord-bridge/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// A connection open at least this long resets the backoff to `min_delay_ms`.
    pub stable_after_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 300_000,
            stable_after_secs: 60,
        }
    }
}

impl ReconnectConfig {
    pub fn backoff(&self) -> ReconnectBackoff {
        ReconnectBackoff::new(
            Duration::from_millis(self.min_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn stable_after(&self) -> Duration {
        Duration::from_secs(self.stable_after_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound on a server-provided Retry-After.
    pub max_retry_after_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_retries: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            max_retry_after_secs: 60,
        }
    }
}

impl DeliveryConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: true,
        }
    }
}

impl BridgeConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: BridgeConfig = toml::from_str(s).context("parsing bridge config TOML")?;
        Ok(cfg.sanitized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading bridge config from {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Load using env var + fallbacks, then apply env overrides:
    /// 1) $BRIDGE_CONFIG_PATH
    /// 2) config/bridge.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        let base = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(Path::new(DEFAULT_CONFIG_PATH))?
        } else {
            Self::default()
        };
        Ok(base.with_env_overrides())
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(p) = std::env::var(ENV_STORE_PATH) {
            if !p.trim().is_empty() {
                self.store_path = PathBuf::from(p.trim());
            }
        }
        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            self.listen_addr = addr.trim().to_string();
        }
        self
    }

    /// Raise zero durations to usable minimums and keep min <= max.
    fn sanitized(mut self) -> Self {
        self.reconcile_interval_secs = self.reconcile_interval_secs.max(1);
        self.stream.connect_timeout_secs = self.stream.connect_timeout_secs.max(1);
        self.stream.idle_timeout_secs = self.stream.idle_timeout_secs.max(1);
        self.reconnect.min_delay_ms = self.reconnect.min_delay_ms.max(1);
        if self.reconnect.min_delay_ms > self.reconnect.max_delay_ms {
            std::mem::swap(
                &mut self.reconnect.min_delay_ms,
                &mut self.reconnect.max_delay_ms,
            );
        }
        self.delivery.timeout_secs = self.delivery.timeout_secs.max(1);
        if self.delivery.base_delay_ms > self.delivery.max_delay_ms {
            std::mem::swap(
                &mut self.delivery.base_delay_ms,
                &mut self.delivery.max_delay_ms,
            );
        }
        self
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}
