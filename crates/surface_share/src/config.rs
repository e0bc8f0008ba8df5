use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

const SETTING_ACQUIRE_TIMEOUT_MS: &str = "SURFACE_SHARE_ACQUIRE_TIMEOUT_MS";
const SETTING_REGISTRY_CAPACITY: &str = "SURFACE_SHARE_REGISTRY_CAPACITY";
const SETTING_REQUIRE_EXTENSIONS: &str = "SURFACE_SHARE_REQUIRE_EXTENSIONS";

pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 67; // four frames at 60 Hz
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;
pub const DEFAULT_REQUIRE_EXTENSIONS: bool = true;

/// Tunables shared by senders, receivers and the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upper bound on how long `acquire` waits for the surface mutex.
    pub acquire_timeout_ms: u64,
    /// Maximum number of live surfaces a registry store accepts.
    pub registry_capacity: usize,
    /// Verify external-memory device extensions before the first link.
    pub require_extensions: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            require_extensions: DEFAULT_REQUIRE_EXTENSIONS,
        }
    }
}

impl BridgeConfig {
    /// Defaults overridden by any `SURFACE_SHARE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = parse_setting(&lookup, SETTING_ACQUIRE_TIMEOUT_MS) {
            config.acquire_timeout_ms = v;
        }
        if let Some(v) = parse_setting(&lookup, SETTING_REGISTRY_CAPACITY) {
            config.registry_capacity = v;
        }
        if let Some(v) = parse_setting(&lookup, SETTING_REQUIRE_EXTENSIONS) {
            config.require_extensions = v;
        }
        config
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

fn parse_setting<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("[SurfaceShare/Config] Ignoring invalid value {:?} for {}", raw, key);
            None
        }
    }
}
