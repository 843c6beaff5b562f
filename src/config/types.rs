use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{
    CONNECT_TIMEOUT, POLL_DELAY, RECONNECT_INITIAL_DELAY, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_DELAY,
    RECONNECT_MULTIPLIER, SCAN_TIMEOUT, WRITE_DEADLINE, WRITE_FAILURE_THRESHOLD,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Rgb { red, green, blue }
    }

    /// Parses `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(value: &str) -> Option<Rgb> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }

        let component = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some(Rgb::new(component(0)?, component(2)?, component(4)?))
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::new(0x7e, 0x57, 0xc2)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.red, self.green, self.blue)
    }
}

/// Reconnect and timeout policy of the connection manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionConfig {
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub reconnect_multiplier: u32,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub write_failure_threshold: u32,
    pub scan_timeout_ms: u64,
}

impl ConnectionConfig {
    /// Delay before reconnect `attempt` (1-based): `d0 * multiplier^(attempt - 1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let factor = u64::from(self.reconnect_multiplier.max(1)).saturating_pow(exponent);
        let delay = self.initial_reconnect_delay_ms.saturating_mul(factor).min(self.max_reconnect_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            initial_reconnect_delay_ms: RECONNECT_INITIAL_DELAY,
            max_reconnect_delay_ms: RECONNECT_MAX_DELAY,
            reconnect_multiplier: RECONNECT_MULTIPLIER,
            max_reconnect_attempts: RECONNECT_MAX_ATTEMPTS,
            connect_timeout_ms: CONNECT_TIMEOUT,
            write_timeout_ms: WRITE_DEADLINE,
            poll_interval_ms: POLL_DELAY,
            write_failure_threshold: WRITE_FAILURE_THRESHOLD,
            scan_timeout_ms: SCAN_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub last_device: Option<String>,
    pub last_color: Rgb,
    pub last_brightness: u8,
    pub last_effect: Option<u8>,
    pub last_effect_speed: u8,
    pub power_state: bool,
    pub auto_connect: bool,
    // owned by the user interface, kept as-is
    pub window_geometry: Option<serde_json::Value>,
    pub connection: ConnectionConfig,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            last_device: None,
            last_color: Rgb::default(),
            last_brightness: 75,
            last_effect: None,
            last_effect_speed: 50,
            power_state: false,
            auto_connect: false,
            window_geometry: None,
            connection: ConnectionConfig::default(),
            extra: serde_json::Map::new(),
        }
    }
}
