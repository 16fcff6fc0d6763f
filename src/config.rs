//! Runtime configuration, read from the process environment.

use crate::client::DEFAULT_BASE_URL;
use crate::coordinator::DEFAULT_COMMAND_COOLDOWN_SECS;
use std::num::NonZeroU64;
use std::time::Duration;

pub const DEFAULT_POLL_SECS: u64 = 30;
pub const DEFAULT_LOCAL_POLL_SECS: u64 = 10;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Cloud account login. Empty when running against fake devices.
    pub email: String,
    pub password: String,
    pub base_url: String,
    /// CCM21-i gateway; local polling is off without it.
    pub local_host: Option<String>,
    /// Cadence when only the cloud is polled.
    pub poll_interval: Duration,
    /// Cadence when a gateway is configured.
    pub local_poll_interval: Duration,
    pub command_cooldown: Duration,
    pub request_timeout: Duration,
    /// Number of simulated units; 0 talks to the real services.
    pub fake_devices: usize,
    pub commands_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let fake_devices = match var("FAKE_DEVICES") {
            Some(s) => s
                .parse::<usize>()
                .map_err(|_| format!("FAKE_DEVICES must be a whole number, got {:?}", s))?,
            None => 0,
        };

        let (email, password) = match (var("MCONTROL_EMAIL"), var("MCONTROL_PASSWORD")) {
            (Some(e), Some(p)) => (e, p),
            _ if fake_devices > 0 => (String::new(), String::new()),
            _ => return Err("Missing credentials: set MCONTROL_EMAIL and MCONTROL_PASSWORD".to_string()),
        };

        let base_url = var("MCONTROL_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Config {
            email,
            password,
            base_url,
            local_host: var("MCONTROL_LOCAL_HOST"),
            poll_interval: secs(&var, "POLL_INTERVAL_SECS", DEFAULT_POLL_SECS)?,
            local_poll_interval: secs(&var, "LOCAL_POLL_INTERVAL_SECS", DEFAULT_LOCAL_POLL_SECS)?,
            command_cooldown: secs(&var, "COMMAND_COOLDOWN_SECS", DEFAULT_COMMAND_COOLDOWN_SECS)?,
            request_timeout: secs(&var, "REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            fake_devices,
            commands_enabled: match var("COMMANDS_ENABLED") {
                Some(s) => parse_bool(&s).ok_or_else(|| format!("COMMANDS_ENABLED must be true or false, got {:?}", s))?,
                None => true,
            },
        })
    }

    /// Local polling runs against the gateway, or always in fake mode.
    pub fn local_polling(&self) -> bool {
        self.local_host.is_some() || self.fake_devices > 0
    }

    pub fn tick_interval(&self) -> Duration {
        if self.local_polling() {
            self.local_poll_interval
        } else {
            self.poll_interval
        }
    }
}

fn secs(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<Duration, String> {
    match var(key) {
        Some(s) => s
            .parse::<NonZeroU64>()
            .map(|n| Duration::from_secs(n.get()))
            .map_err(|_| format!("{} must be a positive number of seconds, got {:?}", key, s)),
        None => Ok(Duration::from_secs(default)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
