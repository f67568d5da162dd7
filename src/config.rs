//! Process configuration, read once from `LAGOON_BOT_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a whole number of seconds greater than 0, got {value:?}")]
    InvalidSeconds { key: &'static str, value: String },

    #[error("{key} must be true or false, got {value:?}")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must not be empty or contain spaces, got {value:?}")]
    InvalidWord { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Nickname used on every server.
    pub nick: String,
    /// Only this nick, on the home server, may run admin commands.
    /// Incident alerts are sent to it.
    pub owner: String,
    /// Address the `home` record is pinned to.
    pub home_server: String,
    /// Holds `servers.json`.
    pub data_dir: PathBuf,
    /// Required in front of commands sent to channels.
    pub command_prefix: String,
    pub tls: bool,
    pub dev: bool,
    /// Wait between a disconnect and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Period of the liveness probe sweep.
    pub probe_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nick: "lagoonbot".into(),
            owner: "owner".into(),
            home_server: "127.0.0.1:6697".into(),
            data_dir: PathBuf::from("data"),
            command_prefix: "!".into(),
            tls: true,
            dev: false,
            reconnect_delay: Duration::from_secs(10),
            probe_interval: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("LAGOON_BOT_NICK") {
            config.nick = word("LAGOON_BOT_NICK", v)?;
        }
        if let Some(v) = lookup("LAGOON_BOT_OWNER") {
            config.owner = word("LAGOON_BOT_OWNER", v)?;
        }
        if let Some(v) = lookup("LAGOON_BOT_HOME_SERVER") {
            config.home_server = word("LAGOON_BOT_HOME_SERVER", v)?;
        }
        if let Some(v) = lookup("LAGOON_BOT_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LAGOON_BOT_PREFIX") {
            config.command_prefix = word("LAGOON_BOT_PREFIX", v)?;
        }
        if let Some(v) = lookup("LAGOON_BOT_TLS") {
            config.tls = boolean("LAGOON_BOT_TLS", v)?;
        }
        // Presence alone enables dev mode.
        config.dev = lookup("LAGOON_BOT_DEV").is_some();
        if let Some(v) = lookup("LAGOON_BOT_RECONNECT_SECS") {
            config.reconnect_delay = seconds("LAGOON_BOT_RECONNECT_SECS", v)?;
        }
        if let Some(v) = lookup("LAGOON_BOT_PROBE_SECS") {
            config.probe_interval = seconds("LAGOON_BOT_PROBE_SECS", v)?;
        }

        Ok(config)
    }
}

fn word(key: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(ConfigError::InvalidWord { key, value });
    }
    Ok(trimmed.to_owned())
}

fn boolean(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { key, value }),
    }
}

fn seconds(key: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds { key, value }),
    }
}
