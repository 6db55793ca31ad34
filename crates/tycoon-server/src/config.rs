//! Server configuration read from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime settings for the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind the websocket listener
    pub addr: SocketAddr,
    /// Root of the file store (snapshots, logs, optional catalog.json)
    pub data_dir: PathBuf,
    /// Thinking delay for quick bot chores (order rolls, rent collection)
    pub bot_fast_delay: Duration,
    /// Thinking delay for everything else a bot does
    pub bot_slow_delay: Duration,
    /// Period of the auction sweep
    pub auction_sweep: Duration,
    /// Advisor attempts after the first before falling back to rules
    pub advisor_retries: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            data_dir: PathBuf::from("./data"),
            bot_fast_delay: Duration::from_millis(tycoon_core::bot::FAST_DELAY_MS),
            bot_slow_delay: Duration::from_millis(tycoon_core::bot::SLOW_DELAY_MS),
            auction_sweep: Duration::from_millis(1_000),
            advisor_retries: 2,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup("SERVER_ADDR") {
            config.addr = parse("SERVER_ADDR", &value)?;
        }
        if let Some(value) = lookup("TYCOON_DATA_DIR") {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    key: "TYCOON_DATA_DIR",
                    value,
                    reason: "must not be empty".into(),
                });
            }
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("TYCOON_BOT_FAST_DELAY_MS") {
            config.bot_fast_delay = Duration::from_millis(parse("TYCOON_BOT_FAST_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("TYCOON_BOT_SLOW_DELAY_MS") {
            config.bot_slow_delay = Duration::from_millis(parse("TYCOON_BOT_SLOW_DELAY_MS", &value)?);
        }
        if let Some(value) = lookup("TYCOON_AUCTION_SWEEP_MS") {
            let ms: u64 = parse("TYCOON_AUCTION_SWEEP_MS", &value)?;
            if ms == 0 {
                return Err(ConfigError::Invalid {
                    key: "TYCOON_AUCTION_SWEEP_MS",
                    value,
                    reason: "must be positive".into(),
                });
            }
            config.auction_sweep = Duration::from_millis(ms);
        }
        if let Some(value) = lookup("TYCOON_ADVISOR_RETRIES") {
            config.advisor_retries = parse("TYCOON_ADVISOR_RETRIES", &value)?;
        }

        Ok(config)
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.addr.port(), 8080);
        assert_eq!(config.bot_fast_delay, Duration::from_millis(1000));
        assert_eq!(config.bot_slow_delay, Duration::from_millis(2000));
        assert_eq!(config.advisor_retries, 2);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("SERVER_ADDR", "127.0.0.1:9000"),
            ("TYCOON_DATA_DIR", "/tmp/tycoon"),
            ("TYCOON_BOT_FAST_DELAY_MS", "5"),
            ("TYCOON_BOT_SLOW_DELAY_MS", " 10 "),
            ("TYCOON_AUCTION_SWEEP_MS", "250"),
            ("TYCOON_ADVISOR_RETRIES", "0"),
        ]))
        .unwrap();

        assert_eq!(config.addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/tmp/tycoon"));
        assert_eq!(config.bot_fast_delay, Duration::from_millis(5));
        assert_eq!(config.bot_slow_delay, Duration::from_millis(10));
        assert_eq!(config.auction_sweep, Duration::from_millis(250));
        assert_eq!(config.advisor_retries, 0);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = ServerConfig::from_lookup(lookup(&[("TYCOON_BOT_FAST_DELAY_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "TYCOON_BOT_FAST_DELAY_MS", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("SERVER_ADDR", "nowhere")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SERVER_ADDR", .. }));

        let err = ServerConfig::from_lookup(lookup(&[("TYCOON_AUCTION_SWEEP_MS", "0")])).unwrap_err();
        assert!(err.to_string().contains("must be positive"));
    }
}
