//! Configuration for the relayer.

use std::path::PathBuf;
use std::time::Duration;

/// Relayer configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub mqtt_keep_alive_secs: u64,
    pub mqtt_connect_timeout_secs: u64,
    pub mqtt_channel_capacity: usize,
    pub relay_channel_capacity: usize,
    pub publish_max_attempts: u32,
    pub publish_backoff_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env_parse("PORT", 8080);
        let database_path = std::env::var("DATABASE_PATH")
            .or_else(|_| std::env::var("DATABASE_URL"))
            .map(|s| {
                let s = s.trim_start_matches("sqlite:").to_string();
                PathBuf::from(shellexpand::tilde(&s).to_string())
            })
            .unwrap_or_else(|_| PathBuf::from("./data/relayer.db"));

        Self {
            host,
            port,
            database_path,
            // rumqttc rejects keep-alive intervals under five seconds
            mqtt_keep_alive_secs: env_parse("MQTT_KEEP_ALIVE_SECS", 30u64).max(5),
            mqtt_connect_timeout_secs: env_parse("MQTT_CONNECT_TIMEOUT_SECS", 10),
            mqtt_channel_capacity: env_parse("MQTT_CHANNEL_CAPACITY", 100usize).max(1),
            relay_channel_capacity: env_parse("RELAY_CHANNEL_CAPACITY", 256usize).max(1),
            publish_max_attempts: env_parse("PUBLISH_MAX_ATTEMPTS", 3u32).max(1),
            publish_backoff_ms: env_parse("PUBLISH_BACKOFF_MS", 500),
        }
    }

    /// Isolated configuration for tests: fast retries, short timeouts.
    pub fn for_test(database_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_path,
            mqtt_keep_alive_secs: 30,
            mqtt_connect_timeout_secs: 2,
            mqtt_channel_capacity: 16,
            relay_channel_capacity: 64,
            publish_max_attempts: 3,
            publish_backoff_ms: 1,
        }
    }

    pub fn mqtt_keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt_keep_alive_secs)
    }

    pub fn mqtt_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.mqtt_connect_timeout_secs)
    }

    pub fn publish_backoff(&self) -> Duration {
        Duration::from_millis(self.publish_backoff_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_test_uses_fast_retries() {
        let config = Config::for_test(PathBuf::from("/tmp/x.db"));
        assert_eq!(config.publish_max_attempts, 3);
        assert_eq!(config.publish_backoff(), Duration::from_millis(1));
        assert_eq!(config.mqtt_keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        std::env::set_var("RELAYER_TEST_ENV_PARSE", "not-a-number");
        assert_eq!(env_parse("RELAYER_TEST_ENV_PARSE", 7u32), 7);
        std::env::set_var("RELAYER_TEST_ENV_PARSE", " 12 ");
        assert_eq!(env_parse("RELAYER_TEST_ENV_PARSE", 7u32), 12);
        std::env::remove_var("RELAYER_TEST_ENV_PARSE");
        assert_eq!(env_parse("RELAYER_TEST_ENV_PARSE", 7u32), 7);
    }
}
