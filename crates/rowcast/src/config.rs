//! Configuration for Rowcast.

use crate::delivery::DeliveryMode;
use crate::error::{ProducerError, ProducerResult};
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::time::Duration;

/// Producer configuration.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Destination template, may contain `%{database}` and `%{table}`
    pub channel: String,

    /// Redis write used for delivery
    pub delivery_mode: DeliveryMode,

    /// Stream field holding the payload; only used by `xadd`
    pub stream_field_key: Option<String>,

    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Redis password (AUTH)
    pub password: Option<String>,

    /// Redis logical database (SELECT)
    pub database: i64,

    /// Log and count delivery failures instead of stopping
    pub ignore_producer_error: bool,

    /// How long shutdown waits for in-flight sends
    pub drain_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            channel: "rowcast".to_string(),
            delivery_mode: DeliveryMode::PubSub,
            stream_field_key: None,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
            ignore_producer_error: true,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl ProducerConfig {
    /// Build a config from `ROWCAST_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> ProducerResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> ProducerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("ROWCAST_REDIS_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ProducerError::Config(format!("Invalid Redis port: {raw}")))?,
            None => defaults.port,
        };

        let database = match lookup("ROWCAST_REDIS_DATABASE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ProducerError::Config(format!("Invalid Redis database: {raw}")))?,
            None => defaults.database,
        };

        let ignore_producer_error = match lookup("ROWCAST_IGNORE_PRODUCER_ERROR") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                ProducerError::Config(format!("Invalid ROWCAST_IGNORE_PRODUCER_ERROR: {raw}"))
            })?,
            None => defaults.ignore_producer_error,
        };

        let drain_timeout = lookup("ROWCAST_DRAIN_TIMEOUT_SECS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.drain_timeout);

        Ok(Self {
            channel: lookup("ROWCAST_CHANNEL").unwrap_or(defaults.channel),
            delivery_mode: lookup("ROWCAST_MODE")
                .map(|m| DeliveryMode::from_config(&m))
                .unwrap_or(defaults.delivery_mode),
            stream_field_key: lookup("ROWCAST_STREAM_FIELD_KEY").filter(|k| !k.is_empty()),
            host: lookup("ROWCAST_REDIS_HOST").unwrap_or(defaults.host),
            port,
            password: lookup("ROWCAST_REDIS_PASSWORD").filter(|p| !p.is_empty()),
            database,
            ignore_producer_error,
            drain_timeout,
        })
    }

    /// Connection details for the Redis client.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.database,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }

    /// `host:port`, for logs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ProducerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.channel, "rowcast");
        assert_eq!(config.delivery_mode, DeliveryMode::PubSub);
        assert!(config.stream_field_key.is_none());
        assert_eq!(config.address(), "127.0.0.1:6379");
        assert_eq!(config.database, 0);
        assert!(config.ignore_producer_error);
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = ProducerConfig::from_lookup(lookup(&[
            ("ROWCAST_CHANNEL", "%{database}.%{table}"),
            ("ROWCAST_MODE", "xadd"),
            ("ROWCAST_STREAM_FIELD_KEY", "message"),
            ("ROWCAST_REDIS_HOST", "redis.internal"),
            ("ROWCAST_REDIS_PORT", "6380"),
            ("ROWCAST_REDIS_DATABASE", "3"),
            ("ROWCAST_IGNORE_PRODUCER_ERROR", "false"),
        ]))
        .unwrap();

        assert_eq!(config.channel, "%{database}.%{table}");
        assert_eq!(config.delivery_mode, DeliveryMode::StreamAppend);
        assert_eq!(config.stream_field_key.as_deref(), Some("message"));
        assert_eq!(config.address(), "redis.internal:6380");
        assert!(!config.ignore_producer_error);

        let info = config.connection_info();
        assert_eq!(info.redis.db, 3);
        assert!(matches!(info.addr, ConnectionAddr::Tcp(ref h, 6380) if h == "redis.internal"));
    }

    #[test]
    fn test_xadd_without_field_key_is_accepted_at_startup() {
        let config = ProducerConfig::from_lookup(lookup(&[("ROWCAST_MODE", "xadd")])).unwrap();
        assert_eq!(config.delivery_mode, DeliveryMode::StreamAppend);
        assert!(config.stream_field_key.is_none());
    }

    #[test]
    fn test_invalid_port() {
        let err = ProducerConfig::from_lookup(lookup(&[("ROWCAST_REDIS_PORT", "abc")])).unwrap_err();
        assert!(matches!(err, ProducerError::Config(_)));
    }

    #[test]
    fn test_unknown_mode_falls_back_to_pubsub() {
        let config = ProducerConfig::from_lookup(lookup(&[("ROWCAST_MODE", "sns")])).unwrap();
        assert_eq!(config.delivery_mode, DeliveryMode::PubSub);
    }
}
