use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::consumer::RetryPolicy;

// ============================================================================
// Pipeline Configuration
// ============================================================================
//
// Built once at startup and passed by reference into the publisher and the
// consumer loop. Nothing below reads the environment after construction.
//
// ============================================================================

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{key} is required when {because}")]
    Missing {
        key: &'static str,
        because: &'static str,
    },
}

/// `security.protocol` values understood by the broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityProtocol {
    Plaintext,
    Ssl,
    SaslPlaintext,
    SaslSsl,
}

impl SecurityProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityProtocol::Plaintext => "plaintext",
            SecurityProtocol::Ssl => "ssl",
            SecurityProtocol::SaslPlaintext => "sasl_plaintext",
            SecurityProtocol::SaslSsl => "sasl_ssl",
        }
    }

    pub fn uses_sasl(&self) -> bool {
        matches!(self, SecurityProtocol::SaslPlaintext | SecurityProtocol::SaslSsl)
    }
}

impl FromStr for SecurityProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "plaintext" => Ok(SecurityProtocol::Plaintext),
            "ssl" => Ok(SecurityProtocol::Ssl),
            "sasl_plaintext" => Ok(SecurityProtocol::SaslPlaintext),
            "sasl_ssl" => Ok(SecurityProtocol::SaslSsl),
            other => Err(format!("unknown security protocol `{other}`")),
        }
    }
}

/// SASL settings handed to the client as-is. The handshake itself is the
/// client library's business.
#[derive(Clone, PartialEq)]
pub struct SaslCredentials {
    pub mechanism: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopicNames {
    pub order_events: String,
    pub dead_letter: String,
}

#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Transport-level retries before a send resolves as failed.
    pub retries: u32,
    pub message_timeout: Duration,
    /// Kept at or below 5 so idempotent retries cannot reorder a key.
    pub max_in_flight: u32,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub workers: usize,
    pub max_poll_records: usize,
    pub retry: RetryPolicy,
    pub dlq_write_timeout: Duration,
    pub session_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_poll_interval: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSettings {
    pub email_enabled: bool,
    pub sms_enabled: bool,
    pub email_from: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub bootstrap_servers: String,
    pub security_protocol: SecurityProtocol,
    pub credentials: Option<SaslCredentials>,
    pub schema_registry_url: String,
    pub schema_id: u32,
    pub legacy_schema_id: Option<u32>,
    pub consumer_group_id: String,
    pub topics: TopicNames,
    pub producer: ProducerSettings,
    pub consumer: ConsumerSettings,
    pub notification: NotificationSettings,
    pub metrics_port: u16,
}

impl Default for PipelineConfig {
    /// Local development defaults: a single plaintext broker on localhost.
    fn default() -> Self {
        Self {
            bootstrap_servers: "127.0.0.1:9092".to_string(),
            security_protocol: SecurityProtocol::Plaintext,
            credentials: None,
            schema_registry_url: "http://127.0.0.1:8081".to_string(),
            schema_id: 2,
            legacy_schema_id: Some(1),
            consumer_group_id: "notification-service".to_string(),
            topics: TopicNames {
                order_events: "order-events".to_string(),
                dead_letter: "order-events-dlq".to_string(),
            },
            producer: ProducerSettings {
                retries: 3,
                message_timeout: Duration::from_secs(30),
                max_in_flight: 5,
            },
            consumer: ConsumerSettings {
                workers: 3,
                max_poll_records: 10,
                retry: RetryPolicy::default(),
                dlq_write_timeout: Duration::from_secs(10),
                session_timeout: Duration::from_secs(30),
                heartbeat_interval: Duration::from_secs(10),
                max_poll_interval: Duration::from_secs(300),
            },
            notification: NotificationSettings {
                email_enabled: true,
                sms_enabled: false,
                email_from: "orders@example.com".to_string(),
            },
            metrics_port: 9090,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                  |
    /// |--------------------------------|--------------------------|
    /// | `KAFKA_BOOTSTRAP_SERVERS`      | `127.0.0.1:9092`         |
    /// | `KAFKA_SECURITY_PROTOCOL`      | `plaintext`              |
    /// | `KAFKA_SASL_MECHANISM`         | required for SASL        |
    /// | `KAFKA_SASL_USERNAME`          | unset                    |
    /// | `KAFKA_SASL_PASSWORD`          | unset                    |
    /// | `SCHEMA_REGISTRY_URL`          | `http://127.0.0.1:8081`  |
    /// | `SCHEMA_ID`                    | `2`                      |
    /// | `LEGACY_SCHEMA_ID`             | `1` (`none` disables)    |
    /// | `KAFKA_CONSUMER_GROUP`         | `notification-service`   |
    /// | `ORDER_EVENTS_TOPIC`           | `order-events`           |
    /// | `ORDER_EVENTS_DLQ_TOPIC`       | `order-events-dlq`       |
    /// | `PRODUCER_RETRIES`             | `3`                      |
    /// | `PRODUCER_MESSAGE_TIMEOUT_MS`  | `30000`                  |
    /// | `CONSUMER_WORKERS`             | `3`                      |
    /// | `MAX_POLL_RECORDS`             | `10`                     |
    /// | `RETRY_MAX_ATTEMPTS`           | `1`                      |
    /// | `RETRY_INITIAL_BACKOFF_MS`     | `1000`                   |
    /// | `RETRY_MAX_BACKOFF_MS`         | `10000`                  |
    /// | `DLQ_WRITE_TIMEOUT_MS`         | `10000`                  |
    /// | `NOTIFY_EMAIL_ENABLED`         | `true`                   |
    /// | `NOTIFY_SMS_ENABLED`           | `false`                  |
    /// | `NOTIFY_EMAIL_FROM`            | `orders@example.com`     |
    /// | `METRICS_PORT`                 | `9090`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let defaults = Self::default();

        let security_protocol = env.parse("KAFKA_SECURITY_PROTOCOL", defaults.security_protocol)?;
        let credentials = match env.get("KAFKA_SASL_MECHANISM") {
            Some(mechanism) => Some(SaslCredentials {
                mechanism,
                username: env.get("KAFKA_SASL_USERNAME"),
                password: env.get("KAFKA_SASL_PASSWORD"),
            }),
            None if security_protocol.uses_sasl() => {
                return Err(ConfigError::Missing {
                    key: "KAFKA_SASL_MECHANISM",
                    because: "KAFKA_SECURITY_PROTOCOL uses SASL",
                });
            }
            None => None,
        };

        let legacy_schema_id = match env.get("LEGACY_SCHEMA_ID") {
            Some(raw) if raw.eq_ignore_ascii_case("none") => None,
            Some(raw) => Some(parse_value("LEGACY_SCHEMA_ID", &raw)?),
            None => defaults.legacy_schema_id,
        };

        let retry = RetryPolicy {
            max_attempts: env.parse("RETRY_MAX_ATTEMPTS", defaults.consumer.retry.max_attempts)?,
            initial_backoff: env.millis("RETRY_INITIAL_BACKOFF_MS", defaults.consumer.retry.initial_backoff)?,
            max_backoff: env.millis("RETRY_MAX_BACKOFF_MS", defaults.consumer.retry.max_backoff)?,
            multiplier: defaults.consumer.retry.multiplier,
        };

        let config = Self {
            bootstrap_servers: env.get("KAFKA_BOOTSTRAP_SERVERS").unwrap_or(defaults.bootstrap_servers),
            security_protocol,
            credentials,
            schema_registry_url: env.get("SCHEMA_REGISTRY_URL").unwrap_or(defaults.schema_registry_url),
            schema_id: env.parse("SCHEMA_ID", defaults.schema_id)?,
            legacy_schema_id,
            consumer_group_id: env.get("KAFKA_CONSUMER_GROUP").unwrap_or(defaults.consumer_group_id),
            topics: TopicNames {
                order_events: env.get("ORDER_EVENTS_TOPIC").unwrap_or(defaults.topics.order_events),
                dead_letter: env.get("ORDER_EVENTS_DLQ_TOPIC").unwrap_or(defaults.topics.dead_letter),
            },
            producer: ProducerSettings {
                retries: env.parse("PRODUCER_RETRIES", defaults.producer.retries)?,
                message_timeout: env.millis("PRODUCER_MESSAGE_TIMEOUT_MS", defaults.producer.message_timeout)?,
                max_in_flight: defaults.producer.max_in_flight,
            },
            consumer: ConsumerSettings {
                workers: env.parse("CONSUMER_WORKERS", defaults.consumer.workers)?,
                max_poll_records: env.parse("MAX_POLL_RECORDS", defaults.consumer.max_poll_records)?,
                retry,
                dlq_write_timeout: env.millis("DLQ_WRITE_TIMEOUT_MS", defaults.consumer.dlq_write_timeout)?,
                ..defaults.consumer
            },
            notification: NotificationSettings {
                email_enabled: env.parse("NOTIFY_EMAIL_ENABLED", defaults.notification.email_enabled)?,
                sms_enabled: env.parse("NOTIFY_SMS_ENABLED", defaults.notification.sms_enabled)?,
                email_from: env.get("NOTIFY_EMAIL_FROM").unwrap_or(defaults.notification.email_from),
            },
            metrics_port: env.parse("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("CONSUMER_WORKERS", self.consumer.workers),
            ("MAX_POLL_RECORDS", self.consumer.max_poll_records),
            ("RETRY_MAX_ATTEMPTS", self.consumer.retry.max_attempts as usize),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: value.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if self.topics.order_events == self.topics.dead_letter {
            return Err(ConfigError::Invalid {
                key: "ORDER_EVENTS_DLQ_TOPIC",
                value: self.topics.dead_letter.clone(),
                reason: "must differ from ORDER_EVENTS_TOPIC".to_string(),
            });
        }

        Ok(())
    }
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.get(key) {
            Some(raw) => parse_value(key, &raw),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let ms = self.parse(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(ms))
    }
}

fn parse_value<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
