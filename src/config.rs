//! Template configuration.
//!
//! A [`TemplateConfig`] can be assembled with [`TemplateConfigBuilder`],
//! parsed from a `key=value;key=value` string, or deserialized from JSON.
//!
//! # Keys
//!
//! | Key                     | Value                                  |
//! |-------------------------|----------------------------------------|
//! | `consistency`           | consistency level, e.g. `LOCAL_QUORUM` |
//! | `serial_consistency`    | `SERIAL` or `LOCAL_SERIAL`             |
//! | `retry_policy`          | `default`, `fallthrough`, `logging(..)`|
//! | `tracing`               | `true` / `false`                       |
//! | `fetch_size`            | rows per page                          |
//! | `ttl`                   | seconds                                |
//! | `timeout_ms`            | default bounded-wait timeout           |
//! | `ingest_max_in_flight`  | concurrent ingest writes               |
//! | `keyspace`              | keyspace label used in log output      |

use crate::error::ConfigError;
use crate::query::{Consistency, ExecuteOptions, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration shared by every call made through a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Options used when a call passes no options
    pub default_options: ExecuteOptions,

    /// Timeout used by bounded entry points when the caller gives none
    #[serde(rename = "default_timeout_ms", with = "millis")]
    pub default_timeout: Option<Duration>,

    /// Maximum concurrent writes during ingest (default: 1)
    pub ingest_max_in_flight: usize,

    /// Keyspace label used in log output
    pub keyspace: Option<String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            default_options: ExecuteOptions::default(),
            default_timeout: None,
            ingest_max_in_flight: 1,
            keyspace: None,
        }
    }
}

impl TemplateConfig {
    /// Create a new TemplateConfigBuilder.
    pub fn builder() -> TemplateConfigBuilder {
        TemplateConfigBuilder::new()
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: TemplateConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ingest_max_in_flight == 0 {
            return Err(ConfigError::invalid(
                "ingest_max_in_flight",
                "must be at least 1",
            ));
        }
        if self.default_options.fetch_size == Some(0) {
            return Err(ConfigError::invalid("fetch_size", "must be greater than 0"));
        }
        if self.default_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("timeout_ms", "must be greater than 0"));
        }
        if let Some(serial) = self.default_options.serial_consistency {
            if !serial.is_serial() {
                return Err(ConfigError::invalid(
                    "serial_consistency",
                    format!("{} is not a serial consistency level", serial),
                ));
            }
        }
        Ok(())
    }
}

impl FromStr for TemplateConfig {
    type Err = ConfigError;

    /// Parse a configuration string of `key=value` pairs separated by `;`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use cqlexec::config::TemplateConfig;
    /// # use cqlexec::query::Consistency;
    /// # use std::str::FromStr;
    /// let config = TemplateConfig::from_str(
    ///     "consistency=LOCAL_QUORUM; fetch_size=500; timeout_ms=2000"
    /// )?;
    ///
    /// assert_eq!(config.default_options.consistency, Some(Consistency::LocalQuorum));
    /// assert_eq!(config.default_options.fetch_size, Some(500));
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut builder = TemplateConfigBuilder::new();

        for pair in s.split(';') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::ParseError(format!("Invalid parameter format: {}", pair))
            })?;
            let key = key.trim().to_lowercase();
            let value = value.trim();

            builder = match key.as_str() {
                "consistency" => builder.consistency(
                    value
                        .parse()
                        .map_err(|e: String| ConfigError::invalid(&key, e))?,
                ),
                "serial_consistency" => builder.serial_consistency(
                    value
                        .parse()
                        .map_err(|e: String| ConfigError::invalid(&key, e))?,
                ),
                "retry_policy" => builder.retry_policy(
                    value
                        .parse()
                        .map_err(|e: String| ConfigError::invalid(&key, e))?,
                ),
                "tracing" => builder.tracing(parse_bool(&key, value)?),
                "fetch_size" => builder.fetch_size(parse_number(&key, value)?),
                "ttl" => builder.ttl(parse_number(&key, value)?),
                "timeout_ms" | "timeout" => {
                    builder.default_timeout(Duration::from_millis(parse_number(&key, value)?))
                }
                "ingest_max_in_flight" => builder.ingest_max_in_flight(parse_number(&key, value)?),
                "keyspace" => builder.keyspace(value),
                _ => return Err(ConfigError::UnknownParameter(key)),
            };
        }

        builder.build()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(key, format!("'{}' is not a boolean", value))),
    }
}

fn parse_number<N: FromStr>(key: &str, value: &str) -> Result<N, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a valid number", value)))
}

/// Builder for constructing TemplateConfig with validation.
#[derive(Debug, Clone, Default)]
pub struct TemplateConfigBuilder {
    options: ExecuteOptions,
    default_timeout: Option<Duration>,
    ingest_max_in_flight: Option<usize>,
    keyspace: Option<String>,
}

impl TemplateConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the default options wholesale.
    pub fn default_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.options.consistency = Some(consistency);
        self
    }

    pub fn serial_consistency(mut self, consistency: Consistency) -> Self {
        self.options.serial_consistency = Some(consistency);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.options.retry_policy = Some(policy);
        self
    }

    pub fn tracing(mut self, tracing: bool) -> Self {
        self.options.tracing = tracing;
        self
    }

    pub fn fetch_size(mut self, fetch_size: u32) -> Self {
        self.options.fetch_size = Some(fetch_size);
        self
    }

    pub fn ttl(mut self, ttl_secs: u32) -> Self {
        self.options.ttl = Some(ttl_secs);
        self
    }

    /// Set the timeout used by bounded calls without an explicit timeout.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Set the ingest in-flight window.
    pub fn ingest_max_in_flight(mut self, max: usize) -> Self {
        self.ingest_max_in_flight = Some(max);
        self
    }

    pub fn keyspace(mut self, keyspace: &str) -> Self {
        self.keyspace = Some(keyspace.to_string());
        self
    }

    /// Build the TemplateConfig with validation.
    pub fn build(self) -> Result<TemplateConfig, ConfigError> {
        let config = TemplateConfig {
            default_options: self.options,
            default_timeout: self.default_timeout,
            ingest_max_in_flight: self.ingest_max_in_flight.unwrap_or(1),
            keyspace: self.keyspace,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Optional durations as integer milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TemplateConfig::default();
        assert_eq!(config.ingest_max_in_flight, 1);
        assert!(config.default_options.is_empty());
        assert_eq!(config.default_timeout, None);
    }

    #[test]
    fn test_builder() {
        let config = TemplateConfig::builder()
            .consistency(Consistency::Quorum)
            .tracing(true)
            .default_timeout(Duration::from_millis(250))
            .ingest_max_in_flight(8)
            .keyspace("app")
            .build()
            .unwrap();

        assert_eq!(config.default_options.consistency, Some(Consistency::Quorum));
        assert!(config.default_options.tracing);
        assert_eq!(config.default_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.ingest_max_in_flight, 8);
        assert_eq!(config.keyspace.as_deref(), Some("app"));
    }

    #[test]
    fn test_builder_validation() {
        let result = TemplateConfig::builder().ingest_max_in_flight(0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter { ref parameter, .. }) if parameter == "ingest_max_in_flight"
        ));

        let result = TemplateConfig::builder()
            .serial_consistency(Consistency::Quorum)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_string() {
        let config: TemplateConfig =
            "consistency=one;retry_policy=logging(fallthrough);tracing=yes;ttl=60;ingest_max_in_flight=4;"
                .parse()
                .unwrap();

        assert_eq!(config.default_options.consistency, Some(Consistency::One));
        assert_eq!(
            config.default_options.retry_policy,
            Some(RetryPolicy::Logging(Box::new(RetryPolicy::Fallthrough)))
        );
        assert!(config.default_options.tracing);
        assert_eq!(config.default_options.ttl, Some(60));
        assert_eq!(config.ingest_max_in_flight, 4);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "bogus=1".parse::<TemplateConfig>(),
            Err(ConfigError::UnknownParameter(_))
        ));
        assert!(matches!(
            "fetch_size".parse::<TemplateConfig>(),
            Err(ConfigError::ParseError(_))
        ));
        assert!(matches!(
            "fetch_size=many".parse::<TemplateConfig>(),
            Err(ConfigError::InvalidParameter { .. })
        ));
        assert!(matches!(
            "consistency=SOME".parse::<TemplateConfig>(),
            Err(ConfigError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_json() {
        let config = TemplateConfig::from_json(
            r#"{
                "default_options": { "consistency": "LOCAL_ONE", "fetch_size": 100 },
                "default_timeout_ms": 1500,
                "ingest_max_in_flight": 2
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_options.consistency, Some(Consistency::LocalOne));
        assert_eq!(config.default_options.fetch_size, Some(100));
        assert_eq!(config.default_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.ingest_max_in_flight, 2);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"default_timeout_ms\":1500"));

        assert!(TemplateConfig::from_json(r#"{"ingest_max_in_flight": 0}"#).is_err());
        assert!(TemplateConfig::from_json("not json").is_err());
    }
}
