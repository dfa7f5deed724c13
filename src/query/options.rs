//! Per-call execution options.
//!
//! `ExecuteOptions` is pure data. Entry points take an
//! `Option<&ExecuteOptions>`: `None` selects the template's configured
//! defaults, while `Some(&ExecuteOptions::default())` explicitly sets nothing
//! and leaves every setting to the driver.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Consistency level of a read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl Consistency {
    /// Whether this level is only valid as a serial (LWT) consistency.
    pub fn is_serial(&self) -> bool {
        matches!(self, Consistency::Serial | Consistency::LocalSerial)
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::Serial => "SERIAL",
            Consistency::LocalSerial => "LOCAL_SERIAL",
            Consistency::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

impl FromStr for Consistency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "SERIAL" => Ok(Consistency::Serial),
            "LOCAL_SERIAL" => Ok(Consistency::LocalSerial),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            other => Err(format!("unknown consistency level '{}'", other)),
        }
    }
}

/// Retry policy requested from the driver.
///
/// The execution core never retries by itself; the policy is handed to the
/// driver unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Driver default policy
    Default,
    /// Retry at a lower consistency level when replicas are missing
    DowngradingConsistency,
    /// Never retry, surface every failure
    Fallthrough,
    /// Log every retry decision of the wrapped policy
    Logging(Box<RetryPolicy>),
}

impl FromStr for RetryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if let Some(inner) = s
            .strip_prefix("logging(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Ok(RetryPolicy::Logging(Box::new(inner.parse()?)));
        }
        match s.as_str() {
            "default" => Ok(RetryPolicy::Default),
            "downgrading_consistency" | "downgrading" => Ok(RetryPolicy::DowngradingConsistency),
            "fallthrough" => Ok(RetryPolicy::Fallthrough),
            other => Err(format!("unknown retry policy '{}'", other)),
        }
    }
}

/// Immutable per-call configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Consistency level
    pub consistency: Option<Consistency>,
    /// Serial consistency for conditional updates
    pub serial_consistency: Option<Consistency>,
    /// Retry policy handed to the driver
    pub retry_policy: Option<RetryPolicy>,
    /// Request server-side tracing
    pub tracing: bool,
    /// Page size for result fetching
    pub fetch_size: Option<u32>,
    /// Write timestamp in microseconds since the epoch
    pub timestamp: Option<i64>,
    /// Time-to-live for written cells, in seconds
    pub ttl: Option<u32>,
}

impl ExecuteOptions {
    /// Create options with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_serial_consistency(mut self, consistency: Consistency) -> Self {
        self.serial_consistency = Some(consistency);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_timestamp(mut self, timestamp_micros: i64) -> Self {
        self.timestamp = Some(timestamp_micros);
        self
    }

    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl = Some(ttl_secs);
        self
    }

    /// Whether no setting is present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}
