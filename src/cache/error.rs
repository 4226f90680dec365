use std::fmt;

use thiserror::Error;

/// Which cache tier produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Durable,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "hot",
            Tier::Durable => "durable",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{tier} store unavailable: {message}")]
    Unavailable { tier: Tier, message: String },
    #[error("{tier} store operation `{op}` timed out after {timeout_ms}ms")]
    Timeout {
        tier: Tier,
        op: &'static str,
        timeout_ms: u64,
    },
    #[error("corrupt {tier} entry `{key}`: {message}")]
    Corrupt {
        tier: Tier,
        key: String,
        message: String,
    },
}

impl StoreError {
    pub fn hot_unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            tier: Tier::Hot,
            message: message.into(),
        }
    }

    pub fn durable_unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            tier: Tier::Durable,
            message: message.into(),
        }
    }

    pub fn corrupt(tier: Tier, key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Corrupt {
            tier,
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn tier(&self) -> Tier {
        match self {
            Self::Unavailable { tier, .. }
            | Self::Timeout { tier, .. }
            | Self::Corrupt { tier, .. } => *tier,
        }
    }

    /// Short label used for the `kind` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "unavailable",
            Self::Timeout { .. } => "timeout",
            Self::Corrupt { .. } => "corrupt",
        }
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::hot_unavailable(err.to_string())
    }
}
