//! Cached values and their freshness metadata.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};
use time::OffsetDateTime;

/// Opaque JSON document returned by a content provider.
///
/// The cache never inspects the shape; consumers decode into their own types.
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Bytes);

impl Payload {
    pub fn from_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_vec(value).map(|bytes| Self(Bytes::from(bytes)))
    }

    pub fn from_value(value: &serde_json::Value) -> Self {
        Self(Bytes::from(value.to_string()))
    }

    /// Wrap raw bytes after checking they hold a JSON document.
    pub fn from_slice(bytes: impl Into<Bytes>) -> Result<Self, serde_json::Error> {
        let bytes = bytes.into();
        serde_json::from_slice::<serde::de::IgnoredAny>(&bytes)?;
        Ok(Self(bytes))
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.0)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        self.decode()
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload").field("len", &self.0.len()).finish()
    }
}

/// A cached payload with its lifetime.
///
/// `expires_at - created_at` is the jittered TTL; `original_ttl` keeps the
/// base TTL so the staleness ratio survives repopulation between tiers.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Payload,
    pub source: String,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    pub original_ttl: Duration,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(
        key: impl Into<String>,
        payload: Payload,
        source: impl Into<String>,
        created_at: OffsetDateTime,
        ttl: Duration,
        original_ttl: Duration,
    ) -> Self {
        Self {
            key: key.into(),
            payload,
            source: source.into(),
            created_at,
            expires_at: created_at
                .saturating_add(time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX)),
            original_ttl,
            hit_count: 0,
        }
    }

    /// Lifetime left at `now`; zero once expired.
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(self.expires_at - now).unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at <= now
    }

    /// Jittered lifetime the entry was stored with.
    pub fn ttl(&self) -> Duration {
        Duration::try_from(self.expires_at - self.created_at).unwrap_or(Duration::ZERO)
    }
}
