//! Content providers: the upstream metadata sources the cache sits in front of.

mod model;
mod openlibrary;

use async_trait::async_trait;
use thiserror::Error;

use crate::cache::{Lookup, Payload};

pub use model::{BookSearchResult, SearchResponse, WorkDetails};
pub use openlibrary::{OpenLibraryConfig, OpenLibraryProvider};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("resource not found: {resource}")]
    NotFound { resource: String },
    #[error("provider rate limit exceeded")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },
    #[error("provider returned an unexpected response: {message}")]
    InvalidResponse { message: String },
    #[error("unsupported lookup: {message}")]
    UnsupportedLookup { message: String },
}

impl ProviderError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::invalid_response(err.to_string())
        } else {
            Self::unavailable(err.to_string())
        }
    }
}

/// An upstream source of book metadata.
///
/// Failures are returned as-is; retrying is the caller's decision.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    /// Tag embedded in cache keys for this provider.
    fn name(&self) -> &str;

    async fn fetch(&self, lookup: &Lookup) -> Result<Payload, ProviderError>;
}
