use std::error::Error as StdError;

use thiserror::Error;

use crate::{cache::StoreError, infra::error::InfraError, provider::ProviderError};

/// Failure of a cache-fronted lookup.
///
/// Store failures never appear here; only the provider's failure on a cold
/// miss, or a cached document that no longer matches the expected shape.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("cached document for `{key}` could not be decoded: {message}")]
    Decode { key: String, message: String },
}

impl LookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, LookupError::Provider(err) if err.is_not_found())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

/// Messages of `error` and every error in its source chain, outermost first.
pub fn error_chain(error: &dyn StdError) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
