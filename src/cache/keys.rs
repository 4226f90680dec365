//! Cache key normalization.
//!
//! A logical lookup (search fields or a single identifier) is reduced to a
//! canonical `name=value` string, hashed, and prefixed with its category and
//! provider tag: `search:<provider>:<digest>`.

use std::collections::BTreeMap;
use std::fmt;

use sha2::{Digest, Sha256};

/// Hex characters of the SHA-256 digest kept in a key.
pub const DIGEST_LEN: usize = 16;

const ISBN_FIELD: &str = "isbn";
const WORK_FIELD: &str = "work";

/// Category of cached lookup; the first segment of every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheCategory {
    /// Free-text search results.
    Search,
    /// Book details resolved by ISBN.
    Isbn,
    /// Work details resolved by provider work identifier.
    Work,
}

impl CacheCategory {
    pub const ALL: [CacheCategory; 3] = [Self::Search, Self::Isbn, Self::Work];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheCategory::Search => "search",
            CacheCategory::Isbn => "isbn",
            CacheCategory::Work => "work",
        }
    }

    /// Resolve the category encoded in a key's first segment.
    pub fn from_key(key: &str) -> Option<Self> {
        let prefix = key.split_once(':').map_or(key, |(prefix, _)| prefix);
        Self::ALL.into_iter().find(|c| c.as_str() == prefix)
    }

    /// Glob matching every key of this category, optionally scoped to one provider.
    pub fn pattern(self, provider: Option<&str>) -> String {
        match provider {
            Some(provider) => format!("{}:{}:*", self.as_str(), provider_tag(provider)),
            None => format!("{}:*", self.as_str()),
        }
    }
}

impl fmt::Display for CacheCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized lookup fields.
///
/// Names and values are trimmed and lowercased on insertion, empty values are
/// dropped, and iteration is always in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupParams {
    fields: BTreeMap<String, String>,
}

impl LookupParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .into_iter()
            .fold(Self::new(), |params, (name, value)| params.with(name, value))
    }

    /// Add a field. Blank names or values are ignored.
    pub fn with(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.insert(name.as_ref(), value.as_ref());
        self
    }

    /// Add an optional field; `None` is treated like a blank value.
    pub fn with_opt(self, name: impl AsRef<str>, value: Option<impl AsRef<str>>) -> Self {
        match value {
            Some(value) => self.with(name, value),
            None => self,
        }
    }

    fn insert(&mut self, name: &str, value: &str) {
        let name = normalize(name);
        let value = normalize(value);
        if name.is_empty() || value.is_empty() {
            return;
        }
        self.fields.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Canonical `name=value&name=value` form, sorted by name.
    pub fn canonical(&self) -> String {
        self.iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// A logical lookup against a content provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    category: CacheCategory,
    params: LookupParams,
}

impl Lookup {
    pub fn new(category: CacheCategory, params: LookupParams) -> Self {
        Self { category, params }
    }

    pub fn search(params: LookupParams) -> Self {
        Self::new(CacheCategory::Search, params)
    }

    /// ISBN lookup. Hyphens and inner whitespace are not significant.
    pub fn isbn(isbn: &str) -> Self {
        let compact: String = isbn
            .chars()
            .filter(|c| *c != '-' && !c.is_whitespace())
            .collect();
        Self::new(
            CacheCategory::Isbn,
            LookupParams::new().with(ISBN_FIELD, compact),
        )
    }

    /// Work lookup. Accepts `/works/OL27448W`, `works/OL27448W` or `OL27448W`.
    pub fn work(work_key: &str) -> Self {
        let trimmed = work_key.trim().trim_start_matches('/');
        let id = trimmed.strip_prefix("works/").unwrap_or(trimmed);
        Self::new(CacheCategory::Work, LookupParams::new().with(WORK_FIELD, id))
    }

    pub fn category(&self) -> CacheCategory {
        self.category
    }

    pub fn params(&self) -> &LookupParams {
        &self.params
    }

    /// Normalized ISBN, for ISBN lookups.
    pub fn isbn_value(&self) -> Option<&str> {
        self.params.get(ISBN_FIELD)
    }

    /// Normalized work identifier, for work lookups.
    pub fn work_value(&self) -> Option<&str> {
        self.params.get(WORK_FIELD)
    }

    pub fn key(&self, provider: &str) -> String {
        build_key(self.category, provider, &self.params)
    }
}

/// Build the cache key for a normalized lookup.
pub fn build_key(category: CacheCategory, provider: &str, params: &LookupParams) -> String {
    format!(
        "{}:{}:{}",
        category.as_str(),
        provider_tag(provider),
        digest(&params.canonical())
    )
}

fn digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(DIGEST_LEN);
    encoded
}

/// Provider tag restricted to `[a-z0-9_-]` so keys stay identifier-safe.
pub fn provider_tag(provider: &str) -> String {
    let tag: String = provider
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if tag.is_empty() {
        "_".to_string()
    } else {
        tag
    }
}
