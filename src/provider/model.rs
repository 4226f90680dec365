//! Provider-agnostic documents stored as cache payloads.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSearchResult {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub first_publish_year: Option<i32>,
    pub cover_url: Option<String>,
    #[serde(default)]
    pub isbn_list: Vec<String>,
    #[serde(default)]
    pub edition_count: u32,
    #[serde(default)]
    pub subjects: Vec<String>,
    /// Provider work path, e.g. `/works/OL27448W`.
    pub external_work_key: String,
    pub source_provider: String,
    #[serde(default)]
    pub fetched_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<BookSearchResult>,
    pub total_found: u64,
    pub offset: u64,
    pub limit: u32,
}

impl SearchResponse {
    pub fn has_more(&self) -> bool {
        self.offset + (self.results.len() as u64) < self.total_found
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkDetails {
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub subjects: Vec<String>,
    pub first_publish_year: Option<i32>,
    pub cover_url: Option<String>,
    #[serde(default)]
    pub edition_count: u32,
    #[serde(default)]
    pub isbn_list: Vec<String>,
    pub external_work_key: String,
    pub source_provider: String,
    #[serde(default)]
    pub fetched_at: String,
}
