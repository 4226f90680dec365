use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url, header::RETRY_AFTER};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use super::model::{BookSearchResult, SearchResponse, WorkDetails};
use super::{ContentProvider, ProviderError};
use crate::cache::{CacheCategory, Lookup, LookupParams, Payload};

const COVER_BASE_URL: &str = "https://covers.openlibrary.org/b";
const SOURCE_PROVIDER: &str = "openlibrary";
const SEARCH_FIELDS: &str = "key,title,author_name,author_key,first_publish_year,\
edition_count,cover_i,isbn,language,publisher,subject";
const SEARCH_PARAMS: [&str; 4] = ["title", "author", "publisher", "language"];
const MAX_SEARCH_ISBNS: usize = 20;
const MAX_SEARCH_SUBJECTS: usize = 10;
const MAX_WORK_SUBJECTS: usize = 20;
const MAX_WORK_ISBNS: usize = 100;

#[derive(Debug, Clone)]
pub struct OpenLibraryConfig {
    pub base_url: Url,
    pub timeout: Duration,
    /// Tag used in cache keys.
    pub tag: String,
    pub app_name: String,
    pub app_version: String,
    pub contact: String,
    pub page_size: u32,
}

/// Client for the OpenLibrary JSON API.
///
/// Responses are mapped to the provider-agnostic documents in
/// [`super::model`] before they are handed to the cache.
#[derive(Clone)]
pub struct OpenLibraryProvider {
    client: Client,
    base: Url,
    tag: String,
    page_size: u32,
}

impl OpenLibraryProvider {
    pub fn new(config: OpenLibraryConfig) -> Result<Self, ProviderError> {
        let user_agent = Self::user_agent(&config.app_name, &config.app_version, &config.contact);
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            base: config.base_url,
            tag: config.tag,
            page_size: config.page_size,
        })
    }

    pub fn user_agent(app_name: &str, app_version: &str, contact: &str) -> String {
        format!("{app_name}/{app_version} ({contact})")
    }

    pub async fn search(&self, params: &LookupParams) -> Result<SearchResponse, ProviderError> {
        let offset = params
            .get("offset")
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);

        let mut query: Vec<(&str, String)> = SEARCH_PARAMS
            .iter()
            .filter_map(|name| params.get(name).map(|value| (*name, value.to_string())))
            .collect();
        if query.is_empty() {
            return Err(ProviderError::UnsupportedLookup {
                message: "search requires at least one of title, author, publisher, language"
                    .to_string(),
            });
        }
        query.push(("limit", self.page_size.to_string()));
        query.push(("offset", offset.to_string()));
        query.push(("fields", SEARCH_FIELDS.to_string()));

        let raw: RawSearch = self.get_json("search.json", &query, "search").await?;
        Ok(self.map_search(raw))
    }

    pub async fn edition_by_isbn(&self, isbn: &str) -> Result<BookSearchResult, ProviderError> {
        let isbn = isbn.to_uppercase();
        let raw: RawEdition = self
            .get_json(&format!("isbn/{isbn}.json"), &[], &format!("isbn {isbn}"))
            .await?;
        Ok(map_edition(raw, &isbn))
    }

    /// Work details, with ISBNs gathered from the work's editions.
    pub async fn work(&self, work_id: &str) -> Result<WorkDetails, ProviderError> {
        let work_id = work_id.to_uppercase();
        let raw: RawWork = self
            .get_json(&format!("works/{work_id}.json"), &[], &format!("work {work_id}"))
            .await?;
        let editions = match self.editions(&work_id).await {
            Ok(editions) => editions,
            Err(ProviderError::NotFound { .. }) => RawEditions::default(),
            Err(err) => return Err(err),
        };
        Ok(map_work(raw, editions, &format!("/works/{work_id}")))
    }

    async fn editions(&self, work_id: &str) -> Result<RawEditions, ProviderError> {
        let query = [("limit", MAX_WORK_ISBNS.to_string())];
        self.get_json(
            &format!("works/{work_id}/editions.json"),
            &query,
            &format!("editions of {work_id}"),
        )
        .await
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ProviderError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|err| ProviderError::unavailable(format!("invalid provider url: {err}")))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        resource: &str,
    ) -> Result<T, ProviderError> {
        let url = self.url(path, query)?;
        debug!(url = %url, "Fetching from OpenLibrary");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::NotFound {
                resource: resource.to_string(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            warn!(resource, retry_after_secs, "OpenLibrary rate limit hit");
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            warn!(resource, status = status.as_u16(), "OpenLibrary request failed");
            return Err(ProviderError::unavailable(format!(
                "{resource}: status {status}"
            )));
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|err| ProviderError::invalid_response(format!("{resource}: {err}")))
    }

    fn map_search(&self, raw: RawSearch) -> SearchResponse {
        let fetched_at = fetched_at();
        SearchResponse {
            results: raw
                .docs
                .into_iter()
                .map(|doc| BookSearchResult {
                    title: doc.title.unwrap_or_else(|| "Unknown".to_string()),
                    authors: doc.author_name,
                    first_publish_year: doc.first_publish_year,
                    cover_url: doc.cover_i.map(cover_url),
                    isbn_list: doc.isbn.into_iter().take(MAX_SEARCH_ISBNS).collect(),
                    edition_count: doc.edition_count,
                    subjects: doc.subject.into_iter().take(MAX_SEARCH_SUBJECTS).collect(),
                    external_work_key: doc.key,
                    source_provider: SOURCE_PROVIDER.to_string(),
                    fetched_at: fetched_at.clone(),
                })
                .collect(),
            total_found: raw.num_found,
            offset: raw.start,
            limit: self.page_size,
        }
    }
}

#[async_trait]
impl ContentProvider for OpenLibraryProvider {
    fn name(&self) -> &str {
        &self.tag
    }

    async fn fetch(&self, lookup: &Lookup) -> Result<Payload, ProviderError> {
        let payload = match lookup.category() {
            CacheCategory::Search => Payload::from_json(&self.search(lookup.params()).await?),
            CacheCategory::Isbn => {
                let isbn = lookup.isbn_value().ok_or_else(|| ProviderError::UnsupportedLookup {
                    message: "isbn lookup without an isbn".to_string(),
                })?;
                Payload::from_json(&self.edition_by_isbn(isbn).await?)
            }
            CacheCategory::Work => {
                let work = lookup.work_value().ok_or_else(|| ProviderError::UnsupportedLookup {
                    message: "work lookup without a work id".to_string(),
                })?;
                Payload::from_json(&self.work(work).await?)
            }
        };
        payload.map_err(|err| ProviderError::invalid_response(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RawSearch {
    #[serde(default, rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    start: u64,
    #[serde(default)]
    docs: Vec<RawSearchDoc>,
}

#[derive(Debug, Deserialize)]
struct RawSearchDoc {
    #[serde(default)]
    key: String,
    title: Option<String>,
    #[serde(default)]
    author_name: Vec<String>,
    first_publish_year: Option<i32>,
    #[serde(default)]
    edition_count: u32,
    cover_i: Option<i64>,
    #[serde(default)]
    isbn: Vec<String>,
    #[serde(default)]
    subject: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawText {
    Plain(String),
    Typed { value: String },
}

impl RawText {
    fn into_string(self) -> String {
        match self {
            RawText::Plain(value) | RawText::Typed { value } => value,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSubject {
    Name(String),
    Object { name: String },
}

#[derive(Debug, Deserialize)]
struct RawKeyRef {
    key: String,
}

#[derive(Debug, Deserialize)]
struct RawWork {
    title: Option<String>,
    description: Option<RawText>,
    #[serde(default)]
    covers: Vec<i64>,
    #[serde(default)]
    subjects: Vec<RawSubject>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEditions {
    #[serde(default)]
    size: u32,
    #[serde(default)]
    entries: Vec<RawEditionIsbns>,
}

#[derive(Debug, Deserialize)]
struct RawEditionIsbns {
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawEdition {
    title: Option<String>,
    #[serde(default)]
    covers: Vec<i64>,
    #[serde(default)]
    isbn_10: Vec<String>,
    #[serde(default)]
    isbn_13: Vec<String>,
    #[serde(default)]
    works: Vec<RawKeyRef>,
    publish_date: Option<String>,
    #[serde(default)]
    subjects: Vec<RawSubject>,
}

fn map_work(raw: RawWork, editions: RawEditions, work_key: &str) -> WorkDetails {
    let mut isbn_list: Vec<String> = Vec::new();
    for isbn in editions
        .entries
        .into_iter()
        .flat_map(|entry| entry.isbn_13.into_iter().chain(entry.isbn_10))
    {
        if !isbn_list.contains(&isbn) {
            isbn_list.push(isbn);
        }
    }
    isbn_list.truncate(MAX_WORK_ISBNS);

    WorkDetails {
        title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
        authors: Vec::new(),
        description: raw.description.map(RawText::into_string),
        subjects: subject_names(raw.subjects, MAX_WORK_SUBJECTS),
        first_publish_year: None,
        cover_url: positive_cover(&raw.covers).map(cover_url),
        edition_count: editions.size,
        isbn_list,
        external_work_key: work_key.to_string(),
        source_provider: SOURCE_PROVIDER.to_string(),
        fetched_at: fetched_at(),
    }
}

fn map_edition(raw: RawEdition, isbn: &str) -> BookSearchResult {
    let mut isbn_list: Vec<String> = raw.isbn_13.into_iter().chain(raw.isbn_10).collect();
    if isbn_list.is_empty() {
        isbn_list.push(isbn.to_string());
    }
    BookSearchResult {
        title: raw.title.unwrap_or_else(|| "Unknown".to_string()),
        authors: Vec::new(),
        first_publish_year: raw.publish_date.as_deref().and_then(publish_year),
        cover_url: positive_cover(&raw.covers).map(cover_url),
        isbn_list,
        edition_count: 1,
        subjects: subject_names(raw.subjects, MAX_SEARCH_SUBJECTS),
        external_work_key: raw.works.into_iter().next().map(|w| w.key).unwrap_or_default(),
        source_provider: SOURCE_PROVIDER.to_string(),
        fetched_at: fetched_at(),
    }
}

fn subject_names(subjects: Vec<RawSubject>, limit: usize) -> Vec<String> {
    subjects
        .into_iter()
        .map(|subject| match subject {
            RawSubject::Name(name) | RawSubject::Object { name } => name,
        })
        .filter(|name| !name.is_empty())
        .take(limit)
        .collect()
}

/// OpenLibrary uses `-1` as a "no cover" placeholder.
fn positive_cover(covers: &[i64]) -> Option<i64> {
    covers.iter().copied().find(|id| *id > 0)
}

fn cover_url(cover_id: i64) -> String {
    format!("{COVER_BASE_URL}/id/{cover_id}-M.jpg")
}

/// Four-digit year anywhere in a free-form publish date ("March 1999", "1999-03-01").
fn publish_year(raw: &str) -> Option<i32> {
    raw.split(|c: char| !c.is_ascii_digit())
        .find(|token| token.len() == 4)
        .and_then(|token| token.parse().ok())
}

fn fetched_at() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
