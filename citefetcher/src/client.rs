//! Client for the citation registry.
//!
//! Two endpoints matter: identifier search (used to resolve a publication
//! reference to its canonical record) and the paginated citing-work listing
//! (up to 1000 works per page, with a declared total).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use toolstore::errors::{Result as SyncResult, SyncError};
use toolstore::fetch::{CitationPage, CitationSource, PublicationId, ResolvedPublication};

use crate::error::{CitationError, Result};

pub const DEFAULT_CITATION_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

/// Public search frontend the per-publication citing-works link points at.
const PUBLIC_SEARCH_URL: &str = "https://europepmc.org/search";

/// Corpus assumed when a resolved record does not name one.
const DEFAULT_CORPUS: &str = "MED";

const PAGE_SIZE: u32 = 1000;

pub struct CitationClient {
    http: reqwest::Client,
    base_url: String,
}

impl CitationClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T>(&self, url: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        log::debug!("GET {url}");
        let response = self.http.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(CitationError::Api(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CitationSource for CitationClient {
    async fn resolve(&self, id: &PublicationId) -> SyncResult<Option<ResolvedPublication>> {
        let value = match id {
            PublicationId::Doi(doi) => doi,
            PublicationId::Pmid(pmid) => pmid,
            PublicationId::Pmcid(pmcid) => pmcid,
        };
        let response: SearchResponseDto = self
            .get_json(
                &format!("{}/search", self.base_url),
                &[
                    ("query", value.clone()),
                    ("pageSize", PAGE_SIZE.to_string()),
                    ("format", "json".to_string()),
                ],
            )
            .await
            .map_err(transient)?;

        let hits = response
            .result_list
            .map(|list| list.result)
            .unwrap_or_default();
        let matched = hits.into_iter().find(|hit| hit.matches(id));
        Ok(matched.map(HitDto::into_resolved))
    }

    async fn citing_page(&self, source: &str, pmid: &str, page: u32) -> SyncResult<CitationPage> {
        let corpus = if source.is_empty() {
            DEFAULT_CORPUS
        } else {
            source
        };
        let response: CitationsResponseDto = self
            .get_json(
                &format!(
                    "{}/{corpus}/{pmid}/citations/{page}/{PAGE_SIZE}/json",
                    self.base_url
                ),
                &[],
            )
            .await
            .map_err(transient)?;

        Ok(CitationPage {
            hit_count: response.hit_count,
            years: response
                .citation_list
                .map(|list| {
                    list.citation
                        .into_iter()
                        .filter_map(|citing| citing.pub_year)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn citations_link(&self, source: &str, pmid: &str) -> String {
        let corpus = if source.is_empty() {
            DEFAULT_CORPUS
        } else {
            source
        };
        format!("{PUBLIC_SEARCH_URL}?query=CITES%3A{pmid}_{corpus}")
    }
}

fn transient(err: CitationError) -> SyncError {
    SyncError::Transient(err.to_string())
}

#[derive(Debug, Deserialize)]
struct SearchResponseDto {
    #[serde(default, rename = "resultList")]
    result_list: Option<ResultListDto>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultListDto {
    #[serde(default)]
    result: Vec<HitDto>,
}

#[derive(Debug, Default, Deserialize)]
struct HitDto {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default, rename = "authorString")]
    author_string: Option<String>,
    #[serde(default, rename = "journalTitle")]
    journal_title: Option<String>,
    #[serde(default, rename = "firstPublicationDate")]
    first_publication_date: Option<String>,
    #[serde(default, rename = "pubYear", deserialize_with = "year_string_or_number")]
    pub_year: Option<String>,
    #[serde(default, rename = "citedByCount")]
    cited_by_count: Option<i64>,
}

impl HitDto {
    /// Whether this hit is the record the identifier asked for: DOIs compare
    /// case-insensitively, alternate identifiers against the record ID.
    fn matches(&self, id: &PublicationId) -> bool {
        match id {
            PublicationId::Doi(doi) => self
                .doi
                .as_deref()
                .map(|hit_doi| hit_doi.eq_ignore_ascii_case(doi))
                .unwrap_or(false),
            PublicationId::Pmid(pmid) => self.id.as_deref() == Some(pmid),
            PublicationId::Pmcid(pmcid) => self.id.as_deref() == Some(pmcid),
        }
    }

    fn into_resolved(self) -> ResolvedPublication {
        ResolvedPublication {
            doi: self.doi.map(|doi| doi.to_lowercase()),
            pmid: self.id,
            source: self.source.unwrap_or_default(),
            title: self.title.unwrap_or_default(),
            authors: self.author_string.unwrap_or_default(),
            journal: self.journal_title.unwrap_or_default(),
            published_on: self
                .first_publication_date
                .or(self.pub_year)
                .unwrap_or_default(),
            cited_by: self.cited_by_count.unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CitationsResponseDto {
    #[serde(default, rename = "hitCount")]
    hit_count: u64,
    #[serde(default, rename = "citationList")]
    citation_list: Option<CitationListDto>,
}

#[derive(Debug, Default, Deserialize)]
struct CitationListDto {
    #[serde(default)]
    citation: Vec<CitingDto>,
}

#[derive(Debug, Deserialize)]
struct CitingDto {
    #[serde(default, rename = "pubYear", deserialize_with = "year_number_or_string")]
    pub_year: Option<i32>,
}

/// The service reports publication years inconsistently as numbers or
/// strings; normalize to a string.
fn year_string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(year) => Ok(Some(year)),
        serde_json::Value::Number(year) => Ok(Some(year.to_string())),
        serde_json::Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected year as string or number, got {other}"
        ))),
    }
}

/// Same inconsistency, normalized to a number.
fn year_number_or_string<'de, D>(deserializer: D) -> std::result::Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(year) => Ok(year.as_i64().map(|y| y as i32)),
        serde_json::Value::String(year) => Ok(year.parse().ok()),
        serde_json::Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected year as number or string, got {other}"
        ))),
    }
}
