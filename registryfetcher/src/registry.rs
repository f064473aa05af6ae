//! Client for the public tool registry.
//!
//! The registry speaks JSON over HTTP: one-tool lookups by ID, paginated
//! listings filtered by collection or topic, and a keyword search used for
//! the classification probes.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use toolstore::errors::{Result as SyncResult, SyncError};
use toolstore::fetch::{
    Annotation, Credit, DocLink, LinkEntry, PublicationRef, RegistryFilter, RegistryPage,
    RegistrySource, ToolFunction, ToolSnapshot,
};

use crate::error::{RegistryError, Result};

pub const DEFAULT_REGISTRY_URL: &str = "https://bio.tools";

pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
}

impl RegistryClient {
    /// Creates a client against `base_url` with a bounded request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn list_tools(&self, query: &[(&str, String)]) -> Result<ToolListDto> {
        let url = format!("{}/api/tool/", self.base_url);
        log::debug!("GET {url}");
        let response = self.http.get(&url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Api(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl RegistrySource for RegistryClient {
    async fn fetch_tool(&self, id: &str) -> SyncResult<Option<ToolSnapshot>> {
        let listing = self
            .list_tools(&[
                ("biotoolsID", format!("\"{id}\"")),
                ("format", "json".to_string()),
            ])
            .await
            .map_err(transient)?;
        Ok(listing.list.into_iter().next().map(ToolDto::into_snapshot))
    }

    async fn fetch_page(&self, filter: &RegistryFilter, page: u32) -> SyncResult<RegistryPage> {
        let (field, value) = match filter {
            RegistryFilter::Collection(tag) => ("collectionID", tag),
            RegistryFilter::Topic(term) => ("topic", term),
        };
        let listing = self
            .list_tools(&[
                ("page", page.to_string()),
                (field, format!("\"{value}\"")),
                ("format", "json".to_string()),
            ])
            .await
            .map_err(transient)?;
        Ok(RegistryPage {
            total: listing.count,
            has_next: listing.next.is_some(),
            items: listing
                .list
                .into_iter()
                .map(ToolDto::into_snapshot)
                .collect(),
        })
    }

    async fn matches_classification(&self, id: &str, tag: &str) -> SyncResult<bool> {
        let listing = self
            .list_tools(&[
                ("page", "1".to_string()),
                ("q", tag.to_string()),
                ("biotoolsID", format!("\"{id}\"")),
                ("format", "json".to_string()),
            ])
            .await
            .map_err(transient)?;
        Ok(listing.count >= 1)
    }

    fn public_link(&self, id: &str) -> String {
        format!("{}/{id}", self.base_url)
    }
}

fn transient(err: RegistryError) -> SyncError {
    SyncError::Transient(err.to_string())
}

#[derive(Debug, Deserialize)]
struct ToolListDto {
    #[serde(default)]
    count: u64,
    #[serde(default)]
    next: Option<String>,
    #[serde(default)]
    list: Vec<ToolDto>,
}

#[derive(Debug, Deserialize)]
struct ToolDto {
    #[serde(rename = "biotoolsID")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    homepage: Option<String>,
    #[serde(default)]
    maturity: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    version: Vec<String>,
    #[serde(default, rename = "toolType")]
    tool_type: Vec<String>,
    #[serde(default, rename = "operatingSystem")]
    operating_system: Vec<String>,
    #[serde(default)]
    topic: Vec<AnnotationDto>,
    #[serde(default)]
    function: Vec<FunctionDto>,
    #[serde(default)]
    credit: Vec<CreditDto>,
    #[serde(default)]
    documentation: Vec<DocumentationDto>,
    #[serde(default, rename = "collectionID")]
    collection_id: Vec<String>,
    #[serde(default, rename = "elixirPlatform")]
    elixir_platform: Vec<String>,
    #[serde(default, rename = "elixirNode")]
    elixir_node: Vec<String>,
    #[serde(default, rename = "elixirCommunity")]
    elixir_community: Vec<String>,
    #[serde(default)]
    link: Vec<LinkDto>,
    #[serde(default)]
    publication: Vec<PublicationDto>,
}

#[derive(Debug, Default, Deserialize)]
struct AnnotationDto {
    #[serde(default)]
    term: Option<String>,
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FunctionDto {
    #[serde(default)]
    operation: Vec<AnnotationDto>,
    #[serde(default)]
    input: Vec<DataRefDto>,
    #[serde(default)]
    output: Vec<DataRefDto>,
}

#[derive(Debug, Deserialize)]
struct DataRefDto {
    #[serde(default)]
    data: Option<AnnotationDto>,
}

#[derive(Debug, Deserialize)]
struct CreditDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "typeEntity")]
    type_entity: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentationDto {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "string_or_seq")]
    kinds: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LinkDto {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, rename = "type", deserialize_with = "string_or_seq")]
    kinds: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PublicationDto {
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    pmcid: Option<String>,
}

impl ToolDto {
    fn into_snapshot(self) -> ToolSnapshot {
        ToolSnapshot {
            id: self.id,
            name: self.name.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            homepage: self.homepage.unwrap_or_default(),
            maturity: self.maturity.unwrap_or_default(),
            license: self.license.unwrap_or_default(),
            versions: self.version,
            tool_types: self.tool_type,
            platforms: self.operating_system,
            collections: self.collection_id,
            elixir_platforms: self.elixir_platform,
            elixir_nodes: self.elixir_node,
            elixir_communities: self.elixir_community,
            topics: self.topic.into_iter().map(AnnotationDto::into_annotation).collect(),
            functions: self
                .function
                .into_iter()
                .map(|function| ToolFunction {
                    operations: function
                        .operation
                        .into_iter()
                        .map(AnnotationDto::into_annotation)
                        .collect(),
                    inputs: function
                        .input
                        .into_iter()
                        .map(|data_ref| {
                            data_ref
                                .data
                                .and_then(|data| data.term)
                                .unwrap_or_default()
                        })
                        .collect(),
                    outputs: function
                        .output
                        .into_iter()
                        .map(|data_ref| {
                            data_ref
                                .data
                                .and_then(|data| data.term)
                                .unwrap_or_default()
                        })
                        .collect(),
                })
                .collect(),
            credits: self
                .credit
                .into_iter()
                .map(|credit| Credit {
                    name: credit.name.unwrap_or_default(),
                    entity_type: credit.type_entity.unwrap_or_default(),
                })
                .collect(),
            documentation: self
                .documentation
                .into_iter()
                .map(|doc| DocLink {
                    url: doc.url.unwrap_or_default(),
                    kind: doc.kinds.into_iter().next().unwrap_or_default(),
                })
                .collect(),
            links: self
                .link
                .into_iter()
                .map(|link| LinkEntry {
                    url: link.url.unwrap_or_default(),
                    kinds: link.kinds,
                })
                .collect(),
            publications: self
                .publication
                .into_iter()
                .map(|publication| PublicationRef {
                    doi: publication.doi,
                    pmid: publication.pmid,
                    pmcid: publication.pmcid,
                })
                .collect(),
        }
    }
}

impl AnnotationDto {
    fn into_annotation(self) -> Annotation {
        Annotation {
            term: self.term.unwrap_or_default(),
            uri: self.uri.unwrap_or_default(),
        }
    }
}

/// The registry serializes some `type` fields as a single string in older
/// records and as a list in newer ones; accept both.
fn string_or_seq<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: serde_json::Value = Deserialize::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(single) => Ok(vec![single]),
        serde_json::Value::Array(values) => Ok(values
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or list of strings, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_creation() {
        let client = RegistryClient::new(DEFAULT_REGISTRY_URL, Duration::from_secs(5)).unwrap();
        assert_eq!(client.public_link("signalp"), "https://bio.tools/signalp");
    }

    const SAMPLE: &str = r#"{
        "count": 1,
        "next": "?page=2",
        "list": [{
            "biotoolsID": "signalp",
            "name": "SignalP",
            "description": "Signal peptide prediction",
            "homepage": "https://services.healthtech.dtu.dk/signalp",
            "maturity": "Mature",
            "license": null,
            "version": ["5.0"],
            "toolType": ["Command-line tool"],
            "operatingSystem": ["Linux", "Mac"],
            "topic": [{"term": "Proteomics", "uri": "http://edamontology.org/topic_0121"}],
            "function": [{
                "operation": [{"term": "Protein signal peptide detection", "uri": null}],
                "input": [{"data": {"term": "Protein sequence"}}],
                "output": [{"data": {"term": "Sequence report"}}]
            }],
            "credit": [{"name": "DTU", "typeEntity": "Institute"}],
            "documentation": [{"url": "https://example.org/docs", "type": "User manual"}],
            "collectionID": ["elixir-cz"],
            "elixirPlatform": [],
            "elixirNode": ["Denmark"],
            "elixirCommunity": [],
            "link": [{"url": "https://github.com/acme/signalp", "type": ["Repository"]}],
            "publication": [{"doi": "10.1000/p1", "pmid": "30778233", "pmcid": null}]
        }]
    }"#;

    #[test]
    fn listing_parses_and_maps_to_a_snapshot() {
        let listing: ToolListDto = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(listing.count, 1);
        assert!(listing.next.is_some());

        let snapshot = listing
            .list
            .into_iter()
            .next()
            .unwrap()
            .into_snapshot();
        assert_eq!(snapshot.id, "signalp");
        assert_eq!(snapshot.license, "");
        assert_eq!(snapshot.platforms, vec!["Linux", "Mac"]);
        assert_eq!(snapshot.topics[0].term, "Proteomics");
        assert_eq!(snapshot.functions[0].inputs, vec!["Protein sequence"]);
        assert_eq!(snapshot.functions[0].operations[0].uri, "");
        // Single-string documentation type is accepted.
        assert_eq!(snapshot.documentation[0].kind, "User manual");
        assert_eq!(snapshot.links[0].kinds, vec!["Repository"]);
        assert_eq!(snapshot.publications[0].doi.as_deref(), Some("10.1000/p1"));
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let listing: ToolListDto =
            serde_json::from_str(r#"{"count": 0, "list": [{"biotoolsID": "bare"}]}"#).unwrap();
        let snapshot = listing.list.into_iter().next().unwrap().into_snapshot();
        assert!(snapshot.collections.is_empty());
        assert!(snapshot.publications.is_empty());
    }
}
