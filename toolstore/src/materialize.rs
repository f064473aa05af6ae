//! Denormalized read-view documents for saved queries.
//!
//! A saved query names a set of tools; the materializer re-derives the full
//! nested document (tools, child relations, publications with year buckets,
//! classification buckets) and caches it by query ID. Documents are only
//! recomputed on first materialization or after a synchronization pass
//! invalidates them.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::errors::Result;
use crate::models::{Publication, QueryFilter, RelationKind, SavedQuery, Tool};
use crate::store::RecordStore;

/// Domain classification tags a tool can be recorded as matching.
pub const DOMAIN_TAGS: [&str; 16] = [
    "dna sequence",
    "dna secondary structure",
    "dna structure",
    "genomics",
    "rna sequence",
    "rna secondary structure",
    "rna structure",
    "rna omics",
    "protein sequence",
    "protein secondary structure",
    "protein structure",
    "protein omics",
    "small molecule primary sequence",
    "small molecule secondary structure",
    "small molecule structure",
    "small molecule omics",
];

/// Lifecycle-stage classification tags.
pub const LIFECYCLE_TAGS: [&str; 7] = [
    "acquisition",
    "data processing",
    "analysis",
    "storage",
    "share",
    "data management",
    "fair",
];

#[derive(Debug, Serialize)]
pub struct ResultDocument {
    pub heading: String,
    pub tools: Vec<ToolView>,
    pub domain_buckets: Vec<Bucket>,
    pub lifecycle_buckets: Vec<Bucket>,
}

/// One named bucket of the classification partition. A tool appears in every
/// bucket whose tag it matches; membership is not exclusive.
#[derive(Debug, Serialize)]
pub struct Bucket {
    pub tag: String,
    pub size: usize,
    pub tool_ids: Vec<String>,
}

/// A tool with every child relation and publication nested in.
#[derive(Debug, Serialize)]
pub struct ToolView {
    #[serde(flatten)]
    pub tool: Tool,
    pub topics: Vec<TermView>,
    pub operations: Vec<TermView>,
    pub tool_types: Vec<String>,
    pub platforms: Vec<String>,
    pub institutes: Vec<String>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub collections: Vec<String>,
    /// The full documentation-link relation; the flattened tool record keeps
    /// only the first URL.
    pub documentations: Vec<DocView>,
    pub elixir_platforms: Vec<String>,
    pub elixir_nodes: Vec<String>,
    pub elixir_communities: Vec<String>,
    pub classifications: Vec<String>,
    pub publications: Vec<PublicationView>,
}

#[derive(Debug, Serialize)]
pub struct TermView {
    pub term: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DocView {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PublicationView {
    #[serde(flatten)]
    pub publication: Publication,
    pub years: Vec<YearView>,
}

#[derive(Debug, Serialize)]
pub struct YearView {
    pub year: i32,
    pub count: i64,
}

pub struct QueryMaterializer {
    store: Arc<dyn RecordStore>,
}

impl QueryMaterializer {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Re-derives the result document for a query, bypassing the cache.
    pub fn materialize(&self, query: &SavedQuery) -> Result<ResultDocument> {
        let filter = query.filter()?;
        let tools = self.resolve_tools(&filter)?;
        let mut views = Vec::with_capacity(tools.len());
        for tool in tools {
            views.push(self.tool_view(tool)?);
        }
        let domain_buckets = partition(&views, &DOMAIN_TAGS);
        let lifecycle_buckets = partition(&views, &LIFECYCLE_TAGS);
        Ok(ResultDocument {
            heading: heading(&filter),
            tools: views,
            domain_buckets,
            lifecycle_buckets,
        })
    }

    /// The cached serialized document, computing and caching it on a miss.
    pub fn cached_or_materialize(&self, query: &SavedQuery) -> Result<String> {
        if let Some(document) = self.store.get_result_document(&query.id)? {
            return Ok(document);
        }
        self.refresh(query)
    }

    /// Recomputes, caches and returns the serialized document.
    pub fn refresh(&self, query: &SavedQuery) -> Result<String> {
        let document = serde_json::to_string(&self.materialize(query)?)?;
        self.store.put_result_document(&query.id, &document)?;
        log::info!("query '{}': result document refreshed", query.id);
        Ok(document)
    }

    /// Invalidates and recomputes the cached document of every saved query
    /// covering at least one of the touched tools. Returns how many were
    /// refreshed.
    pub fn refresh_affected(&self, touched: &[String]) -> Result<usize> {
        if touched.is_empty() {
            return Ok(0);
        }
        let touched: HashSet<&str> = touched.iter().map(String::as_str).collect();
        let mut refreshed = 0;
        for query in self.store.saved_queries()? {
            let filter = match query.filter() {
                Ok(filter) => filter,
                Err(err) => {
                    log::warn!("query '{}' is not materializable: {err}", query.id);
                    continue;
                }
            };
            let covered = self.resolve_tools(&filter)?;
            if covered.iter().any(|tool| touched.contains(tool.id.as_str())) {
                self.store.invalidate_result_document(&query.id)?;
                self.refresh(&query)?;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    fn resolve_tools(&self, filter: &QueryFilter) -> Result<Vec<Tool>> {
        match filter {
            QueryFilter::Explicit(ids) => {
                let mut tools = Vec::new();
                for id in ids {
                    match self.store.get_tool(id)? {
                        Some(tool) => tools.push(tool),
                        None => log::warn!("query names unknown tool '{id}', skipping"),
                    }
                }
                Ok(tools)
            }
            QueryFilter::Collection(tag) => self.store.tools_in_collection(tag),
            QueryFilter::Topic(term) => self.store.tools_with_topic(term),
        }
    }

    fn tool_view(&self, tool: Tool) -> Result<ToolView> {
        let id = tool.id.clone();
        let terms = |kind: RelationKind| -> Result<Vec<TermView>> {
            Ok(self
                .store
                .relation_rows(&id, kind)?
                .into_iter()
                .map(|row| TermView {
                    term: row.key,
                    uri: row.attr,
                })
                .collect())
        };
        let keys = |kind: RelationKind| -> Result<Vec<String>> {
            Ok(self
                .store
                .relation_rows(&id, kind)?
                .into_iter()
                .map(|row| row.key)
                .collect())
        };

        let mut publications = Vec::new();
        for publication in self.store.publications_for(&id)? {
            let years = self
                .store
                .years_for(&publication.doi)?
                .into_iter()
                .map(|bucket| YearView {
                    year: bucket.year,
                    count: bucket.count,
                })
                .collect();
            publications.push(PublicationView { publication, years });
        }

        Ok(ToolView {
            topics: terms(RelationKind::Topics)?,
            operations: terms(RelationKind::Operations)?,
            tool_types: keys(RelationKind::ToolTypes)?,
            platforms: keys(RelationKind::Platforms)?,
            institutes: keys(RelationKind::Institutes)?,
            inputs: keys(RelationKind::Inputs)?,
            outputs: keys(RelationKind::Outputs)?,
            collections: keys(RelationKind::Collections)?,
            documentations: self
                .store
                .relation_rows(&id, RelationKind::Documentation)?
                .into_iter()
                .map(|row| DocView {
                    url: row.key,
                    kind: row.attr,
                })
                .collect(),
            elixir_platforms: keys(RelationKind::ElixirPlatforms)?,
            elixir_nodes: keys(RelationKind::ElixirNodes)?,
            elixir_communities: keys(RelationKind::ElixirCommunities)?,
            classifications: self.store.classifications_for(&id)?,
            publications,
            tool,
        })
    }
}

fn partition(views: &[ToolView], tags: &[&str]) -> Vec<Bucket> {
    tags.iter()
        .map(|tag| {
            let tool_ids: Vec<String> = views
                .iter()
                .filter(|view| view.classifications.iter().any(|t| t == tag))
                .map(|view| view.tool.id.clone())
                .collect();
            Bucket {
                tag: tag.to_string(),
                size: tool_ids.len(),
                tool_ids,
            }
        })
        .collect()
}

fn heading(filter: &QueryFilter) -> String {
    match filter {
        QueryFilter::Collection(tag) => format!("All tools from the {tag} collection"),
        QueryFilter::Topic(term) => format!("All tools about the {term} topic"),
        QueryFilter::Explicit(_) => "All tools from a custom query".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_names_the_filter() {
        assert_eq!(
            heading(&QueryFilter::Collection("elixir-cz".into())),
            "All tools from the elixir-cz collection"
        );
        assert_eq!(
            heading(&QueryFilter::Topic("Proteomics".into())),
            "All tools about the Proteomics topic"
        );
        assert_eq!(
            heading(&QueryFilter::Explicit(vec!["signalp".into()])),
            "All tools from a custom query"
        );
    }

    #[test]
    fn tag_lists_are_disjoint() {
        for tag in DOMAIN_TAGS {
            assert!(!LIFECYCLE_TAGS.contains(&tag));
        }
    }
}
