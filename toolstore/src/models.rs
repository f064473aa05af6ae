use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

/// A tracked registry tool together with its derived aggregate fields.
///
/// Created on the first successful synchronization pass, mutated in place on
/// every later pass. The core never hard-deletes a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    pub version: String,
    pub registry_link: String,
    pub homepage: String,
    pub description: String,
    pub maturity: String,
    pub license: String,
    /// First documentation URL, denormalized for the read view.
    pub documentation: String,
    /// Rounded percentage of recent health checks that succeeded, when known.
    pub availability: Option<u8>,
    pub repo: RepoInfo,
    pub citation_count: i64,
    pub impact_factor: f64,
    pub journals: String,
    pub min_year: i32,
    pub max_year: i32,
    pub last_synced: Option<NaiveDate>,
}

/// Code-host metrics for the repository a tool declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub url: String,
    pub created_at: String,
    pub updated_at: String,
    pub forks: i64,
    pub stars: i64,
    /// Sum of per-contributor contribution counts, 0 when unresolvable.
    pub contributions: i64,
}

/// The closed set of child relations owned by a tool.
///
/// Every relation is a set of `(tool_id, natural key)` tuples replaced
/// wholesale on each synchronization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    Topics,
    Operations,
    ToolTypes,
    Platforms,
    Institutes,
    Inputs,
    Outputs,
    Collections,
    Documentation,
    ElixirPlatforms,
    ElixirNodes,
    ElixirCommunities,
}

impl RelationKind {
    pub const ALL: [RelationKind; 12] = [
        RelationKind::Topics,
        RelationKind::Operations,
        RelationKind::ToolTypes,
        RelationKind::Platforms,
        RelationKind::Institutes,
        RelationKind::Inputs,
        RelationKind::Outputs,
        RelationKind::Collections,
        RelationKind::Documentation,
        RelationKind::ElixirPlatforms,
        RelationKind::ElixirNodes,
        RelationKind::ElixirCommunities,
    ];

    pub fn table(self) -> &'static str {
        match self {
            RelationKind::Topics => "topics",
            RelationKind::Operations => "operations",
            RelationKind::ToolTypes => "tool_types",
            RelationKind::Platforms => "platforms",
            RelationKind::Institutes => "institutes",
            RelationKind::Inputs => "inputs",
            RelationKind::Outputs => "outputs",
            RelationKind::Collections => "collections",
            RelationKind::Documentation => "documentation",
            RelationKind::ElixirPlatforms => "elixir_platforms",
            RelationKind::ElixirNodes => "elixir_nodes",
            RelationKind::ElixirCommunities => "elixir_communities",
        }
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

/// One child row: a natural key plus at most one descriptive attribute
/// (a topic's classification URI, a documentation link's kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRow {
    pub key: String,
    pub attr: Option<String>,
}

impl ChildRow {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attr: None,
        }
    }

    pub fn with_attr(key: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            attr: Some(attr.into()),
        }
    }
}

/// A publication attached to a tool, keyed by `(doi, tool_id)`.
///
/// The DOI is lower-cased before any comparison or storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub doi: String,
    pub tool_id: String,
    pub pmid: String,
    pub pmcid: String,
    pub title: String,
    pub authors: String,
    pub journal: String,
    pub published_on: String,
    pub citation_count: i64,
    pub impact: f64,
    /// External search URL for the publication's citing works, empty when no
    /// alternate identifier is known.
    pub citations_link: String,
}

/// Citing-work count for one `(publication, year)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearBucket {
    pub doi: String,
    pub year: i32,
    pub count: i64,
}

/// A stored query definition whose result document is cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: String,
    pub collection: Option<String>,
    pub topic: Option<String>,
    pub tool_ids: Vec<String>,
}

/// The resolved filter of a saved query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryFilter {
    Explicit(Vec<String>),
    Collection(String),
    Topic(String),
}

impl SavedQuery {
    /// Resolves the stored columns into a single filter.
    ///
    /// An explicit tool list takes precedence over the other two filters. A
    /// query carrying both a collection and a topic is rejected rather than
    /// silently prioritized, as is a query carrying neither.
    pub fn filter(&self) -> Result<QueryFilter> {
        if !self.tool_ids.is_empty() {
            return Ok(QueryFilter::Explicit(self.tool_ids.clone()));
        }
        let collection = self.collection.as_deref().filter(|c| !c.is_empty());
        let topic = self.topic.as_deref().filter(|t| !t.is_empty());
        match (collection, topic) {
            (Some(c), None) => Ok(QueryFilter::Collection(c.to_string())),
            (None, Some(t)) => Ok(QueryFilter::Topic(t.to_string())),
            (Some(_), Some(_)) => Err(SyncError::InvalidArg(format!(
                "query '{}' sets both a collection and a topic filter",
                self.id
            ))),
            (None, None) => Err(SyncError::InvalidArg(format!(
                "query '{}' has no filter at all",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_list_takes_precedence() {
        let query = SavedQuery {
            id: "q1".into(),
            collection: Some("elixir-cz".into()),
            topic: None,
            tool_ids: vec!["signalp".into()],
        };
        assert_eq!(
            query.filter().unwrap(),
            QueryFilter::Explicit(vec!["signalp".into()])
        );
    }

    #[test]
    fn ambiguous_filters_are_rejected() {
        let query = SavedQuery {
            id: "q2".into(),
            collection: Some("elixir-cz".into()),
            topic: Some("Proteomics".into()),
            tool_ids: Vec::new(),
        };
        assert!(matches!(query.filter(), Err(SyncError::InvalidArg(_))));
    }

    #[test]
    fn empty_query_is_rejected() {
        let query = SavedQuery {
            id: "q3".into(),
            ..Default::default()
        };
        assert!(matches!(query.filter(), Err(SyncError::InvalidArg(_))));
    }

    #[test]
    fn blank_columns_count_as_unset() {
        let query = SavedQuery {
            id: "q4".into(),
            collection: Some(String::new()),
            topic: Some("Genomics".into()),
            tool_ids: Vec::new(),
        };
        assert_eq!(
            query.filter().unwrap(),
            QueryFilter::Topic("Genomics".into())
        );
    }
}
