use async_trait::async_trait;
use url::Url;

use crate::errors::Result;
use crate::models::RepoInfo;

/// One tool as reported by the registry.
///
/// Child lists are raw external data: they may contain duplicates and blank
/// entries, and callers must clean them before diffing.
#[derive(Debug, Clone, Default)]
pub struct ToolSnapshot {
    pub id: String,
    pub name: String,
    pub description: String,
    pub homepage: String,
    pub maturity: String,
    pub license: String,
    pub versions: Vec<String>,
    pub tool_types: Vec<String>,
    pub platforms: Vec<String>,
    pub collections: Vec<String>,
    pub elixir_platforms: Vec<String>,
    pub elixir_nodes: Vec<String>,
    pub elixir_communities: Vec<String>,
    pub topics: Vec<Annotation>,
    pub functions: Vec<ToolFunction>,
    pub credits: Vec<Credit>,
    pub documentation: Vec<DocLink>,
    pub links: Vec<LinkEntry>,
    pub publications: Vec<PublicationRef>,
}

/// An ontology-annotated term (topic or operation).
#[derive(Debug, Clone, Default)]
pub struct Annotation {
    pub term: String,
    pub uri: String,
}

/// One function block: operations plus input and output data terms.
#[derive(Debug, Clone, Default)]
pub struct ToolFunction {
    pub operations: Vec<Annotation>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Credit {
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocLink {
    pub url: String,
    pub kind: String,
}

/// A declared external link with its type labels.
#[derive(Debug, Clone, Default)]
pub struct LinkEntry {
    pub url: String,
    pub kinds: Vec<String>,
}

/// A publication reference as declared by the registry: zero or more of a
/// DOI and the two alternate identifiers.
#[derive(Debug, Clone, Default)]
pub struct PublicationRef {
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
}

/// One page of a filtered registry listing.
#[derive(Debug, Clone, Default)]
pub struct RegistryPage {
    pub total: u64,
    pub items: Vec<ToolSnapshot>,
    pub has_next: bool,
}

/// The filters a registry listing can be scoped by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryFilter {
    Collection(String),
    Topic(String),
}

/// Read-only access to the tool registry.
///
/// `fetch_tool` returning `Ok(None)` means the tool is absent upstream, which
/// is terminal for the entity and not an error. All errors are transient.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn fetch_tool(&self, id: &str) -> Result<Option<ToolSnapshot>>;

    /// Fetches one page (1-based) of the listing matching `filter`.
    async fn fetch_page(&self, filter: &RegistryFilter, page: u32) -> Result<RegistryPage>;

    /// Whether the registry's keyword search for `tag`, scoped to `id`,
    /// returns at least one hit.
    async fn matches_classification(&self, id: &str, tag: &str) -> Result<bool>;

    /// The public URL of a tool's registry page.
    fn public_link(&self, id: &str) -> String;
}

/// An identifier a publication reference can be resolved by, in fallback
/// order: DOI first, then the alternate identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicationId {
    Doi(String),
    Pmid(String),
    Pmcid(String),
}

/// A publication record as resolved by a citation source.
#[derive(Debug, Clone, Default)]
pub struct ResolvedPublication {
    /// Canonical DOI reported by the source; overrides the input DOI.
    pub doi: Option<String>,
    pub pmid: Option<String>,
    /// Corpus tag of the source that resolved the record.
    pub source: String,
    pub title: String,
    pub authors: String,
    pub journal: String,
    pub published_on: String,
    pub cited_by: i64,
}

/// One page of citing works, up to 1000 per page.
#[derive(Debug, Clone, Default)]
pub struct CitationPage {
    /// Total citing works declared by the source, across all pages.
    pub hit_count: u64,
    /// Publication year of every citing work on this page.
    pub years: Vec<i32>,
}

#[async_trait]
pub trait CitationSource: Send + Sync {
    /// Looks one identifier up; `Ok(None)` means the source has no match.
    async fn resolve(&self, id: &PublicationId) -> Result<Option<ResolvedPublication>>;

    /// Fetches one page (1-based) of works citing `pmid` in `source`.
    async fn citing_page(&self, source: &str, pmid: &str, page: u32) -> Result<CitationPage>;

    /// Public search URL for the works citing `pmid`, shown on the read view.
    fn citations_link(&self, source: &str, pmid: &str) -> String;
}

#[async_trait]
pub trait AvailabilityProbe: Send + Sync {
    /// Rounded percentage of recent health checks that succeeded, or `None`
    /// when the monitor knows no endpoint for the tool. Transport failure is
    /// an error and must be treated as "unknown", never as zero.
    async fn availability(&self, id: &str) -> Result<Option<u8>>;
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Repository metadata plus summed contributor contribution counts.
    /// `Ok(None)` means the host does not know the repository.
    async fn repo_metrics(&self, owner: &str, repo: &str) -> Result<Option<RepoInfo>>;
}

const REPOSITORY_HOST: &str = "github.com";

/// Picks the first declared link that points at a repository on the
/// recognized host.
pub fn find_repository_link(links: &[LinkEntry]) -> Option<&str> {
    links
        .iter()
        .find(|link| {
            link.kinds.iter().any(|kind| kind.contains("Repository"))
                && link.url.contains(REPOSITORY_HOST)
        })
        .map(|link| link.url.as_str())
}

/// Extracts the `(owner, repo)` pair from a repository URL.
///
/// A trailing slash is stripped first; a bare host URL has no pair.
pub fn parse_owner_repo(link: &str) -> Option<(String, String)> {
    let trimmed = link.trim_end_matches('/');
    let parsed = Url::parse(trimmed).ok()?;
    if !parsed.host_str()?.ends_with(REPOSITORY_HOST) {
        return None;
    }
    let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
    let owner = segments.next()?;
    let repo = segments.next()?;
    Some((owner.to_string(), repo.to_string()))
}

/// Normalizes the registry's version list into one display string: the first
/// entry, `v`-prefixed when it is not already.
pub fn normalize_version(versions: &[String]) -> String {
    match versions.first() {
        None => String::new(),
        Some(first) if first.starts_with('v') => first.clone(),
        Some(first) => format!("v{first}"),
    }
}
