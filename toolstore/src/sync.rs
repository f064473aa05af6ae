//! One synchronization pass per tracked tool.
//!
//! The synchronizer drives `Fetching → Reconciling-Children →
//! Aggregating-Citations → Computing-Derived-Fields → Committing` for one
//! tool at a time. Failures are contained per unit: one relation, one
//! publication or one page never aborts its siblings, while a fetch failure
//! leaves the entity untouched for the next scheduled run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::citations::CitationAggregator;
use crate::errors::{Result, SyncError};
use crate::fetch::{
    find_repository_link, normalize_version, parse_owner_repo, AvailabilityProbe, CodeHost,
    RegistryFilter, RegistrySource, ToolSnapshot,
};
use crate::materialize::{DOMAIN_TAGS, LIFECYCLE_TAGS};
use crate::models::{ChildRow, QueryFilter, RelationKind, RepoInfo, SavedQuery, Tool};
use crate::reconcile::{dedup_first_wins, reconcile};
use crate::store::RecordStore;

/// What one pass did for one tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    /// Already synchronized in the current run-day.
    SkippedFresh,
    /// Absent upstream; terminal, not an error.
    NotFound,
}

/// Tally of one run (or one query) over many tools.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub missing: usize,
    pub failed: usize,
    /// IDs whose persisted state changed in this run.
    pub touched: Vec<String>,
}

impl SyncReport {
    fn record(&mut self, id: &str, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Created => {
                self.created += 1;
                self.touched.push(id.to_string());
            }
            SyncOutcome::Updated => {
                self.updated += 1;
                self.touched.push(id.to_string());
            }
            SyncOutcome::SkippedFresh => self.skipped += 1,
            SyncOutcome::NotFound => self.missing += 1,
        }
    }

    fn merge(&mut self, other: SyncReport) {
        self.created += other.created;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.missing += other.missing;
        self.failed += other.failed;
        self.touched.extend(other.touched);
    }
}

pub struct ToolSynchronizer {
    store: Arc<dyn RecordStore>,
    registry: Arc<dyn RegistrySource>,
    aggregator: CitationAggregator,
    availability: Arc<dyn AvailabilityProbe>,
    code_host: Arc<dyn CodeHost>,
    /// Per-entity commit locks: two concurrent passes for the same tool must
    /// never interleave their writes.
    commit_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ToolSynchronizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<dyn RegistrySource>,
        aggregator: CitationAggregator,
        availability: Arc<dyn AvailabilityProbe>,
        code_host: Arc<dyn CodeHost>,
    ) -> Self {
        Self {
            store,
            registry,
            aggregator,
            availability,
            code_host,
            commit_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Synchronizes one tool by registry ID.
    pub async fn sync_tool(&self, id: &str) -> Result<SyncOutcome> {
        self.sync_tool_with(id, false).await
    }

    /// Synchronizes one tool; `force` bypasses the synced-today check.
    pub async fn sync_tool_with(&self, id: &str, force: bool) -> Result<SyncOutcome> {
        let snapshot = match self.registry.fetch_tool(id).await? {
            Some(snapshot) => snapshot,
            None => {
                log::info!("tool '{id}' is gone upstream, leaving local state as is");
                return Ok(SyncOutcome::NotFound);
            }
        };
        self.sync_snapshot(&snapshot, force).await
    }

    /// Runs the full pass for an already fetched snapshot.
    pub async fn sync_snapshot(&self, snapshot: &ToolSnapshot, force: bool) -> Result<SyncOutcome> {
        let id = snapshot.id.as_str();
        if id.is_empty() {
            return Err(SyncError::InvalidArg(
                "snapshot carries no registry ID".into(),
            ));
        }

        let existing = self.store.get_tool(id)?;
        let today = Utc::now().date_naive();
        if let Some(tool) = &existing {
            if !force && tool.last_synced == Some(today) {
                log::info!("tool '{id}' already synchronized today, skipping");
                return Ok(SyncOutcome::SkippedFresh);
            }
        }

        let lock = self.commit_lock(id);
        let _guard = lock.lock().await;

        // Reconciling-Children. For a first-seen tool the cleaned sets are
        // collected and inserted together with the parent below.
        let mut first_seen_children: Vec<(RelationKind, Vec<ChildRow>)> = Vec::new();
        for kind in RelationKind::ALL {
            let desired = dedup_first_wins(desired_rows(snapshot, kind));
            if existing.is_none() {
                first_seen_children.push((kind, desired));
                continue;
            }
            let persisted = self.store.relation_rows(id, kind)?;
            let delta = reconcile(&desired, &persisted);
            if delta.is_empty() {
                continue;
            }
            log::info!(
                "tool '{id}': {kind} +{} -{}",
                delta.to_add.len(),
                delta.to_remove.len()
            );
            if let Err(err) = self.store.apply_relation_delta(id, kind, &delta) {
                // One relation's failure blocks neither its siblings nor the
                // parent update.
                log::warn!("tool '{id}': {kind} delta rejected, skipping relation: {err}");
            }
        }

        // Aggregating-Citations.
        let rollup = match self
            .aggregator
            .aggregate(self.store.as_ref(), id, &snapshot.publications)
            .await
        {
            Ok(rollup) => Some(rollup),
            Err(err) if err.is_transient() => {
                log::warn!("tool '{id}': aggregation failed, retaining prior aggregates: {err}");
                None
            }
            Err(err) => return Err(err),
        };
        let fallback_year = self.aggregator.fallback_year();
        let (citation_count, impact_factor, journals, min_year, max_year) = match rollup {
            Some(rollup) => (
                rollup.citation_count,
                rollup.impact_factor,
                rollup.journals,
                rollup.min_year,
                rollup.max_year,
            ),
            None => match &existing {
                Some(tool) => (
                    tool.citation_count,
                    tool.impact_factor,
                    tool.journals.clone(),
                    tool.min_year,
                    tool.max_year,
                ),
                None => (0, 0.0, String::new(), fallback_year, fallback_year),
            },
        };

        // Computing-Derived-Fields.
        let availability = match self.availability.availability(id).await {
            Ok(value) => value,
            Err(err) => {
                log::warn!("tool '{id}': availability probe unreachable, keeping prior: {err}");
                existing.as_ref().and_then(|tool| tool.availability)
            }
        };
        let repo = self.repo_metrics_for(snapshot, existing.as_ref()).await;

        // Committing.
        let tool = Tool {
            id: id.to_string(),
            name: snapshot.name.clone(),
            version: normalize_version(&snapshot.versions),
            registry_link: self.registry.public_link(id),
            homepage: snapshot.homepage.clone(),
            description: snapshot.description.clone(),
            maturity: snapshot.maturity.clone(),
            license: snapshot.license.clone(),
            documentation: snapshot
                .documentation
                .first()
                .map(|doc| doc.url.clone())
                .unwrap_or_default(),
            availability,
            repo,
            citation_count,
            impact_factor,
            journals,
            min_year,
            max_year,
            last_synced: Some(today),
        };

        match existing {
            None => {
                self.store.create_tool(&tool, &first_seen_children)?;
                log::info!("tool '{id}': created");
                if let Err(err) = self.classify_tool(id).await {
                    log::warn!("tool '{id}': classification pass failed: {err}");
                }
                Ok(SyncOutcome::Created)
            }
            Some(_) => {
                self.store.update_tool(&tool)?;
                log::info!("tool '{id}': updated");
                if self.store.classifications_for(id)?.is_empty() {
                    if let Err(err) = self.classify_tool(id).await {
                        log::warn!("tool '{id}': classification pass failed: {err}");
                    }
                }
                Ok(SyncOutcome::Updated)
            }
        }
    }

    /// Synchronizes every tool a saved query covers.
    pub async fn sync_query(&self, query: &SavedQuery) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let filter = match query.filter()? {
            QueryFilter::Explicit(ids) => {
                for id in &ids {
                    match self.sync_tool(id).await {
                        Ok(outcome) => report.record(id, outcome),
                        Err(err) => {
                            log::error!("tool '{id}' failed to synchronize: {err}");
                            report.failed += 1;
                        }
                    }
                }
                return Ok(report);
            }
            QueryFilter::Collection(tag) => RegistryFilter::Collection(tag),
            QueryFilter::Topic(term) => RegistryFilter::Topic(term),
        };

        let mut page = 1u32;
        loop {
            let listing = match self.registry.fetch_page(&filter, page).await {
                Ok(listing) => listing,
                Err(err) => {
                    // Lost page: give up on the remainder of this query and
                    // let the next scheduled run retry.
                    log::error!("query '{}': page {page} failed, aborting: {err}", query.id);
                    report.failed += 1;
                    break;
                }
            };
            for snapshot in &listing.items {
                match self.sync_snapshot(snapshot, false).await {
                    Ok(outcome) => report.record(&snapshot.id, outcome),
                    Err(err) => {
                        log::error!("tool '{}' failed to synchronize: {err}", snapshot.id);
                        report.failed += 1;
                    }
                }
            }
            if !listing.has_next {
                break;
            }
            page += 1;
        }
        Ok(report)
    }

    /// One full run: every saved query, sequentially.
    pub async fn run(&self) -> Result<SyncReport> {
        let queries = self.store.saved_queries()?;
        let mut report = SyncReport::default();
        for query in queries {
            log::info!("synchronizing query '{}'", query.id);
            match self.sync_query(&query).await {
                Ok(query_report) => report.merge(query_report),
                Err(err) => {
                    log::error!("query '{}' failed: {err}", query.id);
                    report.failed += 1;
                }
            }
        }
        log::info!(
            "run finished: {} created, {} updated, {} fresh, {} missing, {} failed",
            report.created,
            report.updated,
            report.skipped,
            report.missing,
            report.failed
        );
        Ok(report)
    }

    /// Records which domain and lifecycle tags the registry associates with a
    /// tool. Already recorded tags are not probed again.
    pub async fn classify_tool(&self, id: &str) -> Result<()> {
        for tag in DOMAIN_TAGS.iter().chain(LIFECYCLE_TAGS.iter()) {
            if self.store.has_classification(id, tag)? {
                continue;
            }
            match self.registry.matches_classification(id, tag).await {
                Ok(true) => self.store.record_classification(id, tag)?,
                Ok(false) => {}
                Err(err) => {
                    log::warn!("tool '{id}': classification probe '{tag}' failed: {err}");
                    break;
                }
            }
        }
        Ok(())
    }

    async fn repo_metrics_for(&self, snapshot: &ToolSnapshot, prior: Option<&Tool>) -> RepoInfo {
        let Some(link) = find_repository_link(&snapshot.links) else {
            return RepoInfo::default();
        };
        let url = link.trim_end_matches('/').to_string();
        let Some((owner, repo)) = parse_owner_repo(link) else {
            // Declared but not a recognizable owner/repo pair: keep the URL,
            // zero the metrics.
            return RepoInfo {
                url,
                ..Default::default()
            };
        };
        match self.code_host.repo_metrics(&owner, &repo).await {
            Ok(Some(mut metrics)) => {
                metrics.url = url;
                metrics
            }
            Ok(None) => RepoInfo {
                url,
                ..Default::default()
            },
            Err(err) => {
                log::warn!("repository {owner}/{repo}: metrics fetch failed, keeping prior: {err}");
                prior.map(|tool| tool.repo.clone()).unwrap_or(RepoInfo {
                    url,
                    ..Default::default()
                })
            }
        }
    }

    fn commit_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.commit_locks.lock().unwrap();
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

/// Extracts the raw child list for one relation kind from a snapshot.
fn desired_rows(snapshot: &ToolSnapshot, kind: RelationKind) -> Vec<ChildRow> {
    fn names(values: &[String]) -> Vec<ChildRow> {
        values.iter().map(ChildRow::new).collect()
    }
    fn annotations(values: &[crate::fetch::Annotation]) -> Vec<ChildRow> {
        values
            .iter()
            .map(|a| ChildRow {
                key: a.term.clone(),
                attr: (!a.uri.is_empty()).then(|| a.uri.clone()),
            })
            .collect()
    }

    match kind {
        RelationKind::Topics => annotations(&snapshot.topics),
        RelationKind::Operations => snapshot
            .functions
            .first()
            .map(|f| annotations(&f.operations))
            .unwrap_or_default(),
        RelationKind::ToolTypes => names(&snapshot.tool_types),
        RelationKind::Platforms => names(&snapshot.platforms),
        RelationKind::Institutes => snapshot
            .credits
            .iter()
            .filter(|credit| credit.entity_type == "Institute")
            .map(|credit| ChildRow::new(credit.name.clone()))
            .collect(),
        RelationKind::Inputs => snapshot
            .functions
            .first()
            .map(|f| names(&f.inputs))
            .unwrap_or_default(),
        RelationKind::Outputs => snapshot
            .functions
            .first()
            .map(|f| names(&f.outputs))
            .unwrap_or_default(),
        RelationKind::Collections => names(&snapshot.collections),
        RelationKind::Documentation => snapshot
            .documentation
            .iter()
            .map(|doc| ChildRow {
                key: doc.url.clone(),
                attr: (!doc.kind.is_empty()).then(|| doc.kind.clone()),
            })
            .collect(),
        RelationKind::ElixirPlatforms => names(&snapshot.elixir_platforms),
        RelationKind::ElixirNodes => names(&snapshot.elixir_nodes),
        RelationKind::ElixirCommunities => names(&snapshot.elixir_communities),
    }
}
