use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use toolstore::citations::CitationAggregator;
use toolstore::errors::{Result, SyncError};
use toolstore::fetch::{
    Annotation, AvailabilityProbe, CitationPage, CitationSource, CodeHost, Credit, DocLink,
    LinkEntry, PublicationId, PublicationRef, RegistryFilter, RegistryPage, RegistrySource,
    ResolvedPublication, ToolFunction, ToolSnapshot,
};
use toolstore::impact::JournalImpacts;
use toolstore::models::{ChildRow, Publication, RelationKind, RepoInfo, SavedQuery, Tool, YearBucket};
use toolstore::reconcile::RelationDelta;
use toolstore::store::{RecordStore, SqliteStore};
use toolstore::sync::{SyncOutcome, ToolSynchronizer};

#[derive(Default)]
struct MockRegistry {
    snapshots: Mutex<HashMap<String, ToolSnapshot>>,
    pages: Vec<RegistryPage>,
    matching_tags: HashSet<String>,
}

#[async_trait]
impl RegistrySource for MockRegistry {
    async fn fetch_tool(&self, id: &str) -> Result<Option<ToolSnapshot>> {
        Ok(self.snapshots.lock().unwrap().get(id).cloned())
    }

    async fn fetch_page(&self, _filter: &RegistryFilter, page: u32) -> Result<RegistryPage> {
        Ok(self
            .pages
            .get((page - 1) as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn matches_classification(&self, _id: &str, tag: &str) -> Result<bool> {
        Ok(self.matching_tags.contains(tag))
    }

    fn public_link(&self, id: &str) -> String {
        format!("https://registry.example/{id}")
    }
}

#[derive(Default)]
struct MockAvailability {
    value: Mutex<Option<u8>>,
    down: AtomicBool,
}

#[async_trait]
impl AvailabilityProbe for MockAvailability {
    async fn availability(&self, _id: &str) -> Result<Option<u8>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("monitor unreachable".into()));
        }
        Ok(*self.value.lock().unwrap())
    }
}

#[derive(Default)]
struct MockCodeHost {
    metrics: Mutex<HashMap<String, RepoInfo>>,
}

#[async_trait]
impl CodeHost for MockCodeHost {
    async fn repo_metrics(&self, owner: &str, repo: &str) -> Result<Option<RepoInfo>> {
        Ok(self
            .metrics
            .lock()
            .unwrap()
            .get(&format!("{owner}/{repo}"))
            .cloned())
    }
}

#[derive(Default)]
struct MockCitations {
    records: Mutex<HashMap<String, ResolvedPublication>>,
    down: AtomicBool,
}

#[async_trait]
impl CitationSource for MockCitations {
    async fn resolve(&self, id: &PublicationId) -> Result<Option<ResolvedPublication>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SyncError::Transient("citation source unreachable".into()));
        }
        let key = match id {
            PublicationId::Doi(doi) => doi.clone(),
            PublicationId::Pmid(pmid) => pmid.clone(),
            PublicationId::Pmcid(pmcid) => pmcid.clone(),
        };
        Ok(self.records.lock().unwrap().get(&key).cloned())
    }

    async fn citing_page(&self, _source: &str, _pmid: &str, _page: u32) -> Result<CitationPage> {
        Ok(CitationPage::default())
    }

    fn citations_link(&self, source: &str, pmid: &str) -> String {
        format!("https://citations.example/search?query=CITES:{pmid}_{source}")
    }
}

/// Store wrapper that can reject one relation's deltas and logs every delta
/// it forwards, so tests can observe write traffic.
struct InstrumentedStore {
    inner: SqliteStore,
    fail_relation: Mutex<Option<RelationKind>>,
    deltas: Mutex<Vec<(RelationKind, usize, usize)>>,
}

impl InstrumentedStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            fail_relation: Mutex::new(None),
            deltas: Mutex::new(Vec::new()),
        }
    }

    fn applied_deltas(&self) -> usize {
        self.deltas.lock().unwrap().len()
    }
}

impl RecordStore for InstrumentedStore {
    fn get_tool(&self, id: &str) -> Result<Option<Tool>> {
        self.inner.get_tool(id)
    }
    fn create_tool(&self, tool: &Tool, children: &[(RelationKind, Vec<ChildRow>)]) -> Result<()> {
        self.inner.create_tool(tool, children)
    }
    fn update_tool(&self, tool: &Tool) -> Result<()> {
        self.inner.update_tool(tool)
    }
    fn tool_ids(&self) -> Result<Vec<String>> {
        self.inner.tool_ids()
    }
    fn tools_in_collection(&self, tag: &str) -> Result<Vec<Tool>> {
        self.inner.tools_in_collection(tag)
    }
    fn tools_with_topic(&self, term: &str) -> Result<Vec<Tool>> {
        self.inner.tools_with_topic(term)
    }
    fn relation_rows(&self, tool_id: &str, kind: RelationKind) -> Result<Vec<ChildRow>> {
        self.inner.relation_rows(tool_id, kind)
    }
    fn apply_relation_delta(
        &self,
        tool_id: &str,
        kind: RelationKind,
        delta: &RelationDelta,
    ) -> Result<()> {
        if *self.fail_relation.lock().unwrap() == Some(kind) {
            return Err(SyncError::Conflict(format!("injected failure for {kind}")));
        }
        self.deltas
            .lock()
            .unwrap()
            .push((kind, delta.to_add.len(), delta.to_remove.len()));
        self.inner.apply_relation_delta(tool_id, kind, delta)
    }
    fn get_publication(&self, tool_id: &str, doi: &str) -> Result<Option<Publication>> {
        self.inner.get_publication(tool_id, doi)
    }
    fn upsert_publication(&self, publication: &Publication) -> Result<()> {
        self.inner.upsert_publication(publication)
    }
    fn publications_for(&self, tool_id: &str) -> Result<Vec<Publication>> {
        self.inner.publications_for(tool_id)
    }
    fn years_for(&self, doi: &str) -> Result<Vec<YearBucket>> {
        self.inner.years_for(doi)
    }
    fn set_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()> {
        self.inner.set_year_count(doi, year, count)
    }
    fn add_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()> {
        self.inner.add_year_count(doi, year, count)
    }
    fn has_classification(&self, tool_id: &str, tag: &str) -> Result<bool> {
        self.inner.has_classification(tool_id, tag)
    }
    fn record_classification(&self, tool_id: &str, tag: &str) -> Result<()> {
        self.inner.record_classification(tool_id, tag)
    }
    fn classifications_for(&self, tool_id: &str) -> Result<Vec<String>> {
        self.inner.classifications_for(tool_id)
    }
    fn saved_queries(&self) -> Result<Vec<SavedQuery>> {
        self.inner.saved_queries()
    }
    fn get_saved_query(&self, id: &str) -> Result<Option<SavedQuery>> {
        self.inner.get_saved_query(id)
    }
    fn insert_saved_query(&self, query: &SavedQuery) -> Result<()> {
        self.inner.insert_saved_query(query)
    }
    fn get_result_document(&self, query_id: &str) -> Result<Option<String>> {
        self.inner.get_result_document(query_id)
    }
    fn put_result_document(&self, query_id: &str, document: &str) -> Result<()> {
        self.inner.put_result_document(query_id, document)
    }
    fn invalidate_result_document(&self, query_id: &str) -> Result<()> {
        self.inner.invalidate_result_document(query_id)
    }
}

struct Harness {
    store: Arc<InstrumentedStore>,
    availability: Arc<MockAvailability>,
    citations: Arc<MockCitations>,
    synchronizer: ToolSynchronizer,
}

fn harness(registry: MockRegistry) -> Harness {
    let store = Arc::new(InstrumentedStore::new());
    let registry = Arc::new(registry);
    let availability = Arc::new(MockAvailability {
        value: Mutex::new(Some(75)),
        down: AtomicBool::new(false),
    });
    let citations = Arc::new(MockCitations::default());
    let code_host = Arc::new(MockCodeHost {
        metrics: Mutex::new(HashMap::from([(
            "acme/signalp".to_string(),
            RepoInfo {
                url: String::new(),
                created_at: "2019-01-01".into(),
                updated_at: "2023-05-06".into(),
                forks: 4,
                stars: 10,
                contributions: 7,
            },
        )])),
    });
    let impacts = JournalImpacts::from_map(HashMap::from([("Bioinformatics".to_string(), 6.931)]));
    let aggregator = CitationAggregator::new(
        Arc::clone(&citations) as Arc<dyn CitationSource>,
        impacts,
    );
    let synchronizer = ToolSynchronizer::new(
        Arc::clone(&store) as Arc<dyn RecordStore>,
        Arc::clone(&registry) as Arc<dyn RegistrySource>,
        aggregator,
        Arc::clone(&availability) as Arc<dyn AvailabilityProbe>,
        code_host,
    );
    Harness {
        store,
        availability,
        citations,
        synchronizer,
    }
}

fn sample_snapshot(id: &str) -> ToolSnapshot {
    ToolSnapshot {
        id: id.to_string(),
        name: "SignalP".into(),
        description: "Signal peptide prediction".into(),
        homepage: "https://services.healthtech.dtu.dk/signalp".into(),
        maturity: "Mature".into(),
        license: "Other".into(),
        versions: vec!["5.0".into()],
        tool_types: vec!["Command-line tool".into()],
        platforms: vec!["Linux".into()],
        collections: vec!["elixir-cz".into()],
        elixir_platforms: vec!["Tools".into()],
        elixir_nodes: vec!["Denmark".into()],
        elixir_communities: Vec::new(),
        topics: vec![Annotation {
            term: "genomics".into(),
            uri: "http://edamontology.org/topic_0622".into(),
        }],
        functions: vec![ToolFunction {
            operations: vec![Annotation {
                term: "Protein signal peptide detection".into(),
                uri: "http://edamontology.org/operation_0418".into(),
            }],
            inputs: vec!["Protein sequence".into()],
            outputs: vec!["Sequence report".into()],
        }],
        credits: vec![Credit {
            name: "DTU".into(),
            entity_type: "Institute".into(),
        }],
        documentation: vec![DocLink {
            url: "https://services.healthtech.dtu.dk/signalp/docs".into(),
            kind: "User manual".into(),
        }],
        links: vec![LinkEntry {
            url: "https://github.com/acme/signalp/".into(),
            kinds: vec!["Repository".into()],
        }],
        publications: vec![PublicationRef {
            doi: Some("10.1000/p1".into()),
            pmid: None,
            pmcid: None,
        }],
    }
}

fn registry_with(snapshot: ToolSnapshot) -> MockRegistry {
    let registry = MockRegistry::default();
    registry
        .snapshots
        .lock()
        .unwrap()
        .insert(snapshot.id.clone(), snapshot);
    registry
}

fn relation_keys(store: &InstrumentedStore, id: &str, kind: RelationKind) -> Vec<String> {
    store
        .relation_rows(id, kind)
        .unwrap()
        .into_iter()
        .map(|row| row.key)
        .collect()
}

#[tokio::test]
async fn first_pass_creates_parent_and_children_as_one_unit() {
    let mut registry = registry_with(sample_snapshot("signalp"));
    registry.matching_tags.insert("genomics".into());
    let harness = harness(registry);

    // Resolvable publication, no alternate identifier: the declared count is
    // used directly.
    harness.citations.records.lock().unwrap().insert(
        "10.1000/p1".into(),
        ResolvedPublication {
            doi: Some("10.1000/p1".into()),
            pmid: None,
            source: "MED".into(),
            title: "SignalP 5.0".into(),
            authors: "Doe J".into(),
            journal: "Bioinformatics".into(),
            published_on: "2019-02-18".into(),
            cited_by: 3,
        },
    );

    let outcome = harness.synchronizer.sync_tool("signalp").await.unwrap();
    assert_eq!(outcome, SyncOutcome::Created);

    let tool = harness.store.get_tool("signalp").unwrap().unwrap();
    assert_eq!(tool.name, "SignalP");
    assert_eq!(tool.version, "v5.0");
    assert_eq!(tool.registry_link, "https://registry.example/signalp");
    assert_eq!(tool.availability, Some(75));
    assert_eq!(tool.citation_count, 3);
    assert_eq!(tool.impact_factor, 6.931);
    assert_eq!(tool.journals, "Bioinformatics");
    // Trailing slash stripped from the declared repository link.
    assert_eq!(tool.repo.url, "https://github.com/acme/signalp");
    assert_eq!(tool.repo.stars, 10);
    assert_eq!(tool.repo.contributions, 7);
    assert!(tool.last_synced.is_some());

    assert_eq!(
        relation_keys(&harness.store, "signalp", RelationKind::Topics),
        vec!["genomics"]
    );
    assert_eq!(
        relation_keys(&harness.store, "signalp", RelationKind::Institutes),
        vec!["DTU"]
    );
    // Classification pass ran after the first-seen commit.
    assert_eq!(
        harness.store.classifications_for("signalp").unwrap(),
        vec!["genomics"]
    );
    // The create path bundles children with the parent insert; nothing goes
    // through the delta writer.
    assert_eq!(harness.store.applied_deltas(), 0);
}

#[tokio::test]
async fn resync_with_unchanged_upstream_writes_no_deltas() {
    let harness = harness(registry_with(sample_snapshot("signalp")));

    harness.synchronizer.sync_tool("signalp").await.unwrap();
    let before = harness.store.get_tool("signalp").unwrap().unwrap();

    let outcome = harness
        .synchronizer
        .sync_tool_with("signalp", true)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated);
    assert_eq!(harness.store.applied_deltas(), 0);

    let after = harness.store.get_tool("signalp").unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn second_pass_same_day_is_skipped_without_force() {
    let harness = harness(registry_with(sample_snapshot("signalp")));
    harness.synchronizer.sync_tool("signalp").await.unwrap();

    let outcome = harness.synchronizer.sync_tool("signalp").await.unwrap();
    assert_eq!(outcome, SyncOutcome::SkippedFresh);
}

#[tokio::test]
async fn upstream_duplicates_reconcile_to_one_addition() {
    let harness = harness(registry_with(sample_snapshot("signalp")));
    harness.synchronizer.sync_tool("signalp").await.unwrap();

    // Upstream now reports a duplicated new topic next to the existing one.
    let mut changed = sample_snapshot("signalp");
    changed.topics = vec![
        Annotation {
            term: "genomics".into(),
            uri: "http://edamontology.org/topic_0622".into(),
        },
        Annotation {
            term: "proteomics".into(),
            uri: "http://edamontology.org/topic_0121".into(),
        },
        Annotation {
            term: "genomics".into(),
            uri: "http://edamontology.org/topic_0622".into(),
        },
    ];
    harness
        .synchronizer
        .sync_snapshot(&changed, true)
        .await
        .unwrap();

    let mut topics = relation_keys(&harness.store, "signalp", RelationKind::Topics);
    topics.sort();
    assert_eq!(topics, vec!["genomics", "proteomics"]);

    // Exactly one delta went through: +1/-0 on topics.
    let deltas = harness.store.deltas.lock().unwrap();
    assert_eq!(deltas.as_slice(), &[(RelationKind::Topics, 1, 0)]);
}

#[tokio::test]
async fn blank_platform_names_never_reach_the_store() {
    let mut snapshot = sample_snapshot("signalp");
    snapshot.platforms = vec!["".into(), "GUI".into(), "".into(), "CLI".into()];
    let harness = harness(registry_with(snapshot));

    harness.synchronizer.sync_tool("signalp").await.unwrap();
    let mut platforms = relation_keys(&harness.store, "signalp", RelationKind::Platforms);
    platforms.sort();
    assert_eq!(platforms, vec!["CLI", "GUI"]);
}

#[tokio::test]
async fn one_relation_failure_does_not_block_siblings_or_parent() {
    let harness = harness(registry_with(sample_snapshot("signalp")));
    harness.synchronizer.sync_tool("signalp").await.unwrap();

    *harness.store.fail_relation.lock().unwrap() = Some(RelationKind::Platforms);

    let mut changed = sample_snapshot("signalp");
    changed.name = "SignalP 6".into();
    changed.platforms = vec!["Linux".into(), "Windows".into()];
    changed.topics.push(Annotation {
        term: "proteomics".into(),
        uri: String::new(),
    });
    changed.credits.push(Credit {
        name: "EMBL".into(),
        entity_type: "Institute".into(),
    });

    let outcome = harness
        .synchronizer
        .sync_snapshot(&changed, true)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated);

    // The failed relation kept its prior rows.
    assert_eq!(
        relation_keys(&harness.store, "signalp", RelationKind::Platforms),
        vec!["Linux"]
    );
    // Siblings and the parent scalar update still committed.
    assert!(relation_keys(&harness.store, "signalp", RelationKind::Topics)
        .contains(&"proteomics".to_string()));
    assert!(
        relation_keys(&harness.store, "signalp", RelationKind::Institutes)
            .contains(&"EMBL".to_string())
    );
    assert_eq!(
        harness.store.get_tool("signalp").unwrap().unwrap().name,
        "SignalP 6"
    );
}

#[tokio::test]
async fn missing_upstream_tool_is_a_terminal_noop() {
    let harness = harness(MockRegistry::default());
    let outcome = harness.synchronizer.sync_tool("ghost").await.unwrap();
    assert_eq!(outcome, SyncOutcome::NotFound);
    assert!(harness.store.get_tool("ghost").unwrap().is_none());
}

#[tokio::test]
async fn unreachable_monitor_keeps_the_prior_availability() {
    let harness = harness(registry_with(sample_snapshot("signalp")));
    harness.synchronizer.sync_tool("signalp").await.unwrap();
    assert_eq!(
        harness.store.get_tool("signalp").unwrap().unwrap().availability,
        Some(75)
    );

    harness.availability.down.store(true, Ordering::SeqCst);
    harness
        .synchronizer
        .sync_tool_with("signalp", true)
        .await
        .unwrap();
    assert_eq!(
        harness.store.get_tool("signalp").unwrap().unwrap().availability,
        Some(75)
    );
}

#[tokio::test]
async fn total_citation_failure_retains_prior_aggregates() {
    let harness = harness(registry_with(sample_snapshot("signalp")));
    harness.citations.records.lock().unwrap().insert(
        "10.1000/p1".into(),
        ResolvedPublication {
            doi: Some("10.1000/p1".into()),
            journal: "Bioinformatics".into(),
            cited_by: 3,
            ..Default::default()
        },
    );
    harness.synchronizer.sync_tool("signalp").await.unwrap();
    assert_eq!(
        harness.store.get_tool("signalp").unwrap().unwrap().citation_count,
        3
    );

    harness.citations.down.store(true, Ordering::SeqCst);
    let outcome = harness
        .synchronizer
        .sync_tool_with("signalp", true)
        .await
        .unwrap();
    assert_eq!(outcome, SyncOutcome::Updated);

    let tool = harness.store.get_tool("signalp").unwrap().unwrap();
    assert_eq!(tool.citation_count, 3);
    assert_eq!(tool.impact_factor, 6.931);
}

#[tokio::test]
async fn collection_query_pages_through_the_listing() {
    let mut registry = MockRegistry::default();
    registry.pages = vec![
        RegistryPage {
            total: 2,
            items: vec![sample_snapshot("alpha")],
            has_next: true,
        },
        RegistryPage {
            total: 2,
            items: vec![sample_snapshot("beta")],
            has_next: false,
        },
    ];
    let harness = harness(registry);

    let query = SavedQuery {
        id: "q1".into(),
        collection: Some("elixir-cz".into()),
        topic: None,
        tool_ids: Vec::new(),
    };
    let report = harness.synchronizer.sync_query(&query).await.unwrap();

    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(harness.store.tool_ids().unwrap(), vec!["alpha", "beta"]);
}

#[tokio::test]
async fn run_covers_every_saved_query() {
    let registry = registry_with(sample_snapshot("signalp"));
    let harness = harness(registry);
    harness
        .store
        .insert_saved_query(&SavedQuery {
            id: "list-1".into(),
            collection: None,
            topic: None,
            tool_ids: vec!["signalp".into(), "ghost".into()],
        })
        .unwrap();

    let report = harness.synchronizer.run().await.unwrap();
    assert_eq!(report.created, 1);
    assert_eq!(report.missing, 1);
    assert_eq!(report.touched, vec!["signalp"]);
}
