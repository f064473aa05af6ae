//! Citation and impact aggregation for one tool.
//!
//! Every publication reference is resolved to a canonical DOI with source
//! fallback (DOI, then the alternate identifiers, in that fixed order), the
//! citing works are tallied into per-year buckets, and the results roll up
//! into the tool's scalar aggregates.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::errors::{Result, SyncError};
use crate::fetch::{CitationSource, PublicationId, PublicationRef, ResolvedPublication};
use crate::impact::JournalImpacts;
use crate::models::Publication;
use crate::store::RecordStore;

/// Citing works per page the citation source will return at most.
const PAGE_SIZE: u64 = 1000;

/// Year used for `min_year`/`max_year` when a tool has no year buckets.
pub const DEFAULT_FALLBACK_YEAR: i32 = 2023;

/// How re-synchronization treats an existing `(publication, year)` bucket.
///
/// The observed behavior differs between revisions of the upstream service,
/// so this stays a policy flag; `Overwrite` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearMode {
    Overwrite,
    Accumulate,
}

/// The per-tool rollup produced by one aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRollup {
    pub citation_count: i64,
    pub impact_factor: f64,
    pub journals: String,
    pub min_year: i32,
    pub max_year: i32,
}

pub struct CitationAggregator {
    source: Arc<dyn CitationSource>,
    impacts: JournalImpacts,
    year_mode: YearMode,
    fallback_year: i32,
}

impl CitationAggregator {
    pub fn new(source: Arc<dyn CitationSource>, impacts: JournalImpacts) -> Self {
        Self {
            source,
            impacts,
            year_mode: YearMode::Overwrite,
            fallback_year: DEFAULT_FALLBACK_YEAR,
        }
    }

    pub fn with_year_mode(mut self, year_mode: YearMode) -> Self {
        self.year_mode = year_mode;
        self
    }

    pub fn with_fallback_year(mut self, fallback_year: i32) -> Self {
        self.fallback_year = fallback_year;
        self
    }

    pub fn fallback_year(&self) -> i32 {
        self.fallback_year
    }

    /// Runs one aggregation pass over a tool's reference list.
    ///
    /// A failing reference contributes zero and does not abort its siblings.
    /// When every attempted reference fails transiently the pass itself fails
    /// transiently, so the caller keeps the previously stored aggregates
    /// instead of overwriting them with zeros.
    pub async fn aggregate(
        &self,
        store: &dyn RecordStore,
        tool_id: &str,
        references: &[PublicationRef],
    ) -> Result<AggregateRollup> {
        let mut used_dois: HashSet<String> = HashSet::new();
        let mut total_citations = 0i64;
        let mut impact_sum = 0.0f64;
        let mut journals: BTreeSet<String> = BTreeSet::new();
        let mut min_year: Option<i32> = None;
        let mut max_year: Option<i32> = None;
        let mut attempted = 0usize;
        let mut failed = 0usize;

        for reference in references {
            let candidates = identifier_candidates(reference);
            if candidates.is_empty() {
                log::warn!("tool '{tool_id}': reference carries no identifier at all, dropping");
                continue;
            }
            attempted += 1;

            let resolved = match self.resolve_with_fallback(&candidates).await? {
                Resolution::Found(record) => Some(record),
                Resolution::NoMatch => None,
                Resolution::SourceFailed => {
                    failed += 1;
                    continue;
                }
            };

            let input_doi = reference
                .doi
                .as_deref()
                .map(str::to_lowercase)
                .filter(|doi| !doi.is_empty());

            let Some(record) = resolved else {
                // No source knows this reference: keep it, unenriched, as
                // long as a DOI exists to key it by.
                let Some(doi) = input_doi else {
                    log::warn!("tool '{tool_id}': unresolvable reference without DOI, dropping");
                    continue;
                };
                if !used_dois.insert(doi.clone()) {
                    log::info!("tool '{tool_id}': duplicate DOI '{doi}', skipping");
                    continue;
                }
                log::info!("tool '{tool_id}': recording DOI-only publication '{doi}'");
                store.upsert_publication(&Publication {
                    doi,
                    tool_id: tool_id.to_string(),
                    pmid: reference.pmid.clone().unwrap_or_default(),
                    pmcid: reference.pmcid.clone().unwrap_or_default(),
                    ..Default::default()
                })?;
                continue;
            };

            // The canonical DOI returned by the source overrides the input
            // DOI for all downstream keying.
            let doi = record
                .doi
                .as_deref()
                .map(str::to_lowercase)
                .filter(|doi| !doi.is_empty())
                .or(input_doi);
            let Some(doi) = doi else {
                log::warn!("tool '{tool_id}': resolved reference has no DOI to key by, dropping");
                continue;
            };
            if !used_dois.insert(doi.clone()) {
                log::info!("tool '{tool_id}': duplicate DOI '{doi}', skipping");
                continue;
            }

            let pmid = record
                .pmid
                .clone()
                .or_else(|| reference.pmid.clone())
                .unwrap_or_default();

            let mut publication_count = record.cited_by;
            if !pmid.is_empty() {
                match self.tally_years(store, &doi, &record.source, &pmid).await {
                    Ok(Some((declared_total, buckets))) => {
                        publication_count = declared_total;
                        for year in buckets.keys() {
                            min_year = Some(min_year.map_or(*year, |y| y.min(*year)));
                            max_year = Some(max_year.map_or(*year, |y| y.max(*year)));
                        }
                    }
                    Ok(None) => publication_count = 0,
                    Err(err) if err.is_transient() => {
                        log::warn!(
                            "tool '{tool_id}': citing-work lookup failed for '{doi}', \
                             counting zero: {err}"
                        );
                        publication_count = 0;
                    }
                    Err(err) => return Err(err),
                }
            }
            total_citations += publication_count;

            let impact = self.impacts.lookup(&record.journal);
            impact_sum += impact;
            if !record.journal.is_empty() {
                journals.insert(record.journal.clone());
            }

            let citations_link = if pmid.is_empty() {
                String::new()
            } else {
                self.source.citations_link(&record.source, &pmid)
            };
            store.upsert_publication(&Publication {
                doi,
                tool_id: tool_id.to_string(),
                pmid,
                pmcid: reference.pmcid.clone().unwrap_or_default(),
                title: record.title,
                authors: record.authors,
                journal: record.journal,
                published_on: record.published_on,
                citation_count: publication_count,
                impact: round3(impact),
                citations_link,
            })?;
        }

        if attempted > 0 && failed == attempted {
            return Err(SyncError::Transient(format!(
                "citation source failed for every reference of tool '{tool_id}'"
            )));
        }

        Ok(AggregateRollup {
            citation_count: total_citations,
            impact_factor: round3(impact_sum),
            journals: journals.into_iter().collect::<Vec<_>>().join(", "),
            min_year: min_year.unwrap_or(self.fallback_year),
            max_year: max_year.unwrap_or(self.fallback_year),
        })
    }

    /// Tries each identifier in order; the first source match wins and later
    /// identifiers are never queried.
    async fn resolve_with_fallback(&self, candidates: &[PublicationId]) -> Result<Resolution> {
        for candidate in candidates {
            match self.source.resolve(candidate).await {
                Ok(Some(record)) => return Ok(Resolution::Found(record)),
                Ok(None) => continue,
                Err(err) if err.is_transient() => {
                    log::warn!("identifier lookup failed, reference counts zero: {err}");
                    return Ok(Resolution::SourceFailed);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Resolution::NoMatch)
    }

    /// Pages through the citing works of one publication and writes its year
    /// buckets. Returns the declared total and the tallied buckets, or `None`
    /// when the source declares no citing works.
    async fn tally_years(
        &self,
        store: &dyn RecordStore,
        doi: &str,
        source: &str,
        pmid: &str,
    ) -> Result<Option<(i64, HashMap<i32, i64>)>> {
        let first = self.source.citing_page(source, pmid, 1).await?;
        if first.hit_count == 0 {
            return Ok(None);
        }

        let mut buckets: HashMap<i32, i64> = HashMap::new();
        for year in &first.years {
            *buckets.entry(*year).or_insert(0) += 1;
        }
        let pages = (first.hit_count + PAGE_SIZE - 1) / PAGE_SIZE;
        for page in 2..=pages {
            let next = self.source.citing_page(source, pmid, page as u32).await?;
            for year in &next.years {
                *buckets.entry(*year).or_insert(0) += 1;
            }
        }

        for (year, count) in &buckets {
            match self.year_mode {
                YearMode::Overwrite => store.set_year_count(doi, *year, *count)?,
                YearMode::Accumulate => store.add_year_count(doi, *year, *count)?,
            }
        }

        Ok(Some((first.hit_count as i64, buckets)))
    }
}

enum Resolution {
    Found(ResolvedPublication),
    NoMatch,
    SourceFailed,
}

/// The identifiers a reference can be resolved by, in fallback order.
fn identifier_candidates(reference: &PublicationRef) -> Vec<PublicationId> {
    let mut candidates = Vec::new();
    if let Some(doi) = reference.doi.as_deref().filter(|d| !d.is_empty()) {
        candidates.push(PublicationId::Doi(doi.to_lowercase()));
    }
    if let Some(pmid) = reference.pmid.as_deref().filter(|p| !p.is_empty()) {
        candidates.push(PublicationId::Pmid(pmid.to_string()));
    }
    if let Some(pmcid) = reference.pmcid.as_deref().filter(|p| !p.is_empty()) {
        candidates.push(PublicationId::Pmcid(pmcid.to_string()));
    }
    candidates
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
