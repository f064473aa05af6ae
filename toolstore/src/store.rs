//! The persisted record store.
//!
//! The core engines only see the [`RecordStore`] trait: one handle is
//! constructed at startup and passed explicitly to every component. The
//! SQLite-backed [`SqliteStore`] is the production implementation; writes for
//! one relation (and the first-seen parent insert) are single transactions so
//! a unit of work either commits whole or not at all.

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rusqlite::{params, Connection, ErrorCode};

use crate::config::StoreConfig;
use crate::errors::{Result, SyncError};
use crate::models::{ChildRow, Publication, RelationKind, SavedQuery, Tool, YearBucket};
use crate::reconcile::RelationDelta;

pub trait RecordStore: Send + Sync {
    fn get_tool(&self, id: &str) -> Result<Option<Tool>>;
    /// Inserts a first-seen parent together with all its child rows as one
    /// transactional unit.
    fn create_tool(&self, tool: &Tool, children: &[(RelationKind, Vec<ChildRow>)]) -> Result<()>;
    fn update_tool(&self, tool: &Tool) -> Result<()>;
    fn tool_ids(&self) -> Result<Vec<String>>;
    fn tools_in_collection(&self, tag: &str) -> Result<Vec<Tool>>;
    fn tools_with_topic(&self, term: &str) -> Result<Vec<Tool>>;

    fn relation_rows(&self, tool_id: &str, kind: RelationKind) -> Result<Vec<ChildRow>>;
    /// Applies one relation's delta atomically: both halves commit or neither.
    fn apply_relation_delta(
        &self,
        tool_id: &str,
        kind: RelationKind,
        delta: &RelationDelta,
    ) -> Result<()>;

    fn get_publication(&self, tool_id: &str, doi: &str) -> Result<Option<Publication>>;
    fn upsert_publication(&self, publication: &Publication) -> Result<()>;
    fn publications_for(&self, tool_id: &str) -> Result<Vec<Publication>>;

    fn years_for(&self, doi: &str) -> Result<Vec<YearBucket>>;
    fn set_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()>;
    fn add_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()>;

    fn has_classification(&self, tool_id: &str, tag: &str) -> Result<bool>;
    fn record_classification(&self, tool_id: &str, tag: &str) -> Result<()>;
    fn classifications_for(&self, tool_id: &str) -> Result<Vec<String>>;

    fn saved_queries(&self) -> Result<Vec<SavedQuery>>;
    fn get_saved_query(&self, id: &str) -> Result<Option<SavedQuery>>;
    fn insert_saved_query(&self, query: &SavedQuery) -> Result<()>;

    fn get_result_document(&self, query_id: &str) -> Result<Option<String>>;
    fn put_result_document(&self, query_id: &str, document: &str) -> Result<()>;
    fn invalidate_result_document(&self, query_id: &str) -> Result<()>;
}

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const TOOL_COLUMNS: &str = "id, name, version, registry_link, homepage, description, maturity, \
     license, documentation, availability, repo_url, repo_created_at, repo_updated_at, forks, \
     stars, contributions, citation_count, impact_factor, journals, min_year, max_year, \
     last_synced";

impl SqliteStore {
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let conn = Connection::open(&config.db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut schema = String::from(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS tools (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                registry_link TEXT NOT NULL DEFAULT '',
                homepage TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                maturity TEXT NOT NULL DEFAULT '',
                license TEXT NOT NULL DEFAULT '',
                documentation TEXT NOT NULL DEFAULT '',
                availability INTEGER,
                repo_url TEXT NOT NULL DEFAULT '',
                repo_created_at TEXT NOT NULL DEFAULT '',
                repo_updated_at TEXT NOT NULL DEFAULT '',
                forks INTEGER NOT NULL DEFAULT 0,
                stars INTEGER NOT NULL DEFAULT 0,
                contributions INTEGER NOT NULL DEFAULT 0,
                citation_count INTEGER NOT NULL DEFAULT 0,
                impact_factor REAL NOT NULL DEFAULT 0,
                journals TEXT NOT NULL DEFAULT '',
                min_year INTEGER NOT NULL DEFAULT 0,
                max_year INTEGER NOT NULL DEFAULT 0,
                last_synced TEXT
            );
            CREATE TABLE IF NOT EXISTS publications (
                doi TEXT NOT NULL,
                tool_id TEXT NOT NULL,
                pmid TEXT NOT NULL DEFAULT '',
                pmcid TEXT NOT NULL DEFAULT '',
                title TEXT NOT NULL DEFAULT '',
                authors TEXT NOT NULL DEFAULT '',
                journal TEXT NOT NULL DEFAULT '',
                published_on TEXT NOT NULL DEFAULT '',
                citation_count INTEGER NOT NULL DEFAULT 0,
                impact REAL NOT NULL DEFAULT 0,
                citations_link TEXT NOT NULL DEFAULT '',
                PRIMARY KEY (doi, tool_id)
            );
            CREATE TABLE IF NOT EXISTS citation_years (
                doi TEXT NOT NULL,
                year INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (doi, year)
            );
            CREATE TABLE IF NOT EXISTS classifications (
                tool_id TEXT NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (tool_id, tag)
            );
            CREATE TABLE IF NOT EXISTS saved_queries (
                id TEXT PRIMARY KEY,
                collection TEXT NOT NULL DEFAULT '',
                topic TEXT NOT NULL DEFAULT '',
                tool_list TEXT NOT NULL DEFAULT ''
            );
            CREATE TABLE IF NOT EXISTS result_documents (
                query_id TEXT PRIMARY KEY,
                document TEXT NOT NULL,
                refreshed_at INTEGER NOT NULL
            );\n",
        );
        for kind in RelationKind::ALL {
            schema.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    tool_id TEXT NOT NULL,
                    key TEXT NOT NULL,
                    attr TEXT,
                    PRIMARY KEY (tool_id, key)
                );\n",
                kind.table()
            ));
        }
        schema.push_str("COMMIT;");
        conn.execute_batch(&schema)?;
        Ok(())
    }

    fn row_to_tool(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tool> {
        let availability: Option<i64> = row.get(9)?;
        let last_synced: Option<String> = row.get(21)?;
        Ok(Tool {
            id: row.get(0)?,
            name: row.get(1)?,
            version: row.get(2)?,
            registry_link: row.get(3)?,
            homepage: row.get(4)?,
            description: row.get(5)?,
            maturity: row.get(6)?,
            license: row.get(7)?,
            documentation: row.get(8)?,
            availability: availability.map(|v| v as u8),
            repo: crate::models::RepoInfo {
                url: row.get(10)?,
                created_at: row.get(11)?,
                updated_at: row.get(12)?,
                forks: row.get(13)?,
                stars: row.get(14)?,
                contributions: row.get(15)?,
            },
            citation_count: row.get(16)?,
            impact_factor: row.get(17)?,
            journals: row.get(18)?,
            min_year: row.get(19)?,
            max_year: row.get(20)?,
            last_synced: last_synced
                .and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()),
        })
    }

    fn insert_tool_row(tx: &rusqlite::Transaction<'_>, tool: &Tool) -> Result<()> {
        tx.execute(
            &format!(
                "INSERT INTO tools ({TOOL_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
                 ?17, ?18, ?19, ?20, ?21, ?22)"
            ),
            params![
                tool.id,
                tool.name,
                tool.version,
                tool.registry_link,
                tool.homepage,
                tool.description,
                tool.maturity,
                tool.license,
                tool.documentation,
                tool.availability.map(|v| v as i64),
                tool.repo.url,
                tool.repo.created_at,
                tool.repo.updated_at,
                tool.repo.forks,
                tool.repo.stars,
                tool.repo.contributions,
                tool.citation_count,
                tool.impact_factor,
                tool.journals,
                tool.min_year,
                tool.max_year,
                tool.last_synced.map(|d| d.to_string()),
            ],
        )
        .map_err(|err| map_constraint(err, &format!("tool '{}'", tool.id)))?;
        Ok(())
    }

    fn select_tools(&self, sql: &str, value: &str) -> Result<Vec<Tool>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![value], Self::row_to_tool)?;
        let mut tools = Vec::new();
        for row in rows {
            tools.push(row?);
        }
        Ok(tools)
    }
}

/// Maps a uniqueness violation onto the store-conflict taxonomy; anything
/// else stays a plain SQLite error.
fn map_constraint(err: rusqlite::Error, what: &str) -> SyncError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            SyncError::Conflict(format!("write rejected for {what}: {err}"))
        }
        _ => SyncError::Sqlite(err),
    }
}

impl RecordStore for SqliteStore {
    fn get_tool(&self, id: &str) -> Result<Option<Tool>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare(&format!("SELECT {TOOL_COLUMNS} FROM tools WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], Self::row_to_tool)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn create_tool(&self, tool: &Tool, children: &[(RelationKind, Vec<ChildRow>)]) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        Self::insert_tool_row(&tx, tool)?;
        for (kind, rows) in children {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO {} (tool_id, key, attr) VALUES (?1, ?2, ?3)",
                kind.table()
            ))?;
            for row in rows {
                stmt.execute(params![tool.id, row.key, row.attr])
                    .map_err(|err| map_constraint(err, &format!("{kind} '{}'", row.key)))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn update_tool(&self, tool: &Tool) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE tools SET name = ?2, version = ?3, registry_link = ?4, homepage = ?5,
                description = ?6, maturity = ?7, license = ?8, documentation = ?9,
                availability = ?10, repo_url = ?11, repo_created_at = ?12, repo_updated_at = ?13,
                forks = ?14, stars = ?15, contributions = ?16, citation_count = ?17,
                impact_factor = ?18, journals = ?19, min_year = ?20, max_year = ?21,
                last_synced = ?22
             WHERE id = ?1",
            params![
                tool.id,
                tool.name,
                tool.version,
                tool.registry_link,
                tool.homepage,
                tool.description,
                tool.maturity,
                tool.license,
                tool.documentation,
                tool.availability.map(|v| v as i64),
                tool.repo.url,
                tool.repo.created_at,
                tool.repo.updated_at,
                tool.repo.forks,
                tool.repo.stars,
                tool.repo.contributions,
                tool.citation_count,
                tool.impact_factor,
                tool.journals,
                tool.min_year,
                tool.max_year,
                tool.last_synced.map(|d| d.to_string()),
            ],
        )?;
        if changed == 0 {
            return Err(SyncError::NotFound(format!("tool '{}'", tool.id)));
        }
        Ok(())
    }

    fn tool_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM tools ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    fn tools_in_collection(&self, tag: &str) -> Result<Vec<Tool>> {
        self.select_tools(
            &format!(
                "SELECT DISTINCT {TOOL_COLUMNS} FROM tools
                 JOIN collections ON collections.tool_id = tools.id
                 WHERE lower(collections.key) = lower(?1)
                 ORDER BY id"
            ),
            tag,
        )
    }

    fn tools_with_topic(&self, term: &str) -> Result<Vec<Tool>> {
        self.select_tools(
            &format!(
                "SELECT DISTINCT {TOOL_COLUMNS} FROM tools
                 JOIN topics ON topics.tool_id = tools.id
                 WHERE lower(topics.key) LIKE '%' || lower(?1) || '%'
                 ORDER BY id"
            ),
            term,
        )
    }

    fn relation_rows(&self, tool_id: &str, kind: RelationKind) -> Result<Vec<ChildRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT key, attr FROM {} WHERE tool_id = ?1 ORDER BY rowid",
            kind.table()
        ))?;
        let rows = stmt.query_map(params![tool_id], |row| {
            Ok(ChildRow {
                key: row.get(0)?,
                attr: row.get(1)?,
            })
        })?;
        let mut children = Vec::new();
        for row in rows {
            children.push(row?);
        }
        Ok(children)
    }

    fn apply_relation_delta(
        &self,
        tool_id: &str,
        kind: RelationKind,
        delta: &RelationDelta,
    ) -> Result<()> {
        if delta.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut remove = tx.prepare(&format!(
                "DELETE FROM {} WHERE tool_id = ?1 AND key = ?2",
                kind.table()
            ))?;
            for key in &delta.to_remove {
                remove.execute(params![tool_id, key])?;
            }
            let mut add = tx.prepare(&format!(
                "INSERT INTO {} (tool_id, key, attr) VALUES (?1, ?2, ?3)",
                kind.table()
            ))?;
            for row in &delta.to_add {
                add.execute(params![tool_id, row.key, row.attr])
                    .map_err(|err| map_constraint(err, &format!("{kind} '{}'", row.key)))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_publication(&self, tool_id: &str, doi: &str) -> Result<Option<Publication>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doi, tool_id, pmid, pmcid, title, authors, journal, published_on,
                    citation_count, impact, citations_link
             FROM publications WHERE tool_id = ?1 AND doi = ?2",
        )?;
        let mut rows = stmt.query_map(params![tool_id, doi], row_to_publication)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn upsert_publication(&self, publication: &Publication) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO publications (doi, tool_id, pmid, pmcid, title, authors, journal,
                published_on, citation_count, impact, citations_link)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(doi, tool_id) DO UPDATE SET
                pmid = excluded.pmid,
                pmcid = excluded.pmcid,
                title = excluded.title,
                authors = excluded.authors,
                journal = excluded.journal,
                published_on = excluded.published_on,
                citation_count = excluded.citation_count,
                impact = excluded.impact,
                citations_link = excluded.citations_link",
            params![
                publication.doi,
                publication.tool_id,
                publication.pmid,
                publication.pmcid,
                publication.title,
                publication.authors,
                publication.journal,
                publication.published_on,
                publication.citation_count,
                publication.impact,
                publication.citations_link,
            ],
        )?;
        Ok(())
    }

    fn publications_for(&self, tool_id: &str) -> Result<Vec<Publication>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT doi, tool_id, pmid, pmcid, title, authors, journal, published_on,
                    citation_count, impact, citations_link
             FROM publications WHERE tool_id = ?1 ORDER BY doi",
        )?;
        let rows = stmt.query_map(params![tool_id], row_to_publication)?;
        let mut publications = Vec::new();
        for row in rows {
            publications.push(row?);
        }
        Ok(publications)
    }

    fn years_for(&self, doi: &str) -> Result<Vec<YearBucket>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT doi, year, count FROM citation_years WHERE doi = ?1 ORDER BY year")?;
        let rows = stmt.query_map(params![doi], |row| {
            Ok(YearBucket {
                doi: row.get(0)?,
                year: row.get(1)?,
                count: row.get(2)?,
            })
        })?;
        let mut buckets = Vec::new();
        for row in rows {
            buckets.push(row?);
        }
        Ok(buckets)
    }

    fn set_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO citation_years (doi, year, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(doi, year) DO UPDATE SET count = excluded.count",
            params![doi, year, count],
        )?;
        Ok(())
    }

    fn add_year_count(&self, doi: &str, year: i32, count: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO citation_years (doi, year, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(doi, year) DO UPDATE SET count = citation_years.count + excluded.count",
            params![doi, year, count],
        )?;
        Ok(())
    }

    fn has_classification(&self, tool_id: &str, tag: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT 1 FROM classifications WHERE tool_id = ?1 AND tag = ?2")?;
        Ok(stmt.exists(params![tool_id, tag])?)
    }

    fn record_classification(&self, tool_id: &str, tag: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO classifications (tool_id, tag) VALUES (?1, ?2)",
            params![tool_id, tag],
        )?;
        Ok(())
    }

    fn classifications_for(&self, tool_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT tag FROM classifications WHERE tool_id = ?1 ORDER BY tag")?;
        let rows = stmt.query_map(params![tool_id], |row| row.get(0))?;
        let mut tags = Vec::new();
        for row in rows {
            tags.push(row?);
        }
        Ok(tags)
    }

    fn saved_queries(&self) -> Result<Vec<SavedQuery>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, collection, topic, tool_list FROM saved_queries ORDER BY id")?;
        let rows = stmt.query_map([], row_to_saved_query)?;
        let mut queries = Vec::new();
        for row in rows {
            queries.push(row?);
        }
        Ok(queries)
    }

    fn get_saved_query(&self, id: &str) -> Result<Option<SavedQuery>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT id, collection, topic, tool_list FROM saved_queries WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], row_to_saved_query)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn insert_saved_query(&self, query: &SavedQuery) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO saved_queries (id, collection, topic, tool_list) VALUES (?1, ?2, ?3, ?4)",
            params![
                query.id,
                query.collection.clone().unwrap_or_default(),
                query.topic.clone().unwrap_or_default(),
                query.tool_ids.join(","),
            ],
        )
        .map_err(|err| map_constraint(err, &format!("saved query '{}'", query.id)))?;
        Ok(())
    }

    fn get_result_document(&self, query_id: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT document FROM result_documents WHERE query_id = ?1")?;
        let mut rows = stmt.query_map(params![query_id], |row| row.get(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    fn put_result_document(&self, query_id: &str, document: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO result_documents (query_id, document, refreshed_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(query_id) DO UPDATE SET
                document = excluded.document,
                refreshed_at = excluded.refreshed_at",
            params![query_id, document, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    fn invalidate_result_document(&self, query_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM result_documents WHERE query_id = ?1",
            params![query_id],
        )?;
        Ok(())
    }
}

fn row_to_publication(row: &rusqlite::Row<'_>) -> rusqlite::Result<Publication> {
    Ok(Publication {
        doi: row.get(0)?,
        tool_id: row.get(1)?,
        pmid: row.get(2)?,
        pmcid: row.get(3)?,
        title: row.get(4)?,
        authors: row.get(5)?,
        journal: row.get(6)?,
        published_on: row.get(7)?,
        citation_count: row.get(8)?,
        impact: row.get(9)?,
        citations_link: row.get(10)?,
    })
}

fn row_to_saved_query(row: &rusqlite::Row<'_>) -> rusqlite::Result<SavedQuery> {
    let collection: String = row.get(1)?;
    let topic: String = row.get(2)?;
    let tool_list: String = row.get(3)?;
    Ok(SavedQuery {
        id: row.get(0)?,
        collection: (!collection.is_empty()).then_some(collection),
        topic: (!topic.is_empty()).then_some(topic),
        tool_ids: tool_list
            .split(',')
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect(),
    })
}
