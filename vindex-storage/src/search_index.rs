//! Search index over entity versions.
//!
//! The index is derived data: it may hold several entries for one entity
//! (one per indexed version) until something removes the superseded ones.
//! Hits come back as [`Candidate`]s and must be checked against the
//! [`EntityStore`](crate::EntityStore) before being trusted.
//!
//! [`SqliteSearchIndex`] is the reference implementation. Its query model is
//! deliberately small: entity-type filter, string equality on top-level
//! payload fields, and a fixed ascending sort.

use crate::error::{StorageError, StorageResult};
use crate::sqlite::{self, SharedConnection};
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use vindex_types::{Candidate, EntityId, IndexEntry, ScopeId, Version};

/// Sort order of query results. Both are ascending and fully deterministic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// By the entity's creation version.
    #[default]
    Created,
    /// By the indexed version.
    Version,
}

/// Equality filter on a top-level string field of the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: String,
}

/// A structured index query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Entity types to match; empty matches every type.
    #[serde(default)]
    pub entity_types: Vec<String>,
    #[serde(default)]
    pub filters: Vec<FieldFilter>,
    #[serde(default)]
    pub order: SortOrder,
}

impl Query {
    /// Matches every entry of the collection.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to one more entity type.
    pub fn of_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_types.push(entity_type.into());
        self
    }

    /// Adds a string-equality filter on a payload field.
    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Sets the sort order.
    pub fn order_by(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// Result of deleting a single `(entity_id, version)` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entry existed and was removed.
    Deleted,
    /// No such entry; nothing changed.
    Absent,
}

/// Inserts, queries and removes index entries.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Indexes one entity version. Re-inserting the same key replaces it.
    async fn insert(&self, entry: &IndexEntry) -> StorageResult<()>;

    /// Runs `query` over one collection and returns a page of raw candidates
    /// in the query's order. Stale duplicates are included.
    async fn query(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<Candidate>>;

    /// Every entry for one entity, any collection, oldest version first.
    async fn entries_for(&self, id: &EntityId) -> StorageResult<Vec<Candidate>>;

    /// Removes exactly the entry `(id, version)`.
    async fn delete_entry(&self, id: &EntityId, version: Version) -> StorageResult<DeleteOutcome>;

    /// Whether the entry `(id, version)` exists.
    async fn contains(&self, id: &EntityId, version: Version) -> StorageResult<bool>;

    /// Number of entries `query` matches, stale ones included.
    async fn count(&self, scope: &ScopeId, collection: &str, query: &Query)
        -> StorageResult<usize>;
}

const CANDIDATE_COLUMNS: &str =
    "entity_id, wall_time, logical, entity_type, created_wall, created_logical";

/// SQLite-backed [`SearchIndex`].
#[derive(Clone)]
pub struct SqliteSearchIndex {
    conn: SharedConnection,
}

impl SqliteSearchIndex {
    /// Opens (or creates) an index at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::init(sqlite::open(path)?)
    }

    /// Opens an in-memory index (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(sqlite::open_in_memory()?)
    }

    fn init(conn: SharedConnection) -> StorageResult<Self> {
        sqlite::lock(&conn)?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS index_entries (
                entity_id TEXT NOT NULL,
                wall_time INTEGER NOT NULL,
                logical INTEGER NOT NULL,
                scope_id TEXT NOT NULL,
                collection TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                created_wall INTEGER NOT NULL,
                created_logical INTEGER NOT NULL,
                payload TEXT NOT NULL,
                PRIMARY KEY (entity_id, wall_time, logical)
            );

            CREATE INDEX IF NOT EXISTS idx_index_entries_collection
                ON index_entries (scope_id, collection);
            ",
        )?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl SearchIndex for SqliteSearchIndex {
    async fn insert(&self, entry: &IndexEntry) -> StorageResult<()> {
        let conn = self.conn.clone();
        let entry = entry.clone();
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let (wall, logical) = sqlite::version_to_sql(entry.version);
            let (created_wall, created_logical) = sqlite::version_to_sql(entry.created);
            guard.execute(
                "INSERT OR REPLACE INTO index_entries
                 (entity_id, wall_time, logical, scope_id, collection, entity_type,
                  created_wall, created_logical, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    entry.entity_id.to_string(),
                    wall,
                    logical,
                    entry.scope.to_string(),
                    entry.collection,
                    entry.entity_type,
                    created_wall,
                    created_logical,
                    serde_json::to_string(&entry.payload)?,
                ],
            )?;
            debug!("Indexed entity {} v{}", entry.entity_id, entry.version);
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
        limit: usize,
        offset: usize,
    ) -> StorageResult<Vec<Candidate>> {
        let conn = self.conn.clone();
        let (where_sql, mut args) = build_filter(scope, collection, query)?;
        let order_sql = match query.order {
            SortOrder::Created => {
                "created_wall, created_logical, entity_id, wall_time, logical"
            }
            SortOrder::Version => "wall_time, logical, entity_id",
        };
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM index_entries WHERE {where_sql}
             ORDER BY {order_sql} LIMIT ? OFFSET ?"
        );
        args.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        args.push(SqlValue::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));
        let order = query.order;

        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let mut stmt = guard.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args), RawCandidate::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.into_candidate(order)?);
            }
            Ok(out)
        })
        .await
    }

    async fn entries_for(&self, id: &EntityId) -> StorageResult<Vec<Candidate>> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let mut stmt = guard.prepare(&format!(
                "SELECT {CANDIDATE_COLUMNS} FROM index_entries
                 WHERE entity_id = ?1 ORDER BY wall_time, logical"
            ))?;
            let rows = stmt.query_map(params![id.to_string()], RawCandidate::from_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?.into_candidate(SortOrder::Version)?);
            }
            Ok(out)
        })
        .await
    }

    async fn delete_entry(&self, id: &EntityId, version: Version) -> StorageResult<DeleteOutcome> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let (wall, logical) = sqlite::version_to_sql(version);
            let removed = guard.execute(
                "DELETE FROM index_entries
                 WHERE entity_id = ?1 AND wall_time = ?2 AND logical = ?3",
                params![id.to_string(), wall, logical],
            )?;
            Ok(if removed > 0 {
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::Absent
            })
        })
        .await
    }

    async fn contains(&self, id: &EntityId, version: Version) -> StorageResult<bool> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let (wall, logical) = sqlite::version_to_sql(version);
            Ok(exists(&guard, &id, wall, logical)?)
        })
        .await
    }

    async fn count(
        &self,
        scope: &ScopeId,
        collection: &str,
        query: &Query,
    ) -> StorageResult<usize> {
        let conn = self.conn.clone();
        let (where_sql, args) = build_filter(scope, collection, query)?;
        let sql = format!("SELECT COUNT(*) FROM index_entries WHERE {where_sql}");
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let count: i64 = guard.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

fn exists(conn: &Connection, id: &EntityId, wall: i64, logical: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM index_entries
         WHERE entity_id = ?1 AND wall_time = ?2 AND logical = ?3)",
        params![id.to_string(), wall, logical],
        |row| row.get(0),
    )
}

fn build_filter(
    scope: &ScopeId,
    collection: &str,
    query: &Query,
) -> StorageResult<(String, Vec<SqlValue>)> {
    let mut clauses = vec!["scope_id = ?".to_string(), "collection = ?".to_string()];
    let mut args = vec![
        SqlValue::Text(scope.to_string()),
        SqlValue::Text(collection.to_string()),
    ];

    if !query.entity_types.is_empty() {
        let marks = vec!["?"; query.entity_types.len()].join(", ");
        clauses.push(format!("entity_type IN ({marks})"));
        args.extend(query.entity_types.iter().cloned().map(SqlValue::Text));
    }

    for filter in &query.filters {
        if filter.field.is_empty()
            || !filter
                .field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(StorageError::InvalidData(format!(
                "unsupported filter field {:?}",
                filter.field
            )));
        }
        clauses.push("json_extract(payload, ?) = ?".to_string());
        args.push(SqlValue::Text(format!("$.{}", filter.field)));
        args.push(SqlValue::Text(filter.value.clone()));
    }

    Ok((clauses.join(" AND "), args))
}

struct RawCandidate {
    entity_id: String,
    wall_time: i64,
    logical: i64,
    entity_type: String,
    created_wall: i64,
    created_logical: i64,
}

impl RawCandidate {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get(0)?,
            wall_time: row.get(1)?,
            logical: row.get(2)?,
            entity_type: row.get(3)?,
            created_wall: row.get(4)?,
            created_logical: row.get(5)?,
        })
    }

    fn into_candidate(self, order: SortOrder) -> StorageResult<Candidate> {
        let version = sqlite::version_from_sql(self.wall_time, self.logical)?;
        let ordering = match order {
            SortOrder::Created => sqlite::version_from_sql(self.created_wall, self.created_logical)?,
            SortOrder::Version => version,
        };
        Ok(Candidate::new(
            sqlite::parse_id(&self.entity_id, "entity id")?,
            version,
            self.entity_type,
            ordering,
        ))
    }
}
