//! Versioned entity storage.
//!
//! [`EntityStore`] is the authoritative source of "which version is
//! current". Every write appends an immutable [`EntityRecord`] with a fresh
//! version from the shared [`VersionClock`] and publishes a [`WriteEvent`].
//!
//! [`SqliteEntityStore`] is the reference implementation: an append-only
//! `entity_versions` table in SQLite.

use crate::bus::WriteEventBus;
use crate::error::{StorageError, StorageResult};
use crate::sqlite::{self, SharedConnection};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;
use vindex_types::{
    EntityId, EntityRecord, Fields, ScopeId, Version, VersionClock, WriteEvent,
};

/// The authoritative version of an entity as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentVersion {
    pub version: Version,
    pub tombstone: bool,
}

impl CurrentVersion {
    /// The current version if the entity is live, `None` if it was deleted.
    pub fn live(&self) -> Option<Version> {
        (!self.tombstone).then_some(self.version)
    }
}

/// Current-version reads and versioned writes of entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Returns the maximum-version record's version, or `None` if the entity
    /// never existed.
    async fn current_version(&self, id: &EntityId) -> StorageResult<Option<CurrentVersion>>;

    /// Batched form of [`EntityStore::current_version`]. Ids that never
    /// existed are absent from the map.
    async fn current_versions(
        &self,
        ids: &[EntityId],
    ) -> StorageResult<HashMap<EntityId, CurrentVersion>> {
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(current) = self.current_version(id).await? {
                out.insert(*id, current);
            }
        }
        Ok(out)
    }

    /// Loads the current record of a live entity.
    async fn load(&self, id: &EntityId) -> StorageResult<Option<EntityRecord>>;

    /// Creates a new entity and returns its first record.
    async fn create(
        &self,
        scope: ScopeId,
        collection: &str,
        entity_type: &str,
        fields: Fields,
    ) -> StorageResult<EntityRecord>;

    /// Writes a new version whose fields are the current fields overlaid
    /// with `fields`.
    async fn update(&self, id: &EntityId, fields: Fields) -> StorageResult<EntityRecord>;

    /// Appends a tombstone. Deleting an already-deleted entity returns the
    /// existing tombstone version without writing.
    async fn delete(&self, id: &EntityId) -> StorageResult<Version>;

    /// All records of an entity, oldest first.
    async fn history(&self, id: &EntityId) -> StorageResult<Vec<EntityRecord>>;
}

const RECORD_COLUMNS: &str = "entity_id, wall_time, logical, scope_id, collection, entity_type, \
     fields, created_wall, created_logical, tombstone";

/// SQLite-backed [`EntityStore`].
#[derive(Clone)]
pub struct SqliteEntityStore {
    conn: SharedConnection,
    clock: Arc<VersionClock>,
    bus: Option<WriteEventBus>,
}

impl SqliteEntityStore {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::init(sqlite::open(path)?)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::init(sqlite::open_in_memory()?)
    }

    fn init(conn: SharedConnection) -> StorageResult<Self> {
        let last = {
            let guard = sqlite::lock(&conn)?;
            init_schema(&guard)?;
            max_version(&guard)?
        };
        Ok(Self {
            conn,
            clock: Arc::new(VersionClock::starting_after(last.unwrap_or(Version::ZERO))),
            bus: None,
        })
    }

    /// Publishes a write event on `bus` after every successful write.
    pub fn with_bus(mut self, bus: WriteEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    fn publish(&self, event: WriteEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(event);
        }
    }
}

#[async_trait]
impl EntityStore for SqliteEntityStore {
    async fn current_version(&self, id: &EntityId) -> StorageResult<Option<CurrentVersion>> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            Ok(latest_record(&guard, &id)?.map(|r| CurrentVersion {
                version: r.version,
                tombstone: r.tombstone,
            }))
        })
        .await
    }

    async fn current_versions(
        &self,
        ids: &[EntityId],
    ) -> StorageResult<HashMap<EntityId, CurrentVersion>> {
        let conn = self.conn.clone();
        let ids = ids.to_vec();
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let mut stmt = guard.prepare_cached(
                "SELECT wall_time, logical, tombstone FROM entity_versions
                 WHERE entity_id = ?1 ORDER BY wall_time DESC, logical DESC LIMIT 1",
            )?;
            let mut out = HashMap::with_capacity(ids.len());
            for id in ids {
                let row = stmt
                    .query_row(params![id.to_string()], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, bool>(2)?))
                    })
                    .optional()?;
                if let Some((wall, logical, tombstone)) = row {
                    let version = sqlite::version_from_sql(wall, logical)?;
                    out.insert(id, CurrentVersion { version, tombstone });
                }
            }
            Ok(out)
        })
        .await
    }

    async fn load(&self, id: &EntityId) -> StorageResult<Option<EntityRecord>> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            Ok(latest_record(&guard, &id)?.filter(|r| !r.tombstone))
        })
        .await
    }

    async fn create(
        &self,
        scope: ScopeId,
        collection: &str,
        entity_type: &str,
        fields: Fields,
    ) -> StorageResult<EntityRecord> {
        let version = self.clock.next();
        let record = EntityRecord {
            id: EntityId::new(),
            version,
            scope,
            collection: collection.to_string(),
            entity_type: entity_type.to_string(),
            fields,
            created: version,
            tombstone: false,
        };

        let conn = self.conn.clone();
        let to_insert = record.clone();
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            insert_record(&guard, &to_insert)
        })
        .await?;

        debug!("Created entity {} v{} in {}", record.id, record.version, record.collection);
        self.publish(WriteEvent::written(record.id, scope, &record.collection, version));
        Ok(record)
    }

    async fn update(&self, id: &EntityId, fields: Fields) -> StorageResult<EntityRecord> {
        let conn = self.conn.clone();
        let clock = self.clock.clone();
        let id = *id;
        let record = sqlite::run_blocking(move || {
            let mut guard = sqlite::lock(&conn)?;
            let tx = guard.transaction()?;
            let current = latest_record(&tx, &id)?
                .filter(|r| !r.tombstone)
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;

            let mut merged = current.fields;
            merged.extend(fields);
            let record = EntityRecord {
                version: clock.next(),
                fields: merged,
                ..current
            };
            insert_record(&tx, &record)?;
            tx.commit()?;
            Ok(record)
        })
        .await?;

        debug!("Updated entity {} to v{}", record.id, record.version);
        self.publish(WriteEvent::written(
            record.id,
            record.scope,
            &record.collection,
            record.version,
        ));
        Ok(record)
    }

    async fn delete(&self, id: &EntityId) -> StorageResult<Version> {
        let conn = self.conn.clone();
        let clock = self.clock.clone();
        let id = *id;
        let (tombstone, fresh) = sqlite::run_blocking(move || {
            let mut guard = sqlite::lock(&conn)?;
            let tx = guard.transaction()?;
            let current = latest_record(&tx, &id)?
                .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
            if current.tombstone {
                return Ok((current, false));
            }

            let tombstone = EntityRecord {
                version: clock.next(),
                fields: Fields::new(),
                tombstone: true,
                ..current
            };
            insert_record(&tx, &tombstone)?;
            tx.commit()?;
            Ok((tombstone, true))
        })
        .await?;

        if fresh {
            debug!("Deleted entity {} at v{}", tombstone.id, tombstone.version);
            self.publish(WriteEvent::deleted(
                tombstone.id,
                tombstone.scope,
                &tombstone.collection,
                tombstone.version,
            ));
        }
        Ok(tombstone.version)
    }

    async fn history(&self, id: &EntityId) -> StorageResult<Vec<EntityRecord>> {
        let conn = self.conn.clone();
        let id = *id;
        sqlite::run_blocking(move || {
            let guard = sqlite::lock(&conn)?;
            let mut stmt = guard.prepare(&format!(
                "SELECT {RECORD_COLUMNS} FROM entity_versions
                 WHERE entity_id = ?1 ORDER BY wall_time ASC, logical ASC"
            ))?;
            let rows = stmt.query_map(params![id.to_string()], RawRecord::from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?.into_record()?);
            }
            Ok(records)
        })
        .await
    }
}

fn init_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS entity_versions (
            entity_id TEXT NOT NULL,
            wall_time INTEGER NOT NULL,
            logical INTEGER NOT NULL,
            scope_id TEXT NOT NULL,
            collection TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            fields TEXT NOT NULL,
            created_wall INTEGER NOT NULL,
            created_logical INTEGER NOT NULL,
            tombstone INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (entity_id, wall_time, logical)
        );
        ",
    )?;
    Ok(())
}

fn max_version(conn: &Connection) -> StorageResult<Option<Version>> {
    let row = conn
        .query_row(
            "SELECT wall_time, logical FROM entity_versions
             ORDER BY wall_time DESC, logical DESC LIMIT 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    row.map(|(wall, logical)| sqlite::version_from_sql(wall, logical))
        .transpose()
}

fn latest_record(conn: &Connection, id: &EntityId) -> StorageResult<Option<EntityRecord>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {RECORD_COLUMNS} FROM entity_versions
                 WHERE entity_id = ?1 ORDER BY wall_time DESC, logical DESC LIMIT 1"
            ),
            params![id.to_string()],
            RawRecord::from_row,
        )
        .optional()?;
    raw.map(RawRecord::into_record).transpose()
}

fn insert_record(conn: &Connection, record: &EntityRecord) -> StorageResult<()> {
    let (wall, logical) = sqlite::version_to_sql(record.version);
    let (created_wall, created_logical) = sqlite::version_to_sql(record.created);
    conn.execute(
        &format!(
            "INSERT INTO entity_versions ({RECORD_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            record.id.to_string(),
            wall,
            logical,
            record.scope.to_string(),
            record.collection,
            record.entity_type,
            serde_json::to_string(&record.fields)?,
            created_wall,
            created_logical,
            record.tombstone,
        ],
    )?;
    Ok(())
}

/// Row image before parsing ids and JSON.
struct RawRecord {
    entity_id: String,
    wall_time: i64,
    logical: i64,
    scope_id: String,
    collection: String,
    entity_type: String,
    fields: String,
    created_wall: i64,
    created_logical: i64,
    tombstone: bool,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            entity_id: row.get(0)?,
            wall_time: row.get(1)?,
            logical: row.get(2)?,
            scope_id: row.get(3)?,
            collection: row.get(4)?,
            entity_type: row.get(5)?,
            fields: row.get(6)?,
            created_wall: row.get(7)?,
            created_logical: row.get(8)?,
            tombstone: row.get(9)?,
        })
    }

    fn into_record(self) -> StorageResult<EntityRecord> {
        Ok(EntityRecord {
            id: sqlite::parse_id(&self.entity_id, "entity id")?,
            version: sqlite::version_from_sql(self.wall_time, self.logical)?,
            scope: sqlite::parse_id(&self.scope_id, "scope id")?,
            collection: self.collection,
            entity_type: self.entity_type,
            fields: serde_json::from_str(&self.fields)?,
            created: sqlite::version_from_sql(self.created_wall, self.created_logical)?,
            tombstone: self.tombstone,
        })
    }
}
