//! SQLite-backed record store.
//!
//! One row per barcode in `food_products`. Writes go through a single writer
//! connection behind a [`Mutex`] and always run inside a scoped transaction,
//! so either every column of an upsert becomes visible or none does. A
//! file-backed store serves lookups and searches from a [`ReadPool`] of
//! read-only connections (WAL mode allows them to run alongside the writer).
//!
//! Timestamps are stored as fixed-width RFC 3339 text in UTC with microsecond
//! precision, which keeps `ORDER BY updated_at` correct as a text sort.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, Transaction, params};
use thiserror::Error;

use crate::record::{ProductCandidate, ProductRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("failed to encode nutrition data: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("bulk item {index} (barcode {barcode}) failed: {source}")]
    Batch {
        index: usize,
        barcode: String,
        #[source]
        source: Box<StoreError>,
    },
    #[error("store writer lock poisoned")]
    Poisoned,
}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS food_products (
         id             TEXT PRIMARY KEY,
         barcode        TEXT NOT NULL UNIQUE CHECK (length(barcode) BETWEEN 1 AND 64),
         name           TEXT NOT NULL CHECK (length(name) > 0),
         name_folded    TEXT NOT NULL,
         brand          TEXT,
         serving_size   TEXT,
         calories       REAL,
         macros         TEXT NOT NULL,
         micros         TEXT NOT NULL,
         source         TEXT NOT NULL,
         last_synced_at TEXT NOT NULL,
         created_at     TEXT NOT NULL,
         updated_at     TEXT NOT NULL
     );
     CREATE INDEX IF NOT EXISTS idx_food_products_updated_at ON food_products(updated_at);";

const COLUMNS: &str = "id, barcode, name, brand, serving_size, calories, macros, micros, \
                       source, last_synced_at, created_at, updated_at";

/// Open a SQLite connection with WAL mode and standard pragmas.
fn open_sqlite(path: &Path, read_only: bool) -> Result<Connection, rusqlite::Error> {
    let flags = if read_only {
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
    } else {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX
    };
    let conn = Connection::open_with_flags(path, flags)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(conn)
}

/// Pool of read-only SQLite connections for concurrent lookups.
///
/// Connections are returned to the pool after use. If the pool is empty, a new
/// connection is opened.
struct ReadPool {
    pool: Mutex<Vec<Connection>>,
    path: PathBuf,
}

impl ReadPool {
    fn new(path: &Path) -> Self {
        Self {
            pool: Mutex::new(Vec::new()),
            path: path.to_path_buf(),
        }
    }

    fn acquire(&self) -> Result<Connection, rusqlite::Error> {
        if let Ok(mut pool) = self.pool.lock()
            && let Some(conn) = pool.pop()
        {
            return Ok(conn);
        }
        open_sqlite(&self.path, true)
    }

    fn release(&self, conn: Connection) {
        if let Ok(mut pool) = self.pool.lock() {
            pool.push(conn);
        }
    }

    fn with<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.acquire()?;
        let result = f(&conn);
        // A connection that just failed may be in a bad state; don't recycle it.
        if result.is_ok() {
            self.release(conn);
        }
        result
    }
}

/// Durable keyed storage for product records.
pub struct ProductStore {
    writer: Mutex<Connection>,
    read_pool: Option<ReadPool>,
    path: Option<PathBuf>,
}

impl ProductStore {
    /// Open (or create) a store at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = open_sqlite(path, false)?;
        conn.execute_batch(SCHEMA)?;
        tracing::debug!(path = %path.display(), "opened product store");
        Ok(Self {
            writer: Mutex::new(conn),
            read_pool: Some(ReadPool::new(path)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Ephemeral store that lives as long as this value. Reads share the
    /// writer connection.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            writer: Mutex::new(conn),
            read_pool: None,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Exact-match lookup by barcode.
    pub fn find_by_barcode(&self, barcode: &str) -> Result<Option<ProductRecord>, StoreError> {
        self.read(|conn| find_in(conn, barcode))
    }

    /// Insert a new record or overwrite every mutable field of the existing
    /// one. `id` and `created_at` never change once assigned.
    ///
    /// Returns the row as persisted, including generated and defaulted fields.
    pub fn upsert(
        &self,
        candidate: &ProductCandidate,
        now: DateTime<Utc>,
    ) -> Result<ProductRecord, StoreError> {
        self.write(|tx| upsert_in(tx, candidate, now))
    }

    /// Upsert every candidate in order inside one transaction.
    ///
    /// The first failure aborts the batch and rolls back the items written so
    /// far; the error names the failing item.
    pub fn upsert_batch(
        &self,
        candidates: &[ProductCandidate],
        now: DateTime<Utc>,
    ) -> Result<Vec<ProductRecord>, StoreError> {
        self.write(|tx| {
            let mut written = Vec::with_capacity(candidates.len());
            for (index, candidate) in candidates.iter().enumerate() {
                let record =
                    upsert_in(tx, candidate, now).map_err(|e| StoreError::Batch {
                        index,
                        barcode: candidate.barcode.clone(),
                        source: Box::new(e),
                    })?;
                written.push(record);
            }
            Ok(written)
        })
    }

    /// Case-insensitive substring match on `name`, most recently updated
    /// first, at most `limit` rows.
    pub fn search_by_name(
        &self,
        substring: &str,
        limit: usize,
    ) -> Result<Vec<ProductRecord>, StoreError> {
        let needle = substring.to_lowercase();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.read(|conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {COLUMNS} FROM food_products
                 WHERE instr(name_folded, ?1) > 0
                 ORDER BY updated_at DESC, rowid DESC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![needle, limit], row_to_record)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, StoreError> {
        self.read(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM food_products", [], |row| {
                row.get(0)
            })?;
            Ok(usize::try_from(n).unwrap_or_default())
        })
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        match self.read_pool {
            Some(ref pool) => pool.with(f),
            None => {
                let conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
                f(&conn)
            }
        }
    }

    /// Run `f` in a transaction that commits only if `f` succeeds. Any early
    /// return drops the transaction, which rolls it back.
    fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

impl std::fmt::Debug for ProductStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProductStore")
            .field("path", &self.path)
            .field("pooled_reads", &self.read_pool.is_some())
            .finish()
    }
}

fn find_in(conn: &Connection, barcode: &str) -> Result<Option<ProductRecord>, StoreError> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {COLUMNS} FROM food_products WHERE barcode = ?1"
    ))?;
    Ok(stmt.query_row(params![barcode], row_to_record).optional()?)
}

fn upsert_in(
    tx: &Transaction<'_>,
    candidate: &ProductCandidate,
    now: DateTime<Utc>,
) -> Result<ProductRecord, StoreError> {
    let macros = serde_json::to_string(&candidate.macros)?;
    let micros = serde_json::to_string(&candidate.micros)?;
    let synced = candidate.last_synced_at.unwrap_or(now);

    tx.execute(
        "INSERT INTO food_products
             (id, barcode, name, name_folded, brand, serving_size, calories, macros, micros,
              source, last_synced_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
         ON CONFLICT(barcode) DO UPDATE SET
             name           = excluded.name,
             name_folded    = excluded.name_folded,
             brand          = excluded.brand,
             serving_size   = excluded.serving_size,
             calories       = excluded.calories,
             macros         = excluded.macros,
             micros         = excluded.micros,
             source         = excluded.source,
             last_synced_at = excluded.last_synced_at,
             updated_at     = excluded.updated_at",
        params![
            uuid::Uuid::new_v4().to_string(),
            candidate.barcode,
            candidate.name,
            candidate.name.to_lowercase(),
            candidate.brand,
            candidate.serving_size,
            candidate.calories,
            macros,
            micros,
            candidate.source,
            encode_ts(synced),
            encode_ts(now),
        ],
    )?;

    // Read back inside the same transaction so the caller sees the stored
    // id, created_at and timestamp precision.
    find_in(tx, &candidate.barcode)?.ok_or(StoreError::Database(
        rusqlite::Error::QueryReturnedNoRows,
    ))
}

fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn decode_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ProductRecord> {
    let macros: String = row.get(6)?;
    let micros: String = row.get(7)?;
    let synced: String = row.get(9)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;
    Ok(ProductRecord {
        id: row.get(0)?,
        barcode: row.get(1)?,
        name: row.get(2)?,
        brand: row.get(3)?,
        serving_size: row.get(4)?,
        calories: row.get(5)?,
        macros: decode_json(6, &macros)?,
        micros: decode_json(7, &micros)?,
        source: row.get(8)?,
        last_synced_at: decode_ts(9, &synced)?,
        created_at: decode_ts(10, &created)?,
        updated_at: decode_ts(11, &updated)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Macros;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_767_225_600 + secs, 0).unwrap()
    }

    fn candidate(barcode: &str, name: &str) -> ProductCandidate {
        ProductCandidate::new(barcode, name)
    }

    #[test]
    fn find_on_empty_store_is_none() {
        let store = ProductStore::open_in_memory().unwrap();
        assert!(store.find_by_barcode("123").unwrap().is_none());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn insert_assigns_id_and_timestamps() {
        let store = ProductStore::open_in_memory().unwrap();
        let record = store.upsert(&candidate("123", "Oat milk"), t(0)).unwrap();
        assert!(!record.id.is_empty());
        assert_eq!(record.created_at, t(0));
        assert_eq!(record.updated_at, t(0));
        // No sync time supplied: defaults to the write time.
        assert_eq!(record.last_synced_at, t(0));
        assert_eq!(store.find_by_barcode("123").unwrap(), Some(record));
    }

    #[test]
    fn supplied_sync_time_is_kept() {
        let store = ProductStore::open_in_memory().unwrap();
        let mut c = candidate("123", "Oat milk");
        c.last_synced_at = Some(t(-3600));
        let record = store.upsert(&c, t(0)).unwrap();
        assert_eq!(record.last_synced_at, t(-3600));
        assert_eq!(record.created_at, t(0));
    }

    #[test]
    fn upsert_overwrites_fields_but_keeps_identity() {
        let store = ProductStore::open_in_memory().unwrap();
        let mut first = candidate("123", "Oat milk");
        first.brand = Some("Oatly".into());
        first.calories = Some(46.0);
        first.micros.insert("sugars_100g".into(), 4.0);
        let original = store.upsert(&first, t(0)).unwrap();

        // Second write drops brand and micros entirely: fields are replaced,
        // not merged.
        let mut second = candidate("123", "Oat drink");
        second.macros = Macros {
            protein: 1.0,
            carbs: 6.6,
            fat: 1.5,
        };
        let updated = store.upsert(&second, t(60)).unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.created_at, t(0));
        assert_eq!(updated.updated_at, t(60));
        assert_eq!(updated.last_synced_at, t(60));
        assert_eq!(updated.name, "Oat drink");
        assert_eq!(updated.brand, None);
        assert_eq!(updated.calories, None);
        assert!(updated.micros.is_empty());
        assert_eq!(updated.macros.carbs, 6.6);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn repeated_upserts_never_duplicate() {
        let store = ProductStore::open_in_memory().unwrap();
        let first = store.upsert(&candidate("A", "Thing"), t(0)).unwrap();
        for i in 1..5 {
            let r = store.upsert(&candidate("A", "Thing"), t(i)).unwrap();
            assert_eq!(r.id, first.id);
            assert_eq!(r.created_at, first.created_at);
        }
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn timestamps_round_trip_at_microsecond_precision() {
        let store = ProductStore::open_in_memory().unwrap();
        let now = t(0) + Duration::nanoseconds(123_456_789);
        let record = store.upsert(&candidate("1", "x"), now).unwrap();
        assert_eq!(record.updated_at, t(0) + Duration::microseconds(123_456));
    }

    #[test]
    fn batch_with_duplicate_keeps_last() {
        let store = ProductStore::open_in_memory().unwrap();
        let mut a1 = candidate("A", "First");
        a1.calories = Some(100.0);
        let mut a2 = candidate("A", "Second");
        a2.calories = Some(200.0);
        let written = store.upsert_batch(&[a1, a2], t(0)).unwrap();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].id, written[1].id);

        let stored = store.find_by_barcode("A").unwrap().unwrap();
        assert_eq!(stored.name, "Second");
        assert_eq!(stored.calories, Some(200.0));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn batch_failure_names_item_and_rolls_back() {
        let store = ProductStore::open_in_memory().unwrap();
        // Empty name violates the schema CHECK.
        let batch = [candidate("A", "Fine"), candidate("B", ""), candidate("C", "Never")];
        let err = store.upsert_batch(&batch, t(0)).unwrap_err();
        match err {
            StoreError::Batch { index, barcode, .. } => {
                assert_eq!(index, 1);
                assert_eq!(barcode, "B");
            }
            other => panic!("expected batch error, got {other:?}"),
        }
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn search_is_case_insensitive_and_ordered() {
        let store = ProductStore::open_in_memory().unwrap();
        store.upsert(&candidate("1", "Dark Chocolate"), t(0)).unwrap();
        store.upsert(&candidate("2", "Milk chocolate"), t(10)).unwrap();
        store.upsert(&candidate("3", "Oat milk"), t(20)).unwrap();
        store.upsert(&candidate("4", "CHOC chip cookie"), t(5)).unwrap();

        let names: Vec<String> = store
            .search_by_name("choc", 10)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, ["Milk chocolate", "CHOC chip cookie", "Dark Chocolate"]);

        let top = store.search_by_name("Choc", 1).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].barcode, "2");
    }

    #[test]
    fn search_reorders_after_update() {
        let store = ProductStore::open_in_memory().unwrap();
        store.upsert(&candidate("1", "Choc A"), t(0)).unwrap();
        store.upsert(&candidate("2", "Choc B"), t(10)).unwrap();
        store.upsert(&candidate("1", "Choc A"), t(20)).unwrap();
        let first = &store.search_by_name("choc", 1).unwrap()[0];
        assert_eq!(first.barcode, "1");
    }

    #[test]
    fn search_folds_non_ascii_case() {
        let store = ProductStore::open_in_memory().unwrap();
        store.upsert(&candidate("1", "ÉCLAIR AU CAFÉ"), t(0)).unwrap();
        assert_eq!(store.search_by_name("éclair", 5).unwrap().len(), 1);
    }

    #[test]
    fn search_without_matches_is_empty() {
        let store = ProductStore::open_in_memory().unwrap();
        store.upsert(&candidate("1", "Bread"), t(0)).unwrap();
        assert!(store.search_by_name("choc", 5).unwrap().is_empty());
    }

    #[test]
    fn file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("food.db");
        let id = {
            let store = ProductStore::open(&path).unwrap();
            store.upsert(&candidate("123", "Oat milk"), t(0)).unwrap().id
        };
        let store = ProductStore::open(&path).unwrap();
        let record = store.find_by_barcode("123").unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn pooled_reads_see_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(ProductStore::open(&dir.path().join("food.db")).unwrap());
        let mut handles = vec![];
        for i in 0..8 {
            let s = store.clone();
            handles.push(std::thread::spawn(move || {
                let barcode = format!("{i:013}");
                s.upsert(&candidate(&barcode, "Thing"), t(i)).unwrap();
                assert!(s.find_by_barcode(&barcode).unwrap().is_some());
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count().unwrap(), 8);
    }

    #[test]
    fn corrupt_json_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("food.db");
        let store = ProductStore::open(&path).unwrap();
        store.upsert(&candidate("123", "Oat milk"), t(0)).unwrap();
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE food_products SET macros = '{not json' WHERE barcode = '123'", [])
                .unwrap();
        }
        assert!(matches!(
            store.find_by_barcode("123"),
            Err(StoreError::Database(_))
        ));
    }
}
