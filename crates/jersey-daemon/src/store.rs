//! `SQLite` persistence for placements and processed webhook deliveries.
//!
//! # Contracts
//!
//! - [CTR-SQ001] `insert` reads `MAX(z_index)` and writes the new row inside
//!   one `IMMEDIATE` transaction, so no two inserts on a side share a z-index
//!   even across processes sharing the file.
//! - [CTR-SQ002] `compare_and_update` is a single `UPDATE ... WHERE status =`
//!   statement; the guard and the write cannot interleave with another
//!   writer.
//! - [CTR-SQ003] Creation times are stored in whole microseconds and the
//!   returned record carries the truncated value, so a record read back is
//!   identical to the one returned by `insert`.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use jersey_core::geometry::{LogoGeometry, Tier};
use jersey_core::placement::{
    CancelReason, ImageRef, Placement, PlacementId, PlacementStatus, Settlement, Side,
};
use jersey_core::store::{NewPlacement, PlacementPatch, PlacementQuery, PlacementStore, StoreError};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::webhook::DeliveryIdStore;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS placements (
    seq                 INTEGER PRIMARY KEY AUTOINCREMENT,
    id                  TEXT NOT NULL UNIQUE,
    side                TEXT NOT NULL,
    tier                TEXT NOT NULL,
    x                   REAL NOT NULL,
    y                   REAL NOT NULL,
    width_fraction      REAL NOT NULL,
    rotation_degrees    REAL NOT NULL,
    image_url           TEXT NOT NULL,
    storage_id          TEXT NOT NULL,
    z_index             INTEGER NOT NULL,
    status              TEXT NOT NULL,
    live                INTEGER NOT NULL DEFAULT 0,
    created_at_us       INTEGER NOT NULL,
    checkout_session_id TEXT,
    checkout_started_at_us INTEGER,
    settlement_json     TEXT,
    cancel_reason       TEXT
);
CREATE INDEX IF NOT EXISTS idx_placements_side_order
    ON placements (side, z_index, created_at_us, seq);
CREATE INDEX IF NOT EXISTS idx_placements_status_created
    ON placements (status, created_at_us);
CREATE TABLE IF NOT EXISTS webhook_deliveries (
    event_id        TEXT PRIMARY KEY,
    processed_at_us INTEGER NOT NULL
);
";

const SELECT_COLUMNS: &str = "seq, id, side, tier, x, y, width_fraction, rotation_degrees, \
     image_url, storage_id, z_index, status, live, created_at_us, checkout_session_id, \
     checkout_started_at_us, settlement_json, cancel_reason";

fn backend(e: &rusqlite::Error) -> StoreError {
    StoreError::Backend {
        message: format!("sqlite: {e}"),
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock().map_err(|_| StoreError::Backend {
        message: "connection lock poisoned".to_string(),
    })
}

/// Opens (or creates) the database at `path` and applies the schema.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if the file cannot be opened or the
/// schema cannot be applied.
pub fn open_connection(path: &Path) -> Result<Arc<Mutex<Connection>>, StoreError> {
    let conn = Connection::open(path).map_err(|e| backend(&e))?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
        .map_err(|e| backend(&e))?;
    init_schema(&conn).map_err(|e| backend(&e))?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Opens a private in-memory database with the schema applied.
///
/// # Errors
///
/// Returns [`StoreError::Backend`] if `SQLite` cannot allocate it.
pub fn open_in_memory() -> Result<Arc<Mutex<Connection>>, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| backend(&e))?;
    init_schema(&conn).map_err(|e| backend(&e))?;
    Ok(Arc::new(Mutex::new(conn)))
}

/// Applies the schema and upgrades databases created before a column
/// existed. Idempotent.
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)?;
    ensure_checkout_started_column(conn)
}

fn ensure_checkout_started_column(conn: &Connection) -> rusqlite::Result<()> {
    let mut has_column = false;
    let mut stmt = conn.prepare("PRAGMA table_info('placements')")?;
    let columns = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for column in columns {
        if column? == "checkout_started_at_us" {
            has_column = true;
        }
    }
    if !has_column {
        conn.execute(
            "ALTER TABLE placements ADD COLUMN checkout_started_at_us INTEGER",
            [],
        )?;
    }
    Ok(())
}

/// Durable [`PlacementStore`] backed by `SQLite`.
#[derive(Debug, Clone)]
pub struct SqlitePlacementStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePlacementStore {
    /// Creates a store over an already initialized connection.
    #[must_use]
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Shared connection handle.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Runs the guarded update shared by `update` and `compare_and_update`.
    /// Returns the number of rows changed.
    fn apply_patch(
        &self,
        id: &PlacementId,
        expected: Option<PlacementStatus>,
        patch: &PlacementPatch,
    ) -> Result<usize, StoreError> {
        let settlement_json = patch
            .settlement
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Backend {
                message: format!("settlement serialization failed: {e}"),
            })?;
        let conn = lock(&self.conn)?;
        conn.execute(
            "UPDATE placements SET
                 status = COALESCE(?3, status),
                 live = COALESCE(?4, live),
                 checkout_session_id = COALESCE(?5, checkout_session_id),
                 checkout_started_at_us = COALESCE(?6, checkout_started_at_us),
                 settlement_json = COALESCE(?7, settlement_json),
                 cancel_reason = COALESCE(?8, cancel_reason)
             WHERE id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![
                id.as_str(),
                expected.map(PlacementStatus::as_str),
                patch.status.map(PlacementStatus::as_str),
                patch.live,
                patch.checkout_session_id.as_deref(),
                patch.checkout_started_at.map(|t| t.timestamp_micros()),
                settlement_json,
                patch.cancel_reason.map(CancelReason::as_str),
            ],
        )
        .map_err(|e| backend(&e))
    }
}

/// Raw column values of one `placements` row.
struct PlacementRow {
    seq: i64,
    id: String,
    side: String,
    tier: String,
    x: f64,
    y: f64,
    width_fraction: f64,
    rotation_degrees: f64,
    image_url: String,
    storage_id: String,
    z_index: i64,
    status: String,
    live: bool,
    created_at_us: i64,
    checkout_session_id: Option<String>,
    checkout_started_at_us: Option<i64>,
    settlement_json: Option<String>,
    cancel_reason: Option<String>,
}

impl PlacementRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            id: row.get(1)?,
            side: row.get(2)?,
            tier: row.get(3)?,
            x: row.get(4)?,
            y: row.get(5)?,
            width_fraction: row.get(6)?,
            rotation_degrees: row.get(7)?,
            image_url: row.get(8)?,
            storage_id: row.get(9)?,
            z_index: row.get(10)?,
            status: row.get(11)?,
            live: row.get(12)?,
            created_at_us: row.get(13)?,
            checkout_session_id: row.get(14)?,
            checkout_started_at_us: row.get(15)?,
            settlement_json: row.get(16)?,
            cancel_reason: row.get(17)?,
        })
    }

    fn into_placement(self) -> Result<Placement, StoreError> {
        let id = self.id;
        let corrupt = |reason: String| StoreError::Corrupt {
            placement_id: id.clone(),
            reason,
        };

        let side: Side = self.side.parse().map_err(|e| corrupt(format!("{e}")))?;
        let tier: Tier = self.tier.parse().map_err(|e| corrupt(format!("{e}")))?;
        let status: PlacementStatus = self.status.parse().map_err(|e| corrupt(format!("{e}")))?;
        let cancel_reason = self
            .cancel_reason
            .map(|r| r.parse::<CancelReason>())
            .transpose()
            .map_err(|e| corrupt(format!("{e}")))?;
        let settlement = self
            .settlement_json
            .map(|json| serde_json::from_str::<Settlement>(&json))
            .transpose()
            .map_err(|e| corrupt(format!("settlement: {e}")))?;
        let created_at = DateTime::from_timestamp_micros(self.created_at_us)
            .ok_or_else(|| corrupt(format!("created_at {} out of range", self.created_at_us)))?;
        let checkout_started_at = self
            .checkout_started_at_us
            .map(|us| {
                DateTime::from_timestamp_micros(us)
                    .ok_or_else(|| corrupt(format!("checkout_started_at {us} out of range")))
            })
            .transpose()?;
        let sequence =
            u64::try_from(self.seq).map_err(|_| corrupt(format!("negative seq {}", self.seq)))?;

        Ok(Placement {
            id: PlacementId::new(id.clone()),
            side,
            tier,
            geometry: LogoGeometry {
                x: self.x,
                y: self.y,
                width_fraction: self.width_fraction,
                rotation_degrees: self.rotation_degrees,
            },
            image: ImageRef {
                url: self.image_url,
                storage_id: self.storage_id,
            },
            z_index: self.z_index,
            status,
            live: self.live,
            created_at,
            sequence,
            checkout_session_id: self.checkout_session_id,
            checkout_started_at,
            settlement,
            cancel_reason,
        })
    }
}

impl PlacementStore for SqlitePlacementStore {
    fn insert(&self, new: NewPlacement) -> Result<Placement, StoreError> {
        let now = Utc::now();
        let created_at_us = now.timestamp_micros();
        let created_at = DateTime::from_timestamp_micros(created_at_us).unwrap_or(now);
        let id = PlacementId::generate();

        let mut conn = lock(&self.conn)?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| backend(&e))?;
        let z_index: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(z_index), 0) + 1 FROM placements WHERE side = ?1",
                params![new.side.as_str()],
                |row| row.get(0),
            )
            .map_err(|e| backend(&e))?;
        tx.execute(
            "INSERT INTO placements (id, side, tier, x, y, width_fraction, rotation_degrees,
                 image_url, storage_id, z_index, status, live, created_at_us)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
            params![
                id.as_str(),
                new.side.as_str(),
                new.tier.as_str(),
                new.geometry.x,
                new.geometry.y,
                new.geometry.width_fraction,
                new.geometry.rotation_degrees,
                new.image.url,
                new.image.storage_id,
                z_index,
                PlacementStatus::Pending.as_str(),
                created_at_us,
            ],
        )
        .map_err(|e| backend(&e))?;
        let seq = tx.last_insert_rowid();
        tx.commit().map_err(|e| backend(&e))?;

        Ok(Placement {
            id,
            side: new.side,
            tier: new.tier,
            geometry: new.geometry,
            image: new.image,
            z_index,
            status: PlacementStatus::Pending,
            live: false,
            created_at,
            sequence: u64::try_from(seq).unwrap_or_default(),
            checkout_session_id: None,
            checkout_started_at: None,
            settlement: None,
            cancel_reason: None,
        })
    }

    fn get(&self, id: &PlacementId) -> Result<Option<Placement>, StoreError> {
        let row = {
            let conn = lock(&self.conn)?;
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM placements WHERE id = ?1"),
                params![id.as_str()],
                PlacementRow::from_row,
            )
            .optional()
            .map_err(|e| backend(&e))?
        };
        row.map(PlacementRow::into_placement).transpose()
    }

    fn update(&self, id: &PlacementId, patch: &PlacementPatch) -> Result<(), StoreError> {
        if self.apply_patch(id, None, patch)? == 0 {
            return Err(StoreError::NotFound {
                placement_id: id.to_string(),
            });
        }
        Ok(())
    }

    fn compare_and_update(
        &self,
        id: &PlacementId,
        expected: PlacementStatus,
        patch: &PlacementPatch,
    ) -> Result<bool, StoreError> {
        Ok(self.apply_patch(id, Some(expected), patch)? == 1)
    }

    fn query(&self, filter: &PlacementQuery) -> Result<Vec<Placement>, StoreError> {
        let rows = {
            let conn = lock(&self.conn)?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM placements
                     WHERE (?1 IS NULL OR side = ?1)
                       AND (?2 IS NULL OR live = ?2)
                       AND (?3 IS NULL OR status = ?3)
                       AND (?4 IS NULL OR created_at_us < ?4)
                       AND (?5 IS NULL
                            OR MAX(created_at_us, COALESCE(checkout_started_at_us, 0)) < ?5)
                     ORDER BY z_index ASC, created_at_us ASC, seq ASC"
                ))
                .map_err(|e| backend(&e))?;
            let rows = stmt
                .query_map(
                    params![
                        filter.side.map(Side::as_str),
                        filter.live,
                        filter.status.map(PlacementStatus::as_str),
                        filter.created_before.map(|t| t.timestamp_micros()),
                        filter.idle_before.map(|t| t.timestamp_micros()),
                    ],
                    PlacementRow::from_row,
                )
                .map_err(|e| backend(&e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| backend(&e))?
        };
        rows.into_iter().map(PlacementRow::into_placement).collect()
    }

    fn max_z(&self, side: Side) -> Result<i64, StoreError> {
        let conn = lock(&self.conn)?;
        conn.query_row(
            "SELECT COALESCE(MAX(z_index), 0) FROM placements WHERE side = ?1",
            params![side.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| backend(&e))
    }
}

/// Durable [`DeliveryIdStore`] sharing the placement database.
#[derive(Debug, Clone)]
pub struct SqliteDeliveryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDeliveryStore {
    /// Creates a store over an already initialized connection.
    #[must_use]
    pub const fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

impl DeliveryIdStore for SqliteDeliveryStore {
    fn is_processed(&self, event_id: &str) -> Result<bool, StoreError> {
        let conn = lock(&self.conn)?;
        let found = conn
            .query_row(
                "SELECT 1 FROM webhook_deliveries WHERE event_id = ?1",
                params![event_id],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| backend(&e))?;
        Ok(found.unwrap_or(false))
    }

    fn mark_processed(&self, event_id: &str) -> Result<(), StoreError> {
        let conn = lock(&self.conn)?;
        conn.execute(
            "INSERT OR IGNORE INTO webhook_deliveries (event_id, processed_at_us) VALUES (?1, ?2)",
            params![event_id, Utc::now().timestamp_micros()],
        )
        .map_err(|e| backend(&e))?;
        Ok(())
    }
}
