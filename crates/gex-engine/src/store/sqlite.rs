//! SQLite-backed snapshot store
//!
//! One connection behind a mutex. Every trait call is a single statement (or a
//! short transaction), so holding the lock never spans an await point.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Clock, SnapshotStore};
use crate::error::{GexError, GexResult};
use crate::types::{
    ExpirationType, ExpiryDateSet, GexHistoryRecord, GexPoint, NewHistoryRecord, NewSnapshot,
    OptionChainSnapshot,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> GexResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                GexError::persistence(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| {
            GexError::persistence(format!("Failed to open sqlite at {}: {}", path.display(), e))
        })?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;

        info!("Opened snapshot store at {}", path.display());
        Ok(Self { conn: Mutex::new(conn), clock })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> GexResult<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self { conn: Mutex::new(conn), clock })
    }

    fn conn(&self) -> GexResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GexError::persistence("sqlite connection lock poisoned"))
    }
}

fn migrate(conn: &Connection) -> GexResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS option_chains (
            symbol        TEXT NOT NULL,
            expiry_date   TEXT NOT NULL,
            expiry_type   TEXT NOT NULL,
            option_chain  TEXT NOT NULL,
            spot_price    REAL NOT NULL,
            total_gex     REAL NOT NULL,
            updated_at    INTEGER NOT NULL,
            PRIMARY KEY (symbol, expiry_date)
        );

        CREATE TABLE IF NOT EXISTS option_expiry_dates (
            symbol      TEXT PRIMARY KEY,
            dates       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gex_history (
            id            TEXT PRIMARY KEY,
            symbol        TEXT NOT NULL,
            expiry_date   TEXT NOT NULL,
            expiry_type   TEXT NOT NULL,
            option_chain  TEXT NOT NULL,
            gex_value     REAL NOT NULL,
            spot_price    REAL NOT NULL,
            recorded_at   INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_gex_history_symbol_time
            ON gex_history (symbol, recorded_at);
        ",
    )?;
    Ok(())
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(raw: &str) -> GexResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| GexError::persistence(format!("Invalid stored date {:?}: {}", raw, e)))
}

fn from_millis(millis: i64) -> GexResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| GexError::persistence(format!("Invalid stored timestamp {}", millis)))
}

fn insert_snapshot(
    conn: &Connection,
    snapshot: NewSnapshot,
    updated_at: DateTime<Utc>,
) -> GexResult<OptionChainSnapshot> {
    conn.execute(
        "INSERT INTO option_chains
             (symbol, expiry_date, expiry_type, option_chain, spot_price, total_gex, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(symbol, expiry_date) DO UPDATE SET
             expiry_type = excluded.expiry_type,
             option_chain = excluded.option_chain,
             spot_price = excluded.spot_price,
             total_gex = excluded.total_gex,
             updated_at = excluded.updated_at",
        params![
            snapshot.symbol,
            format_date(snapshot.expiry_date),
            snapshot.expiry_type.as_str(),
            snapshot.option_chain,
            snapshot.spot_price,
            snapshot.total_gex,
            updated_at.timestamp_millis(),
        ],
    )?;

    Ok(OptionChainSnapshot {
        symbol: snapshot.symbol,
        expiry_date: snapshot.expiry_date,
        expiry_type: snapshot.expiry_type,
        option_chain: snapshot.option_chain,
        spot_price: snapshot.spot_price,
        total_gex: snapshot.total_gex,
        updated_at,
    })
}

fn insert_history(
    conn: &Connection,
    record: NewHistoryRecord,
    recorded_at: DateTime<Utc>,
) -> GexResult<GexHistoryRecord> {
    let id = Uuid::new_v4();
    conn.execute(
        "INSERT INTO gex_history
             (id, symbol, expiry_date, expiry_type, option_chain, gex_value, spot_price, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id.to_string(),
            record.symbol,
            format_date(record.expiry_date),
            record.expiry_type.as_str(),
            record.option_chain,
            record.gex_value,
            record.spot_price,
            recorded_at.timestamp_millis(),
        ],
    )?;

    Ok(GexHistoryRecord {
        id,
        symbol: record.symbol,
        expiry_date: record.expiry_date,
        expiry_type: record.expiry_type,
        option_chain: record.option_chain,
        gex_value: record.gex_value,
        spot_price: record.spot_price,
        recorded_at,
    })
}

// Rows come out of rusqlite as plain columns and are validated afterwards so
// decode failures surface as persistence errors.

struct SnapshotRow {
    symbol: String,
    expiry_date: String,
    expiry_type: String,
    option_chain: String,
    spot_price: f64,
    total_gex: f64,
    updated_at: i64,
}

impl SnapshotRow {
    fn into_snapshot(self) -> GexResult<OptionChainSnapshot> {
        Ok(OptionChainSnapshot {
            symbol: self.symbol,
            expiry_date: parse_date(&self.expiry_date)?,
            expiry_type: ExpirationType::parse(&self.expiry_type),
            option_chain: self.option_chain,
            spot_price: self.spot_price,
            total_gex: self.total_gex,
            updated_at: from_millis(self.updated_at)?,
        })
    }
}

struct HistoryRow {
    id: String,
    symbol: String,
    expiry_date: String,
    expiry_type: String,
    option_chain: String,
    gex_value: f64,
    spot_price: f64,
    recorded_at: i64,
}

impl HistoryRow {
    fn into_record(self) -> GexResult<GexHistoryRecord> {
        Ok(GexHistoryRecord {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| GexError::persistence(format!("Invalid history id {:?}: {}", self.id, e)))?,
            symbol: self.symbol,
            expiry_date: parse_date(&self.expiry_date)?,
            expiry_type: ExpirationType::parse(&self.expiry_type),
            option_chain: self.option_chain,
            gex_value: self.gex_value,
            spot_price: self.spot_price,
            recorded_at: from_millis(self.recorded_at)?,
        })
    }
}

impl SnapshotStore for SqliteStore {
    fn get_snapshot(&self, symbol: &str, expiry: NaiveDate) -> GexResult<Option<OptionChainSnapshot>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT symbol, expiry_date, expiry_type, option_chain, spot_price, total_gex, updated_at
                 FROM option_chains WHERE symbol = ?1 AND expiry_date = ?2",
                params![symbol, format_date(expiry)],
                |row| {
                    Ok(SnapshotRow {
                        symbol: row.get(0)?,
                        expiry_date: row.get(1)?,
                        expiry_type: row.get(2)?,
                        option_chain: row.get(3)?,
                        spot_price: row.get(4)?,
                        total_gex: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;

        row.map(SnapshotRow::into_snapshot).transpose()
    }

    fn upsert_snapshot(&self, snapshot: NewSnapshot) -> GexResult<OptionChainSnapshot> {
        let updated_at = self.clock.now();
        let conn = self.conn()?;
        let stored = insert_snapshot(&conn, snapshot, updated_at)?;
        debug!("Upserted snapshot {} {}", stored.symbol, stored.expiry_date);
        Ok(stored)
    }

    fn get_expiry_dates(&self, symbol: &str) -> GexResult<Option<ExpiryDateSet>> {
        let conn = self.conn()?;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT dates, updated_at FROM option_expiry_dates WHERE symbol = ?1",
                params![symbol],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((raw, updated_at)) = row else {
            return Ok(None);
        };

        let dates: Vec<NaiveDate> = serde_json::from_str(&raw)
            .map_err(|e| GexError::persistence(format!("Invalid stored expiry dates for {}: {}", symbol, e)))?;

        Ok(Some(ExpiryDateSet { symbol: symbol.to_string(), dates, updated_at: from_millis(updated_at)? }))
    }

    fn upsert_expiry_dates(&self, symbol: &str, dates: &[NaiveDate]) -> GexResult<ExpiryDateSet> {
        let mut dates = dates.to_vec();
        dates.sort();
        dates.dedup();

        let raw = serde_json::to_string(&dates)
            .map_err(|e| GexError::persistence(format!("Failed to encode expiry dates: {}", e)))?;
        let updated_at = self.clock.now();

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO option_expiry_dates (symbol, dates, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(symbol) DO UPDATE SET dates = excluded.dates, updated_at = excluded.updated_at",
            params![symbol, raw, updated_at.timestamp_millis()],
        )?;

        Ok(ExpiryDateSet { symbol: symbol.to_string(), dates, updated_at })
    }

    fn append_history(&self, record: NewHistoryRecord) -> GexResult<GexHistoryRecord> {
        let recorded_at = self.clock.now();
        let conn = self.conn()?;
        insert_history(&conn, record, recorded_at)
    }

    fn record_collection(&self, snapshot: NewSnapshot) -> GexResult<(OptionChainSnapshot, GexHistoryRecord)> {
        let now = self.clock.now();
        let history = NewHistoryRecord::from(&snapshot);

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let stored = insert_snapshot(&tx, snapshot, now)?;
        let record = insert_history(&tx, history, now)?;
        tx.commit()?;

        debug!("Recorded collection {} {}", stored.symbol, stored.expiry_date);
        Ok((stored, record))
    }

    fn history(&self, symbol: &str, since: Option<DateTime<Utc>>) -> GexResult<Vec<GexHistoryRecord>> {
        let since = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, symbol, expiry_date, expiry_type, option_chain, gex_value, spot_price, recorded_at
             FROM gex_history
             WHERE symbol = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![symbol, since], |row| {
                Ok(HistoryRow {
                    id: row.get(0)?,
                    symbol: row.get(1)?,
                    expiry_date: row.get(2)?,
                    expiry_type: row.get(3)?,
                    option_chain: row.get(4)?,
                    gex_value: row.get(5)?,
                    spot_price: row.get(6)?,
                    recorded_at: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(HistoryRow::into_record).collect()
    }

    fn gex_series(&self, symbol: &str, since: Option<DateTime<Utc>>) -> GexResult<Vec<GexPoint>> {
        let since = since.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT expiry_date, gex_value, spot_price, recorded_at
             FROM gex_history
             WHERE symbol = ?1 AND recorded_at >= ?2
             ORDER BY recorded_at ASC, rowid ASC",
        )?;

        let rows = stmt
            .query_map(params![symbol, since], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(expiry_date, gex_value, spot_price, recorded_at)| {
                Ok(GexPoint {
                    symbol: symbol.to_string(),
                    expiry_date: parse_date(&expiry_date)?,
                    gex_value,
                    spot_price,
                    recorded_at: from_millis(recorded_at)?,
                })
            })
            .collect()
    }
}
