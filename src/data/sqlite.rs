//! SQLite backend: one database file, one SQL table per Sharadar table.
//!
//! Tables are created from the first frame written to them. Dates are stored
//! as `YYYY-MM-DD` text so `MAX()` and `BETWEEN` compare correctly.

use chrono::{NaiveDate, Utc};
use polars::prelude::*;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use super::frame::{column_names, date_from_days};
use super::{SizeGuard, StoreError, StoreResult, TableStore};
use crate::tables::{parse_date, DateWindow, SharadarTable};

mod embedded {
    refinery::embed_migrations!("migrations");
}

const BUSY_TIMEOUT_SECS: u64 = 60;

/// One row of the `sync_log` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncRecord {
    pub mode: String,
    pub start_date: String,
    pub end_date: String,
    pub rows: i64,
    pub finished_at: String,
}

pub struct SqliteStore {
    path: PathBuf,
    guard: SizeGuard,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply migrations.
    pub fn open(path: PathBuf, guard: SizeGuard) -> StoreResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }
        let store = Self { path, guard };
        let mut conn = store.connect()?;
        let report = embedded::migrations::runner().run(&mut conn)?;
        for migration in report.applied_migrations() {
            tracing::info!(migration = %migration, "Applied database migration");
        }
        Ok(store)
    }

    fn connect(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(conn)
    }

    fn check_size(&self, frame: &DataFrame) -> StoreResult<()> {
        let current = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(StoreError::io(&self.path, e)),
        };
        self.guard
            .check(&self.path, current + frame.estimated_size() as u64)
    }

    /// Write `frame` into `table` and log the sync. With `clear`, rows inside
    /// `window` are deleted first.
    fn write(
        &self,
        table: &SharadarTable,
        frame: &DataFrame,
        window: DateWindow,
        clear: bool,
    ) -> StoreResult<usize> {
        self.check_size(frame)?;

        let mut conn = self.connect()?;
        // IMMEDIATE: the busy timeout only covers a lock taken at BEGIN, not a
        // SHARED -> RESERVED upgrade mid-transaction.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_table(&tx, table, frame)?;

        if clear {
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {} BETWEEN ?1 AND ?2",
                    quote_ident(table.name),
                    quote_ident(table.date_column)
                ),
                params![format_date(window.start), format_date(window.end)],
            )?;
            if deleted > 0 {
                tracing::debug!(table = table.name, deleted, "Cleared rows in download window");
            }
        }

        let rows = insert_frame(&tx, table.name, frame)?;

        tx.execute(
            "INSERT INTO sync_log (table_name, mode, start_date, end_date, rows, finished_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                table.name,
                if clear { "download" } else { "update" },
                format_date(window.start),
                format_date(window.end),
                rows as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        tx.commit()?;
        Ok(rows)
    }
}

impl TableStore for SqliteStore {
    fn location(&self, _table: &SharadarTable) -> PathBuf {
        self.path.clone()
    }

    fn watermark(&self, table: &SharadarTable) -> StoreResult<Option<NaiveDate>> {
        let conn = self.connect()?;
        if !table_exists(&conn, table.name)? {
            return Ok(None);
        }
        let max: Option<String> = conn.query_row(
            &format!(
                "SELECT MAX({}) FROM {}",
                quote_ident(table.date_column),
                quote_ident(table.name)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(max.as_deref().and_then(parse_date))
    }

    fn replace(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        window: DateWindow,
    ) -> StoreResult<usize> {
        self.write(table, frame, window, true)
    }

    fn append(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        window: DateWindow,
    ) -> StoreResult<usize> {
        self.write(table, frame, window, false)
    }

    fn last_sync(&self, table: &SharadarTable) -> StoreResult<Option<SyncRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                "SELECT mode, start_date, end_date, rows, finished_at FROM sync_log \
                 WHERE table_name = ?1 ORDER BY id DESC LIMIT 1",
                params![table.name],
                |row| {
                    Ok(SyncRecord {
                        mode: row.get(0)?,
                        start_date: row.get(1)?,
                        end_date: row.get(2)?,
                        rows: row.get(3)?,
                        finished_at: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn table_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn sql_type(dtype: &DataType) -> &'static str {
    match dtype {
        DataType::Float32 | DataType::Float64 => "REAL",
        DataType::Boolean
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt32
        | DataType::UInt64 => "INTEGER",
        _ => "TEXT",
    }
}

/// Create the table if needed and add any columns it is missing.
fn ensure_table(conn: &Connection, table: &SharadarTable, frame: &DataFrame) -> StoreResult<()> {
    let name = quote_ident(table.name);
    let defs: Vec<String> = frame
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name()), sql_type(c.dtype())))
        .collect();

    if table_exists(conn, table.name)? {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({name})"))?;
        let existing: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        for c in frame.columns() {
            if !existing.iter().any(|e| e == c.name().as_str()) {
                tracing::info!(table = table.name, column = %c.name(), "Adding new column");
                conn.execute(
                    &format!(
                        "ALTER TABLE {name} ADD COLUMN {} {}",
                        quote_ident(c.name()),
                        sql_type(c.dtype())
                    ),
                    [],
                )?;
            }
        }
        return Ok(());
    }

    if defs.is_empty() {
        return Ok(());
    }
    conn.execute(&format!("CREATE TABLE {name} ({})", defs.join(", ")), [])?;
    if frame.column(table.date_column).is_ok() {
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS {} ON {name} ({})",
                quote_ident(&format!("idx_{}_{}", table.name, table.date_column)),
                quote_ident(table.date_column)
            ),
            [],
        )?;
    }
    Ok(())
}

fn sql_value(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Integer(i64::from(b)),
        AnyValue::Int32(v) => Value::Integer(i64::from(v)),
        AnyValue::Int64(v) => Value::Integer(v),
        AnyValue::UInt32(v) => Value::Integer(i64::from(v)),
        AnyValue::UInt64(v) => Value::Integer(v as i64),
        AnyValue::Float32(v) => Value::Real(f64::from(v)),
        AnyValue::Float64(v) => Value::Real(v),
        AnyValue::Date(days) => {
            date_from_days(days).map_or(Value::Null, |d| Value::Text(format_date(d)))
        }
        AnyValue::String(s) => Value::Text(s.to_string()),
        AnyValue::StringOwned(s) => Value::Text(s.to_string()),
        other => Value::Text(other.to_string()),
    }
}

fn insert_frame(conn: &Connection, table: &str, frame: &DataFrame) -> StoreResult<usize> {
    let names = column_names(frame);
    if names.is_empty() || frame.height() == 0 {
        return Ok(0);
    }
    let columns: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
    let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{i}")).collect();
    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        columns.join(", "),
        placeholders.join(", ")
    ))?;

    let cols = frame.columns();
    for i in 0..frame.height() {
        let mut values: Vec<Value> = Vec::with_capacity(cols.len());
        for c in cols {
            values.push(sql_value(c.get(i)?));
        }
        stmt.execute(rusqlite::params_from_iter(values))?;
    }
    Ok(frame.height())
}
