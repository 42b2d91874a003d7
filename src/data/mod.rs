pub mod csv_store;
pub mod frame;
pub mod nasdaq;
pub mod sqlite;

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{SaveTarget, Settings};
use crate::tables::{DateWindow, SharadarTable};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(
        "refusing to write {}: size would be {size} bytes, over the {limit} byte limit \
         (raise max_file_size_mb or set it to 0 to disable the check)",
        .path.display()
    )]
    SizeLimitExceeded {
        path: PathBuf,
        size: u64,
        limit: u64,
    },

    #[error(
        "column mismatch for {}: file has [{existing}], new data has [{incoming}]",
        .path.display()
    )]
    SchemaMismatch {
        path: PathBuf,
        existing: String,
        incoming: String,
    },

    #[error("{} has no '{column}' column to read the latest date from", .path.display())]
    MissingDateColumn { path: PathBuf, column: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),

    #[error("dataframe error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Rejects writes that would push an output file past a byte limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeGuard {
    /// 0 disables the check.
    pub max_bytes: u64,
}

impl SizeGuard {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn unlimited() -> Self {
        Self { max_bytes: 0 }
    }

    pub fn check(&self, path: &Path, projected: u64) -> StoreResult<()> {
        if self.max_bytes > 0 && projected > self.max_bytes {
            return Err(StoreError::SizeLimitExceeded {
                path: path.to_path_buf(),
                size: projected,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }
}

/// Local destination for downloaded tables.
///
/// Implementations do blocking I/O; async callers go through
/// `tokio::task::spawn_blocking`.
pub trait TableStore: Send + Sync {
    /// File that holds this table's data.
    fn location(&self, table: &SharadarTable) -> PathBuf;

    /// Latest value of the table's date column, or `None` if nothing is stored.
    fn watermark(&self, table: &SharadarTable) -> StoreResult<Option<NaiveDate>>;

    /// Replace the stored rows covered by `window` with `frame`. Returns rows written.
    fn replace(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        window: DateWindow,
    ) -> StoreResult<usize>;

    /// Append `frame` after the existing rows. Returns rows written.
    fn append(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        window: DateWindow,
    ) -> StoreResult<usize>;

    /// Size in bytes of the table's file, if it exists.
    fn size_bytes(&self, table: &SharadarTable) -> StoreResult<Option<u64>> {
        let path = self.location(table);
        match std::fs::metadata(&path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Most recent recorded sync for this table, when the backend keeps a log.
    fn last_sync(&self, _table: &SharadarTable) -> StoreResult<Option<sqlite::SyncRecord>> {
        Ok(None)
    }
}

/// Build the store selected by the settings.
pub fn open_store(settings: &Settings) -> StoreResult<Arc<dyn TableStore>> {
    let guard = SizeGuard::new(settings.max_file_size_bytes());
    let store: Arc<dyn TableStore> = match settings.save_to {
        SaveTarget::Csv => Arc::new(csv_store::CsvStore::new(settings.output_dir(), guard)),
        SaveTarget::Db => Arc::new(sqlite::SqliteStore::open(settings.db_path(), guard)?),
    };
    Ok(store)
}
