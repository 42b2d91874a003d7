//! One CSV file per table: `<directory>/<TABLE>.csv`.

use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use super::frame::{column_names, render_csv};
use super::{SizeGuard, StoreError, StoreResult, TableStore};
use crate::tables::{parse_date, DateWindow, SharadarTable};

pub struct CsvStore {
    dir: PathBuf,
    guard: SizeGuard,
}

impl CsvStore {
    pub fn new(dir: PathBuf, guard: SizeGuard) -> Self {
        Self { dir, guard }
    }

    fn ensure_dir(&self) -> StoreResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))
    }

    /// Header row of an existing file.
    fn read_header(path: &Path) -> StoreResult<Vec<String>> {
        let mut reader = ::csv::Reader::from_path(path).map_err(|e| StoreError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        let headers = reader.headers().map_err(|e| StoreError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(headers.iter().map(str::to_string).collect())
    }

    /// Write to a temp file then rename, so readers never see a half-written file.
    fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
        let tmp_path = path.with_extension("csv.tmp");
        std::fs::write(&tmp_path, bytes).map_err(|e| StoreError::io(&tmp_path, e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| StoreError::io(path, e))
    }
}

impl TableStore for CsvStore {
    fn location(&self, table: &SharadarTable) -> PathBuf {
        self.dir.join(format!("{}.csv", table.name))
    }

    /// Stream the file and keep the largest parseable date in the date column.
    fn watermark(&self, table: &SharadarTable) -> StoreResult<Option<NaiveDate>> {
        let path = self.location(table);
        if !path.exists() {
            return Ok(None);
        }
        let csv_err = |e: ::csv::Error| StoreError::Csv {
            path: path.clone(),
            source: e,
        };

        let mut reader = ::csv::Reader::from_path(&path).map_err(csv_err)?;
        let idx = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .position(|h| h == table.date_column)
            .ok_or_else(|| StoreError::MissingDateColumn {
                path: path.clone(),
                column: table.date_column.to_string(),
            })?;

        let mut latest: Option<NaiveDate> = None;
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            if let Some(date) = record.get(idx).and_then(parse_date) {
                latest = Some(latest.map_or(date, |l| l.max(date)));
            }
        }
        Ok(latest)
    }

    fn replace(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        _window: DateWindow,
    ) -> StoreResult<usize> {
        let path = self.location(table);
        let bytes = render_csv(frame, true)?;
        self.guard.check(&path, bytes.len() as u64)?;
        self.ensure_dir()?;
        Self::write_atomic(&path, &bytes)?;
        tracing::debug!(
            table = table.name,
            path = %path.display(),
            bytes = bytes.len(),
            "Wrote CSV"
        );
        Ok(frame.height())
    }

    fn append(
        &self,
        table: &SharadarTable,
        frame: &mut DataFrame,
        window: DateWindow,
    ) -> StoreResult<usize> {
        let path = self.location(table);
        if !path.exists() {
            return self.replace(table, frame, window);
        }
        if frame.height() == 0 {
            return Ok(0);
        }

        let existing = Self::read_header(&path)?;
        let incoming = column_names(frame);
        if existing != incoming {
            return Err(StoreError::SchemaMismatch {
                path,
                existing: existing.join(","),
                incoming: incoming.join(","),
            });
        }

        let bytes = render_csv(frame, false)?;
        let current = std::fs::metadata(&path)
            .map_err(|e| StoreError::io(&path, e))?
            .len();
        self.guard.check(&path, current + bytes.len() as u64)?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(&bytes).map_err(|e| StoreError::io(&path, e))?;
        tracing::debug!(
            table = table.name,
            path = %path.display(),
            bytes = bytes.len(),
            "Appended CSV"
        );
        Ok(frame.height())
    }
}
