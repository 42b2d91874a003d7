use anyhow::Result;
use std::path::Path;

use crate::config::{SaveTarget, Settings};
use crate::data::{open_store, TableStore};
use crate::tables::TableSelection;

use super::response_types::{StatusResponse, TableStatus};

fn last_modified(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let datetime: chrono::DateTime<chrono::Utc> = modified.into();
    Some(datetime.to_rfc3339())
}

/// Report what is stored locally for each selected table.
///
/// Never creates files: a missing database is reported as missing rather
/// than opened.
pub fn execute(settings: &Settings, selection: &TableSelection) -> Result<StatusResponse> {
    let save_to = settings.save_to.to_string();

    if settings.save_to == SaveTarget::Db && !settings.db_path().exists() {
        let file_path = settings.db_path().display().to_string();
        let tables = selection
            .tables
            .iter()
            .map(|t| TableStatus {
                table: t.name.to_string(),
                file_path: file_path.clone(),
                exists: false,
                size_bytes: None,
                watermark: None,
                last_modified: None,
                last_sync: None,
                error: None,
            })
            .collect();
        return Ok(StatusResponse {
            summary: format!("No database at {file_path}."),
            save_to,
            tables,
        });
    }

    let store = open_store(settings)?;
    let tables: Vec<TableStatus> = selection
        .tables
        .iter()
        .map(|t| table_status(store.as_ref(), t))
        .collect();

    let stored = tables.iter().filter(|s| s.watermark.is_some()).count();
    let summary = format!(
        "{stored}/{} table(s) have local data in {}.",
        tables.len(),
        settings.output_dir().display()
    );

    Ok(StatusResponse {
        summary,
        save_to,
        tables,
    })
}

fn table_status(store: &dyn TableStore, table: &crate::tables::SharadarTable) -> TableStatus {
    let path = store.location(table);
    let mut errors: Vec<String> = Vec::new();

    let size_bytes = store.size_bytes(table).unwrap_or_else(|e| {
        errors.push(e.to_string());
        None
    });
    let watermark = store.watermark(table).unwrap_or_else(|e| {
        errors.push(e.to_string());
        None
    });
    let last_sync = store.last_sync(table).unwrap_or_else(|e| {
        errors.push(e.to_string());
        None
    });

    TableStatus {
        table: table.name.to_string(),
        file_path: path.display().to_string(),
        exists: size_bytes.is_some(),
        size_bytes,
        watermark: watermark.map(|d| d.format("%Y-%m-%d").to_string()),
        last_modified: last_modified(&path),
        last_sync,
        error: if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, Overrides};

    fn settings(dir: &Path, save_to: SaveTarget) -> Settings {
        Settings::resolve(
            FileConfig::default(),
            &Overrides {
                directory: Some(dir.display().to_string()),
                save_to: Some(save_to),
                ..Default::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn status_of_empty_csv_directory() {
        let dir = tempfile::tempdir().unwrap();
        let sel = TableSelection::parse(&["SEP", "SF1"]).unwrap();
        let result = execute(&settings(dir.path(), SaveTarget::Csv), &sel).unwrap();
        assert_eq!(result.tables.len(), 2);
        assert!(result.tables.iter().all(|t| !t.exists));
        assert!(result.tables[0].file_path.ends_with("SEP.csv"));
        assert!(result.summary.starts_with("0/2"));
    }

    #[test]
    fn status_reads_csv_watermark() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("SEP.csv"),
            "ticker,date,close\nAAPL,2024-03-01,1.0\nAAPL,2024-03-04,1.1\n",
        )
        .unwrap();
        let sel = TableSelection::parse(&["SEP"]).unwrap();
        let result = execute(&settings(dir.path(), SaveTarget::Csv), &sel).unwrap();
        let sep = &result.tables[0];
        assert!(sep.exists);
        assert_eq!(sep.watermark.as_deref(), Some("2024-03-04"));
        assert!(sep.last_modified.is_some());
        assert!(sep.error.is_none());
    }

    #[test]
    fn status_does_not_create_database() {
        let dir = tempfile::tempdir().unwrap();
        let s = settings(dir.path(), SaveTarget::Db);
        let sel = TableSelection::parse(&["SEP"]).unwrap();
        let result = execute(&s, &sel).unwrap();
        assert!(!result.tables[0].exists);
        assert!(!s.db_path().exists());
    }
}
