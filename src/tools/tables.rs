use crate::tables::CATALOG;

use super::response_types::{TableInfo, TablesResponse};

pub fn execute(dataset: &str) -> TablesResponse {
    let tables: Vec<TableInfo> = CATALOG
        .iter()
        .map(|t| TableInfo {
            name: t.name.to_string(),
            date_column: t.date_column.to_string(),
            description: t.description.to_string(),
        })
        .collect();

    TablesResponse {
        summary: format!(
            "{} tables available in {dataset}. Pass names to --tables, or ALL for every table.",
            tables.len()
        ),
        dataset: dataset.to_string(),
        tables,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_whole_catalog() {
        let result = execute("SHARADAR");
        assert_eq!(result.tables.len(), CATALOG.len());
        assert!(result.tables.iter().any(|t| t.name == "SEP" && t.date_column == "date"));
        assert!(result.summary.contains("SHARADAR"));
    }
}
