//! Catalog of the Sharadar tables this tool knows how to download.
//!
//! Every table is filtered by one date column on the API side; the same
//! column is used locally to find the watermark for incremental updates.

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate};
use serde::Serialize;

/// Table downloaded when no `--tables` are given.
pub const DEFAULT_TABLE: &str = "DAILY";

/// Keyword that selects every table in the catalog.
pub const ALL_KEYWORD: &str = "ALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SharadarTable {
    pub name: &'static str,
    pub date_column: &'static str,
    pub description: &'static str,
}

pub const CATALOG: &[SharadarTable] = &[
    SharadarTable {
        name: "SF1",
        date_column: "lastupdated",
        description: "Core US Fundamentals",
    },
    SharadarTable {
        name: "DAILY",
        date_column: "lastupdated",
        description: "Daily Metrics",
    },
    SharadarTable {
        name: "SEP",
        date_column: "date",
        description: "Sharadar Equity Prices",
    },
    SharadarTable {
        name: "TICKERS",
        date_column: "lastupdated",
        description: "Tickers and Metadata",
    },
    SharadarTable {
        name: "ACTIONS",
        date_column: "date",
        description: "Corporate Actions",
    },
    SharadarTable {
        name: "EVENTS",
        date_column: "date",
        description: "Core US Fundamental Events",
    },
    SharadarTable {
        name: "SF2",
        date_column: "filingdate",
        description: "Core US Insiders",
    },
    SharadarTable {
        name: "SF3A",
        date_column: "calendardate",
        description: "Core US Institutional Investors Summary by Ticker",
    },
    SharadarTable {
        name: "SF3B",
        date_column: "calendardate",
        description: "Core US Institutional Investors Summary by Investor",
    },
    SharadarTable {
        name: "SFP",
        date_column: "date",
        description: "Sharadar Fund Prices",
    },
    SharadarTable {
        name: "SP500",
        date_column: "date",
        description: "S&P500 Current and Historical Constituents",
    },
];

/// Case-insensitive catalog lookup.
pub fn lookup(name: &str) -> Result<&'static SharadarTable> {
    let upper = name.trim().to_uppercase();
    match CATALOG.iter().find(|t| t.name == upper) {
        Some(table) => Ok(table),
        None => {
            let known: Vec<&str> = CATALOG.iter().map(|t| t.name).collect();
            bail!(
                "Unknown table '{name}'. Known tables: {}",
                known.join(", ")
            )
        }
    }
}

/// Tables chosen on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    pub tables: Vec<&'static SharadarTable>,
    /// Set when the user asked for every table; the caller must confirm first.
    pub requires_confirmation: bool,
}

impl TableSelection {
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        if names.is_empty() {
            return Ok(Self {
                tables: vec![lookup(DEFAULT_TABLE)?],
                requires_confirmation: false,
            });
        }

        if names
            .iter()
            .any(|n| n.as_ref().trim().eq_ignore_ascii_case(ALL_KEYWORD))
        {
            if names.len() > 1 {
                bail!("'{ALL_KEYWORD}' cannot be combined with other table names");
            }
            return Ok(Self {
                tables: CATALOG.iter().collect(),
                requires_confirmation: true,
            });
        }

        let mut tables: Vec<&'static SharadarTable> = Vec::with_capacity(names.len());
        for name in names {
            let table = lookup(name.as_ref())?;
            if !tables.iter().any(|t| t.name == table.name) {
                tables.push(table);
            }
        }
        Ok(Self {
            tables,
            requires_confirmation: false,
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tables.iter().map(|t| t.name).collect()
    }
}

/// Inclusive date range sent to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("start date {start} is after end date {end}");
        }
        Ok(Self { start, end })
    }
}

/// Resolve the filter column and date range for a table.
///
/// Missing bounds fall back to `default_start` and `today`.
pub fn init_dates(
    table: &SharadarTable,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    default_start: NaiveDate,
    today: NaiveDate,
) -> Result<(&'static str, DateWindow)> {
    let start = from.unwrap_or(default_start);
    let end = to.unwrap_or(today);
    Ok((table.date_column, DateWindow::new(start, end)?))
}

/// What an incremental update should fetch given the stored watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePlan {
    Fetch(DateWindow),
    UpToDate { watermark: NaiveDate },
}

/// Work out the update window: the day after the watermark through today.
pub fn plan_update(
    watermark: Option<NaiveDate>,
    default_start: NaiveDate,
    today: NaiveDate,
) -> Result<UpdatePlan> {
    let Some(watermark) = watermark else {
        return Ok(UpdatePlan::Fetch(DateWindow::new(default_start, today)?));
    };
    if watermark > today {
        bail!("stored data ends on {watermark}, which is after today ({today})");
    }
    let start = watermark + Duration::days(1);
    if start > today {
        return Ok(UpdatePlan::UpToDate { watermark });
    }
    Ok(UpdatePlan::Fetch(DateWindow { start, end: today }))
}

/// Parse a `YYYY-MM-DD` date, accepting longer timestamps by their date prefix.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let prefix = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn catalog_contains_expected_tables() {
        for name in [
            "SF1", "SF2", "EVENTS", "SF3A", "SF3B", "SEP", "TICKERS", "DAILY", "SP500",
            "ACTIONS", "SFP",
        ] {
            assert!(lookup(name).is_ok(), "{name} missing from catalog");
        }
        assert!(lookup("SF3").is_err());
    }

    #[test]
    fn date_columns_follow_table_kind() {
        for name in ["ACTIONS", "SEP", "EVENTS", "SFP", "SP500"] {
            assert_eq!(lookup(name).unwrap().date_column, "date");
        }
        for name in ["SF1", "DAILY", "TICKERS"] {
            assert_eq!(lookup(name).unwrap().date_column, "lastupdated");
        }
        for name in ["SF3A", "SF3B"] {
            assert_eq!(lookup(name).unwrap().date_column, "calendardate");
        }
        assert_eq!(lookup("SF2").unwrap().date_column, "filingdate");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("sep").unwrap().name, "SEP");
        let err = lookup("NOPE").unwrap_err().to_string();
        assert!(err.contains("Known tables"));
    }

    #[test]
    fn selection_defaults_to_daily() {
        let sel = TableSelection::parse::<&str>(&[]).unwrap();
        assert_eq!(sel.names(), vec!["DAILY"]);
        assert!(!sel.requires_confirmation);
    }

    #[test]
    fn selection_all_requires_confirmation() {
        let sel = TableSelection::parse(&["all"]).unwrap();
        assert_eq!(sel.tables.len(), CATALOG.len());
        assert!(sel.requires_confirmation);
        assert!(TableSelection::parse(&["ALL", "SEP"]).is_err());
    }

    #[test]
    fn selection_dedups_and_keeps_order() {
        let sel = TableSelection::parse(&["SEP", "actions", "SEP"]).unwrap();
        assert_eq!(sel.names(), vec!["SEP", "ACTIONS"]);
    }

    #[test]
    fn init_dates_defaults() {
        let table = lookup("ACTIONS").unwrap();
        let today = date(2024, 6, 1);
        let (column, window) = init_dates(table, None, None, date(2000, 1, 1), today).unwrap();
        assert_eq!(column, "date");
        assert_eq!(window.start, date(2000, 1, 1));
        assert_eq!(window.end, today);
    }

    #[test]
    fn init_dates_explicit_range() {
        let table = lookup("ACTIONS").unwrap();
        let (_, window) = init_dates(
            table,
            Some(date(2020, 1, 1)),
            Some(date(2020, 2, 1)),
            date(2000, 1, 1),
            date(2024, 6, 1),
        )
        .unwrap();
        assert_eq!(window.start, date(2020, 1, 1));
        assert_eq!(window.end, date(2020, 2, 1));
    }

    #[test]
    fn init_dates_rejects_inverted_range() {
        let table = lookup("SEP").unwrap();
        let result = init_dates(
            table,
            Some(date(2020, 3, 1)),
            Some(date(2020, 2, 1)),
            date(2000, 1, 1),
            date(2024, 6, 1),
        );
        assert!(result.is_err());
    }

    #[test]
    fn update_starts_day_after_watermark() {
        let plan = plan_update(Some(date(2024, 5, 20)), date(2000, 1, 1), date(2024, 6, 1)).unwrap();
        assert_eq!(
            plan,
            UpdatePlan::Fetch(DateWindow {
                start: date(2024, 5, 21),
                end: date(2024, 6, 1)
            })
        );
    }

    #[test]
    fn update_on_watermark_yesterday_fetches_today() {
        let plan = plan_update(Some(date(2024, 5, 31)), date(2000, 1, 1), date(2024, 6, 1)).unwrap();
        assert_eq!(
            plan,
            UpdatePlan::Fetch(DateWindow {
                start: date(2024, 6, 1),
                end: date(2024, 6, 1)
            })
        );
    }

    #[test]
    fn update_with_watermark_today_is_up_to_date() {
        let plan = plan_update(Some(date(2024, 6, 1)), date(2000, 1, 1), date(2024, 6, 1)).unwrap();
        assert_eq!(
            plan,
            UpdatePlan::UpToDate {
                watermark: date(2024, 6, 1)
            }
        );
    }

    #[test]
    fn update_rejects_future_watermark() {
        assert!(plan_update(Some(date(2024, 6, 2)), date(2000, 1, 1), date(2024, 6, 1)).is_err());
    }

    #[test]
    fn update_without_watermark_uses_default_start() {
        let plan = plan_update(None, date(2000, 1, 1), date(2024, 6, 1)).unwrap();
        assert_eq!(
            plan,
            UpdatePlan::Fetch(DateWindow {
                start: date(2000, 1, 1),
                end: date(2024, 6, 1)
            })
        );
    }

    #[test]
    fn parse_date_accepts_timestamps() {
        assert_eq!(parse_date("2024-01-05"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date("2024-01-05 00:00:00"), Some(date(2024, 1, 5)));
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("n/a"), None);
    }
}
