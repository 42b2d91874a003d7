//! Runtime settings: built-in defaults, overlaid by an optional TOML file,
//! overlaid by command-line flags.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "sharadar.toml";
pub const DEFAULT_BASE_URL: &str = "https://data.nasdaq.com/api/v3/datatables";
pub const API_KEY_ENV: &str = "NASDAQ_DATA_LINK_API_KEY";
pub const LEGACY_API_KEY_ENV: &str = "QUANDL_API_KEY";

/// Where downloaded tables are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SaveTarget {
    Csv,
    Db,
}

impl std::fmt::Display for SaveTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => f.write_str("csv"),
            Self::Db => f.write_str("db"),
        }
    }
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct Settings {
    #[garde(length(min = 1))]
    pub directory: String,
    #[garde(length(min = 1), pattern(r"^[A-Za-z0-9._-]+$"))]
    pub save_name: String,
    #[garde(skip)]
    pub save_to: SaveTarget,
    #[garde(length(min = 1), pattern(r"^[A-Za-z0-9_]+$"))]
    pub dataset: String,
    #[garde(pattern(r"^https?://"))]
    pub base_url: String,
    #[garde(range(min = 1, max = 16))]
    pub threads: usize,
    #[garde(range(min = 1, max = 1000))]
    pub display_rows: usize,
    #[garde(skip)]
    pub print: bool,
    /// Output size limit in MiB; 0 disables the check.
    #[garde(skip)]
    pub max_file_size_mb: u64,
    #[garde(length(min = 1))]
    pub key_file: String,
    #[garde(skip)]
    pub default_start: NaiveDate,
    #[garde(range(max = 10))]
    pub max_retries: u32,
    #[garde(range(min = 1))]
    pub retry_base_ms: u64,
    #[garde(skip)]
    pub min_request_interval_ms: u64,
    #[garde(range(min = 1, max = 10000))]
    pub per_page: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            directory: "data".to_string(),
            save_name: "sharadar".to_string(),
            save_to: SaveTarget::Csv,
            dataset: "SHARADAR".to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            threads: 2,
            display_rows: 5,
            print: true,
            max_file_size_mb: 2048,
            key_file: "key.txt".to_string(),
            default_start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
            max_retries: 5,
            retry_base_ms: 1000,
            min_request_interval_ms: 100,
            per_page: 10_000,
        }
    }
}

/// Optional values read from the TOML config file.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub directory: Option<String>,
    pub save_name: Option<String>,
    pub save_to: Option<SaveTarget>,
    pub dataset: Option<String>,
    pub base_url: Option<String>,
    pub threads: Option<usize>,
    pub display_rows: Option<usize>,
    pub print: Option<bool>,
    pub max_file_size_mb: Option<u64>,
    pub key_file: Option<String>,
    pub default_start: Option<NaiveDate>,
    pub max_retries: Option<u32>,
    pub retry_base_ms: Option<u64>,
    pub min_request_interval_ms: Option<u64>,
    pub per_page: Option<u32>,
}

impl FileConfig {
    /// Load the config file.
    ///
    /// An explicit path must exist; the default `sharadar.toml` is optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }
}

/// Flag values that override the file; `None` leaves the lower layer in place.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub directory: Option<String>,
    pub save_name: Option<String>,
    pub save_to: Option<SaveTarget>,
    pub threads: Option<usize>,
    pub display_rows: Option<usize>,
    pub no_print: bool,
}

impl Settings {
    pub fn resolve(file: FileConfig, overrides: &Overrides) -> Result<Self> {
        let d = Self::default();
        let settings = Self {
            directory: overrides
                .directory
                .clone()
                .or(file.directory)
                .unwrap_or(d.directory),
            save_name: overrides
                .save_name
                .clone()
                .or(file.save_name)
                .unwrap_or(d.save_name),
            save_to: overrides.save_to.or(file.save_to).unwrap_or(d.save_to),
            dataset: file.dataset.unwrap_or(d.dataset).to_uppercase(),
            base_url: file
                .base_url
                .unwrap_or(d.base_url)
                .trim_end_matches('/')
                .to_string(),
            threads: overrides.threads.or(file.threads).unwrap_or(d.threads),
            display_rows: overrides
                .display_rows
                .or(file.display_rows)
                .unwrap_or(d.display_rows),
            print: !overrides.no_print && file.print.unwrap_or(d.print),
            max_file_size_mb: file.max_file_size_mb.unwrap_or(d.max_file_size_mb),
            key_file: file.key_file.unwrap_or(d.key_file),
            default_start: file.default_start.unwrap_or(d.default_start),
            max_retries: file.max_retries.unwrap_or(d.max_retries),
            retry_base_ms: file.retry_base_ms.unwrap_or(d.retry_base_ms),
            min_request_interval_ms: file
                .min_request_interval_ms
                .unwrap_or(d.min_request_interval_ms),
            per_page: file.per_page.unwrap_or(d.per_page),
        };
        settings
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid settings: {e}"))?;
        Ok(settings)
    }

    /// Output directory with `~` expanded.
    pub fn output_dir(&self) -> PathBuf {
        expand_path(&self.directory)
    }

    /// Path of the SQLite database used with `--save-to db`.
    pub fn db_path(&self) -> PathBuf {
        self.output_dir().join(format!("{}.db", self.save_name))
    }

    pub fn key_file_path(&self) -> PathBuf {
        expand_path(&self.key_file)
    }

    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Find the API key: explicit flag, then environment, then the key file.
pub fn resolve_api_key(flag: Option<&str>, key_file: &Path) -> Result<String> {
    if let Some(key) = flag.map(str::trim).filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }
    for var in [API_KEY_ENV, LEGACY_API_KEY_ENV] {
        if let Ok(key) = std::env::var(var) {
            let key = key.trim();
            if !key.is_empty() {
                tracing::debug!("Using API key from {var}");
                return Ok(key.to_string());
            }
        }
    }
    if key_file.exists() {
        let text = std::fs::read_to_string(key_file)
            .with_context(|| format!("Failed to read key file: {}", key_file.display()))?;
        if let Some(key) = text.lines().next().map(str::trim).filter(|k| !k.is_empty()) {
            tracing::debug!(path = %key_file.display(), "Using API key from key file");
            return Ok(key.to_string());
        }
    }
    bail!(
        "No API key found. Pass --key, set {API_KEY_ENV}, or store one with \
         `sharadar-sync key <KEY>` (writes {}).",
        key_file.display()
    )
}

/// Write the API key to the key file, readable only by the owner on Unix.
pub fn store_api_key(key: &str, key_file: &Path) -> Result<()> {
    let key = key.trim();
    if key.is_empty() {
        bail!("API key must not be empty");
    }
    if let Some(parent) = key_file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(key_file, format!("{key}\n"))
        .with_context(|| format!("Failed to write key file: {}", key_file.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_file, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("Failed to restrict permissions on {}", key_file.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::resolve(FileConfig::default(), &Overrides::default()).unwrap();
        assert_eq!(settings.directory, "data");
        assert_eq!(settings.save_to, SaveTarget::Csv);
        assert_eq!(settings.threads, 2);
        assert!(settings.print);
        assert_eq!(
            settings.default_start,
            NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()
        );
    }

    #[test]
    fn flags_override_file() {
        let file: FileConfig = toml::from_str(
            r#"
            directory = "from_file"
            threads = 4
            save_to = "db"
            print = true
            "#,
        )
        .unwrap();
        let overrides = Overrides {
            directory: Some("from_flag".into()),
            no_print: true,
            ..Default::default()
        };
        let settings = Settings::resolve(file, &overrides).unwrap();
        assert_eq!(settings.directory, "from_flag");
        assert_eq!(settings.threads, 4);
        assert_eq!(settings.save_to, SaveTarget::Db);
        assert!(!settings.print);
    }

    #[test]
    fn unknown_config_keys_rejected() {
        let parsed: Result<FileConfig, _> = toml::from_str("colour = \"blue\"");
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_thread_count_rejected() {
        let overrides = Overrides {
            threads: Some(0),
            ..Default::default()
        };
        let err = Settings::resolve(FileConfig::default(), &overrides).unwrap_err();
        assert!(err.to_string().contains("Invalid settings"));
    }

    #[test]
    fn save_name_cannot_escape_directory() {
        let overrides = Overrides {
            save_name: Some("../evil".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(FileConfig::default(), &overrides).is_err());
    }

    #[test]
    fn db_path_joins_directory_and_name() {
        let overrides = Overrides {
            directory: Some("data".into()),
            save_name: Some("mytest".into()),
            save_to: Some(SaveTarget::Db),
            ..Default::default()
        };
        let settings = Settings::resolve(FileConfig::default(), &overrides).unwrap();
        assert_eq!(settings.db_path(), PathBuf::from("data/mytest.db"));
    }

    #[test]
    fn output_dir_keeps_last_component() {
        let overrides = Overrides {
            directory: Some("testing".into()),
            ..Default::default()
        };
        let settings = Settings::resolve(FileConfig::default(), &overrides).unwrap();
        assert_eq!(settings.output_dir().file_name().unwrap(), "testing");
    }

    #[test]
    fn explicit_key_wins() {
        let key = resolve_api_key(Some("  abc  "), Path::new("/nonexistent/key.txt")).unwrap();
        assert_eq!(key, "abc");
    }

    #[test]
    fn key_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("key.txt");
        store_api_key("secret-key", &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.trim(), "secret-key");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn empty_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_api_key("   ", &dir.path().join("key.txt")).is_err());
    }

    // Only test that sets the API key variables (process-global).
    #[test]
    fn key_lookup_order_env_then_legacy_env_then_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_file = dir.path().join("key.txt");
        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(LEGACY_API_KEY_ENV);

        let err = resolve_api_key(None, &key_file).unwrap_err().to_string();
        assert!(err.contains("No API key found"));
        assert!(err.contains(API_KEY_ENV));

        std::fs::write(&key_file, "  from-file  \nsecond-line\n").unwrap();
        assert_eq!(resolve_api_key(None, &key_file).unwrap(), "from-file");

        std::env::set_var(LEGACY_API_KEY_ENV, "from-legacy");
        assert_eq!(resolve_api_key(None, &key_file).unwrap(), "from-legacy");

        std::env::set_var(API_KEY_ENV, "from-env");
        assert_eq!(resolve_api_key(None, &key_file).unwrap(), "from-env");
        assert_eq!(resolve_api_key(Some("from-flag"), &key_file).unwrap(), "from-flag");

        // Blank values fall through to the next source.
        std::env::set_var(API_KEY_ENV, "   ");
        assert_eq!(resolve_api_key(None, &key_file).unwrap(), "from-legacy");

        std::env::remove_var(API_KEY_ENV);
        std::env::remove_var(LEGACY_API_KEY_ENV);
    }
}
