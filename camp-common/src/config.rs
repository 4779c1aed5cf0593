//! Configuration loading and database path resolution
//!
//! Settings are resolved in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is never an error; the compiled defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the database file
pub const DB_ENV_VAR: &str = "CAMP_GROUPING_DB";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CAMP_GROUPING_CONFIG";

const APP_NAME: &str = "camp-grouping";
const CONFIG_FILE: &str = "config.toml";
const DB_FILE: &str = "camp.db";

/// Engine-wide settings
///
/// Per-camp constraints (group count, size, grade spread) live on the camp
/// record itself; these are the knobs that apply to every camp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingSettings {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
    /// Registrations later than this many days before camp start are late,
    /// unless the camp sets its own value
    pub default_late_registration_days: i64,
    /// Largest gap between registration grade and DOB grade for which the
    /// registration grade is still trusted
    pub max_grade_discrepancy: i32,
    /// A run claim older than this is taken to belong to a process that died
    /// mid-run and may be broken by the next run
    pub stale_run_claim_secs: i64,
}

impl Default for GroupingSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: "info".to_string(),
            default_late_registration_days: 14,
            max_grade_discrepancy: 2,
            stale_run_claim_secs: 900,
        }
    }
}

impl GroupingSettings {
    /// Parse settings from TOML text; absent keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: GroupingSettings = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.default_late_registration_days < 0 {
            return Err(Error::Config(format!(
                "default_late_registration_days must be >= 0, got {}",
                self.default_late_registration_days
            )));
        }
        if self.max_grade_discrepancy < 0 {
            return Err(Error::Config(format!(
                "max_grade_discrepancy must be >= 0, got {}",
                self.max_grade_discrepancy
            )));
        }
        if self.stale_run_claim_secs <= 0 {
            return Err(Error::Config(format!(
                "stale_run_claim_secs must be > 0, got {}",
                self.stale_run_claim_secs
            )));
        }
        Ok(())
    }
}

/// Resolve settings following the priority order in the module docs
///
/// `cli_config` names an explicit config file, `cli_db` overrides the
/// database path regardless of where the rest of the settings came from.
pub fn resolve_settings(cli_config: Option<&Path>, cli_db: Option<&Path>) -> Result<GroupingSettings> {
    let explicit_config = cli_config
        .map(Path::to_path_buf)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok().map(PathBuf::from));

    let mut settings = match explicit_config {
        // An explicitly named config file must exist
        Some(path) => GroupingSettings::from_file(&path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
        None => match user_config_path().filter(|p| p.exists()) {
            Some(path) => match GroupingSettings::from_file(&path) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {}", path.display(), e);
                    GroupingSettings::default()
                }
            },
            None => {
                debug!("No config file found, using compiled defaults");
                GroupingSettings::default()
            }
        },
    };

    if let Some(path) = cli_db {
        settings.database_path = path.to_path_buf();
    } else if let Ok(path) = std::env::var(DB_ENV_VAR) {
        settings.database_path = PathBuf::from(path);
    }

    Ok(settings)
}

/// Per-user config file location (`~/.config/camp-grouping/config.toml` on Linux)
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME).join(CONFIG_FILE))
}

/// Get OS-dependent default database path
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_NAME).join(DB_FILE))
        .unwrap_or_else(|| PathBuf::from("./camp_grouping_data").join(DB_FILE))
}
