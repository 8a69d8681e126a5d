use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chart::ChartLayout;
use crate::error::{DashboardError, Result};
use crate::session::ExpiryBoundary;

lazy_static! {
    static ref DURATION_REGEX: Regex =
        Regex::new(r"^\s*([0-9]+(?:\.[0-9]+)?)\s*(h|hr|hours?|m|min|minutes?|s|sec|seconds?)\s*$")
            .unwrap();
}

/// Worksheet the production summary is expected on
pub const DEFAULT_WORKSHEET: &str = "POWERBI SUMMARY";

/// File name of the single upload slot inside `data_dir`
pub const UPLOAD_FILE_NAME: &str = "current_upload.xlsx";

/// Runtime configuration for the dashboard pipeline
///
/// Every field has a default, so an empty JSON object (or no file at all)
/// is a valid configuration. Environment variables prefixed with
/// `PRODBOARD_` override whatever the file provides.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Directory holding the upload slot
    pub data_dir: PathBuf,

    /// Worksheet to read the production records from
    pub worksheet: String,

    /// Read the first worksheet when `worksheet` is absent instead of failing
    pub fallback_to_first_sheet: bool,

    /// How long an upload stays valid
    #[serde(deserialize_with = "deserialize_duration")]
    pub expiry: Duration,

    /// Whether an upload is still valid at exactly `expiry` elapsed
    pub expiry_boundary: ExpiryBoundary,

    /// Period of the passive refresh pass in the web server; never zero
    #[serde(deserialize_with = "deserialize_refresh_interval")]
    pub refresh_interval: Duration,

    /// How chart series are split when several machines are selected
    pub chart_layout: ChartLayout,

    /// Argon2 PHC hash gating upload and reset; no gate when unset
    pub admin_password_hash: Option<String>,

    /// Address the web server listens on
    pub bind_addr: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            worksheet: DEFAULT_WORKSHEET.to_string(),
            fallback_to_first_sheet: true,
            expiry: Duration::from_secs(16 * 60 * 60),
            expiry_boundary: ExpiryBoundary::Inclusive,
            refresh_interval: Duration::from_secs(5 * 60),
            chart_layout: ChartLayout::Aggregate,
            admin_password_hash: None,
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl DashboardConfig {
    /// Path of the single upload slot
    pub fn upload_path(&self) -> PathBuf {
        self.data_dir.join(UPLOAD_FILE_NAME)
    }

    /// Expiry window as a chrono duration, for arithmetic against timestamps
    pub fn expiry_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.expiry).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
    }

    /// Load a configuration file written as JSON
    ///
    /// # Arguments
    /// * `path` - Path to the JSON file
    ///
    /// # Returns
    /// * `Result<DashboardConfig>` - The parsed configuration or a `Config` error
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DashboardError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| DashboardError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Build the configuration the binaries run with
    ///
    /// Reads the file named by `PRODBOARD_CONFIG` when set, then applies the
    /// remaining `PRODBOARD_*` environment overrides.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("PRODBOARD_CONFIG") {
            Ok(path) => Self::from_json_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `PRODBOARD_*` overrides obtained through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PRODBOARD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(sheet) = lookup("PRODBOARD_WORKSHEET") {
            self.worksheet = sheet;
        }
        if let Some(flag) = lookup("PRODBOARD_FALLBACK") {
            self.fallback_to_first_sheet = parse_bool(&flag)?;
        }
        if let Some(expiry) = lookup("PRODBOARD_EXPIRY") {
            self.expiry = parse_duration(&expiry)?;
        }
        if let Some(boundary) = lookup("PRODBOARD_EXPIRY_BOUNDARY") {
            self.expiry_boundary = boundary.parse()?;
        }
        if let Some(refresh) = lookup("PRODBOARD_REFRESH") {
            self.refresh_interval = parse_refresh_interval(&refresh)?;
        }
        if let Some(layout) = lookup("PRODBOARD_CHART_LAYOUT") {
            self.chart_layout = layout.parse()?;
        }
        if let Some(hash) = lookup("PRODBOARD_ADMIN_HASH") {
            self.admin_password_hash = if hash.trim().is_empty() { None } else { Some(hash) };
        }
        if let Some(addr) = lookup("PRODBOARD_BIND") {
            self.bind_addr = addr;
        }
        Ok(())
    }
}

/// Parse a human duration such as `16h`, `90m`, `1.5h` or `30s`
///
/// # Examples
/// ```
/// use prodboard::config::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("16h").unwrap(), Duration::from_secs(16 * 3600));
/// assert_eq!(parse_duration("5 min").unwrap(), Duration::from_secs(300));
/// ```
pub fn parse_duration(text: &str) -> Result<Duration> {
    let caps = DURATION_REGEX
        .captures(text)
        .ok_or_else(|| DashboardError::Config(format!("invalid duration '{}'", text)))?;

    let amount: f64 = caps[1]
        .parse()
        .map_err(|_| DashboardError::Config(format!("invalid duration '{}'", text)))?;
    let unit_secs = match &caps[2][..1] {
        "h" => 3600.0,
        "m" => 60.0,
        _ => 1.0,
    };

    Duration::try_from_secs_f64(amount * unit_secs)
        .map_err(|_| DashboardError::Config(format!("duration '{}' out of range", text)))
}

/// Like [`parse_duration`], but a zero period is rejected
fn parse_refresh_interval(text: &str) -> Result<Duration> {
    let period = parse_duration(text)?;
    if period.is_zero() {
        return Err(DashboardError::Config(format!(
            "refresh interval must be positive, got '{}'",
            text
        )));
    }
    Ok(period)
}

fn parse_bool(text: &str) -> Result<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DashboardError::Config(format!("invalid boolean '{}'", other))),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_duration(&text).map_err(serde::de::Error::custom)
}

fn deserialize_refresh_interval<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_refresh_interval(&text).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("16h").unwrap(), Duration::from_secs(57_600));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration("90m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_duration(" 30 seconds ").unwrap(), Duration::from_secs(30));
        assert!(parse_duration("16").is_err());
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn defaults_match_dashboard_conventions() {
        let config = DashboardConfig::default();
        assert_eq!(config.worksheet, "POWERBI SUMMARY");
        assert_eq!(config.expiry, Duration::from_secs(16 * 3600));
        assert_eq!(config.refresh_interval, Duration::from_secs(300));
        assert_eq!(config.expiry_boundary, ExpiryBoundary::Inclusive);
        assert_eq!(config.chart_layout, ChartLayout::Aggregate);
        assert!(config.fallback_to_first_sheet);
        assert!(config.admin_password_hash.is_none());
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config: DashboardConfig = serde_json::from_str(
            r#"{"expiry": "8h", "chart_layout": "per_machine", "expiry_boundary": "exclusive"}"#,
        )
        .unwrap();
        assert_eq!(config.expiry, Duration::from_secs(8 * 3600));
        assert_eq!(config.chart_layout, ChartLayout::PerMachine);
        assert_eq!(config.expiry_boundary, ExpiryBoundary::Exclusive);
        assert_eq!(config.worksheet, DEFAULT_WORKSHEET);
    }

    #[test]
    fn environment_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PRODBOARD_DATA_DIR", "/tmp/board"),
            ("PRODBOARD_EXPIRY", "2h"),
            ("PRODBOARD_FALLBACK", "no"),
            ("PRODBOARD_ADMIN_HASH", ""),
        ]
        .into_iter()
        .collect();

        let mut config = DashboardConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.upload_path(), PathBuf::from("/tmp/board").join(UPLOAD_FILE_NAME));
        assert_eq!(config.expiry, Duration::from_secs(7200));
        assert!(!config.fallback_to_first_sheet);
        assert!(config.admin_password_hash.is_none());
    }

    #[test]
    fn bad_override_is_a_config_error() {
        let mut config = DashboardConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PRODBOARD_EXPIRY").then(|| "forever".to_string()))
            .unwrap_err();
        assert!(matches!(err, DashboardError::Config(_)));
    }

    #[test]
    fn zero_refresh_interval_is_rejected() {
        assert!(serde_json::from_str::<DashboardConfig>(r#"{"refresh_interval": "0s"}"#).is_err());

        let mut config = DashboardConfig::default();
        let err = config
            .apply_overrides(|key| (key == "PRODBOARD_REFRESH").then(|| "0m".to_string()))
            .unwrap_err();
        assert!(matches!(err, DashboardError::Config(_)));
        assert_eq!(config.refresh_interval, Duration::from_secs(300));

        let config: DashboardConfig =
            serde_json::from_str(r#"{"refresh_interval": "30s"}"#).unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(30));
    }
}
