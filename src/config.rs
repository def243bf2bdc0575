use std::path::PathBuf;

use serde::Deserialize;

/// Application-level constants
pub const APP_NAME: &str = "Cadence";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "cadence_lib=debug,info"
    } else {
        "cadence_lib=info,warn"
    }
}

/// Get the application data directory
/// ~/Cadence/ when a home directory is known, the working directory otherwise.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the schedule database
pub fn database_path() -> PathBuf {
    app_data_dir().join("cadence.db")
}

/// Engine-wide tunables. Every field has a default, so a JSON document
/// only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minutes after `scheduled_start` before an occurrence can expire.
    pub grace_window_minutes: i64,
    pub sweep_interval_secs: u64,
    /// Rows claimed per sweep SELECT.
    pub sweep_batch_size: u32,
    pub missed_cap_per_category: usize,
    /// Relative change between window halves that counts as a trend.
    pub trend_tolerance: f64,
    /// How far ahead template creation materializes.
    pub materialize_horizon_days: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grace_window_minutes: 30,
            sweep_interval_secs: 300,
            sweep_batch_size: 500,
            missed_cap_per_category: 50,
            trend_tolerance: 0.05,
            materialize_horizon_days: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_under_app_data() {
        let db = database_path();
        assert!(db.starts_with(app_data_dir()));
        assert!(db.ends_with("cadence.db"));
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"grace_window_minutes": 45}"#).unwrap();
        assert_eq!(config.grace_window_minutes, 45);
        assert_eq!(config.sweep_interval_secs, 300);
        assert_eq!(config.missed_cap_per_category, 50);
    }

    #[test]
    fn empty_json_is_default() {
        assert_eq!(EngineConfig::from_json("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineConfig::from_json(r#"{"sweep_batch_size": "lots"}"#).is_err());
    }
}
