use crate::providers::Accuracy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub location: LocationConfig,
    pub gps: GpsConfig,
    pub providers: ProvidersConfig,
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub ui: UiConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocationConfig {
    pub refresh_interval_seconds: u64, // Background refresh period
    pub last_location_ttl_seconds: u64, // Older cached fixes are logged as stale
    pub search_radius_km: f64,        // Radius handed to search and ranking
    pub locale: Option<String>,       // Overrides LC_ALL/LC_MESSAGES/LANG for the region fallback
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GpsConfig {
    pub enabled: bool,
    pub gpsd_address: String,
    pub accuracy: Accuracy,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    pub ip_endpoint: String,
    pub country_endpoint: String,
    pub request_timeout_seconds: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub cities_ttl_hours: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct UiConfig {
    pub tick_rate_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 300,
            last_location_ttl_seconds: 300,
            search_radius_km: 50.0,
            locale: None,
        }
    }
}

impl Default for GpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gpsd_address: "127.0.0.1:2947".to_string(),
            accuracy: Accuracy::Balanced,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            ip_endpoint: "https://ipapi.co/json/".to_string(),
            country_endpoint: "https://restcountries.com/v3.1/alpha".to_string(),
            request_timeout_seconds: 10,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            cities_ttl_hours: 24,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: "swapmeet.db".to_string(),
        }
    }
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { tick_rate_ms: 150 }
    }
}

impl Config {
    /// Loads config.toml from the working directory.
    pub fn load() -> Self {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads the config at `path`.
    /// If it doesn't exist, writes the defaults there; if it doesn't parse,
    /// uses the defaults and leaves the file alone.
    pub fn load_from(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        if let Ok(content) = fs::read_to_string(path) {
            match toml::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    return Config::default();
                }
            }
        }

        let default_config = Config::default();

        // Save default config to disk for the user to edit later
        match toml::to_string_pretty(&default_config) {
            Ok(toml_string) => {
                if fs::write(path, toml_string).is_err() {
                    warn!("Could not write default {} to disk.", path.display());
                }
            }
            Err(e) => warn!("Could not serialize default config: {}", e),
        }

        info!("Loaded default configuration.");
        default_config
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.location.refresh_interval_seconds.max(1))
    }

    pub fn last_location_ttl(&self) -> Duration {
        Duration::from_secs(self.location.last_location_ttl_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.providers.request_timeout_seconds.max(1))
    }

    pub fn cities_ttl(&self) -> Duration {
        Duration::from_secs(self.api.cities_ttl_hours.saturating_mul(60 * 60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert!(path.exists());

        // The written file round-trips.
        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[location]\nrefresh_interval_seconds = 60\n\n[gps]\nenabled = false\naccuracy = \"high\"\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.location.search_radius_km, 50.0);
        assert!(!config.gps.enabled);
        assert_eq!(config.gps.accuracy, Accuracy::High);
        assert_eq!(config.gps.gpsd_address, "127.0.0.1:2947");
        assert_eq!(config.cities_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn malformed_file_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[location\nbroken").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert_eq!(fs::read_to_string(&path).unwrap(), "[location\nbroken");
    }

    #[test]
    fn out_of_range_durations_are_clamped() {
        let mut config = Config::default();
        config.providers.request_timeout_seconds = 0;
        config.api.cities_ttl_hours = u64::MAX;

        assert_eq!(config.request_timeout(), Duration::from_secs(1));
        assert_eq!(config.cities_ttl(), Duration::from_secs(u64::MAX));
    }
}
