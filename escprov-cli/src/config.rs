//! Configuration file support for escprov.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ESCPROV_*)
//! 3. Local config file (./escprov.toml)
//! 4. Global config file (~/.config/escprov/config.toml)

use directories::ProjectDirs;
use escprov::{
    ProbeEndpoints,
    boot::DEFAULT_BOOT_TIMEOUT,
    fieldbus::DEFAULT_BITRATE,
    firmware::default_firmware_glob,
    oracle::DEFAULT_LICENSING_URL,
    station::DEFAULT_PRODUCT,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-directory config file.
pub const LOCAL_CONFIG_FILE: &str = "escprov.toml";

/// A config file that parsed but holds unusable values.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `station.boot_timeout_secs` is zero.
    #[error("station.boot_timeout_secs must be at least 1")]
    ZeroBootTimeout,
    /// `station.bitrate` is zero.
    #[error("station.bitrate must be positive")]
    ZeroBitrate,
}

/// Station configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StationSection {
    /// Product name, e.g. "io.px4.sapog".
    pub product: Option<String>,
    /// CAN bitrate.
    pub bitrate: Option<u32>,
    /// Soft boot timeout in seconds.
    pub boot_timeout_secs: Option<u64>,
}

/// Debug probe endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSection {
    /// Glob of the GDB server endpoint.
    pub gdb_glob: Option<String>,
    /// Glob of the device CLI endpoint.
    pub cli_glob: Option<String>,
}

/// Firmware source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FirmwareSection {
    /// Remote glob the newest image is looked up from.
    pub glob_url: Option<String>,
}

/// Licensing service access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LicensingSection {
    /// API endpoint.
    pub url: Option<String>,
    /// Account name.
    pub user: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Station settings.
    #[serde(default)]
    pub station: StationSection,
    /// Probe settings.
    #[serde(default)]
    pub probe: ProbeSection,
    /// Firmware settings.
    #[serde(default)]
    pub firmware: FirmwareSection,
    /// Licensing settings.
    #[serde(default)]
    pub licensing: LicensingSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Self>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => Some(config),
                    Err(e) => {
                        warn!("Invalid config file {}: {}", path.display(), e);
                        None
                    },
                },
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Reject values the station cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.station.boot_timeout_secs == Some(0) {
            return Err(ConfigError::ZeroBootTimeout);
        }
        if self.station.bitrate == Some(0) {
            return Err(ConfigError::ZeroBitrate);
        }
        Ok(())
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "escprov").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.station.product, other.station.product);
        take(&mut self.station.bitrate, other.station.bitrate);
        take(
            &mut self.station.boot_timeout_secs,
            other.station.boot_timeout_secs,
        );
        take(&mut self.probe.gdb_glob, other.probe.gdb_glob);
        take(&mut self.probe.cli_glob, other.probe.cli_glob);
        take(&mut self.firmware.glob_url, other.firmware.glob_url);
        take(&mut self.licensing.url, other.licensing.url);
        take(&mut self.licensing.user, other.licensing.user);
    }

    /// Product name, falling back to the default product.
    pub fn product(&self) -> String {
        self.station
            .product
            .clone()
            .unwrap_or_else(|| DEFAULT_PRODUCT.to_string())
    }

    /// CAN bitrate, falling back to the default.
    pub fn bitrate(&self) -> u32 {
        self.station
            .bitrate
            .unwrap_or(DEFAULT_BITRATE)
    }

    /// Soft boot timeout.
    pub fn boot_timeout(&self) -> Duration {
        self.station
            .boot_timeout_secs
            .map_or(DEFAULT_BOOT_TIMEOUT, Duration::from_secs)
    }

    /// Probe endpoints with unset globs left at their defaults.
    pub fn probe_endpoints(&self) -> ProbeEndpoints {
        let defaults = ProbeEndpoints::default();
        ProbeEndpoints {
            gdb_glob: self
                .probe
                .gdb_glob
                .clone()
                .unwrap_or(defaults.gdb_glob),
            cli_glob: self
                .probe
                .cli_glob
                .clone()
                .unwrap_or(defaults.cli_glob),
        }
    }

    /// Firmware lookup glob for `product`.
    pub fn firmware_glob_url(&self, product: &str) -> String {
        self.firmware
            .glob_url
            .clone()
            .unwrap_or_else(|| default_firmware_glob(product))
    }

    /// Licensing API endpoint.
    pub fn licensing_url(&self) -> String {
        self.licensing
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_LICENSING_URL.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.product(), "io.px4.sapog");
        assert_eq!(config.bitrate(), 125_000);
        assert_eq!(config.boot_timeout(), Duration::from_secs(9));
        assert_eq!(config.probe_endpoints(), ProbeEndpoints::default());
        assert_eq!(
            config.firmware_glob_url("io.px4.sapog"),
            "https://files.zubax.com/products/io.px4.sapog/*.compound.bin"
        );
        assert_eq!(config.licensing_url(), DEFAULT_LICENSING_URL);
    }

    #[test]
    fn test_config_merge_overrides() {
        let mut base = Config::default();
        base.station.product = Some("com.zubax.orel".to_string());
        base.station.bitrate = Some(125_000);

        let mut other = Config::default();
        other.station.bitrate = Some(1_000_000);
        other.licensing.user = Some("operator".to_string());

        base.merge(other);

        assert_eq!(base.station.product.as_deref(), Some("com.zubax.orel"));
        assert_eq!(base.bitrate(), 1_000_000);
        assert_eq!(base.licensing.user.as_deref(), Some("operator"));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.probe.gdb_glob = Some("/dev/ttyACM0".to_string());
        base.firmware.glob_url = Some("http://fw.local/*.bin".to_string());

        base.merge(Config::default());

        assert_eq!(base.probe.gdb_glob.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(base.firmware.glob_url.as_deref(), Some("http://fw.local/*.bin"));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[station]
product = "io.px4.sapog"
bitrate = 500000
boot_timeout_secs = 4

[probe]
gdb_glob = "/dev/serial/by-id/*probe*-if00"

[firmware]
glob_url = "http://fw.local/sapog/*.compound.bin"

[licensing]
url = "http://licensing.local/api"
user = "line-3"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.bitrate(), 500_000);
        assert_eq!(config.boot_timeout(), Duration::from_secs(4));

        let endpoints = config.probe_endpoints();
        assert_eq!(endpoints.gdb_glob, "/dev/serial/by-id/*probe*-if00");
        assert_eq!(endpoints.cli_glob, ProbeEndpoints::default().cli_glob);

        assert_eq!(
            config.firmware_glob_url("ignored"),
            "http://fw.local/sapog/*.compound.bin"
        );
        assert_eq!(config.licensing_url(), "http://licensing.local/api");
        assert_eq!(config.licensing.user.as_deref(), Some("line-3"));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.station.product.is_none());
        assert!(config.licensing.url.is_none());
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        fs::write(&path, "[station]\nproduct = \"com.zubax.orel\"\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.product(), "com.zubax.orel");
    }

    #[test]
    fn test_load_from_path_invalid_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        fs::write(&path, "[station\nproduct = 1").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.station.product.is_none());
    }

    #[test]
    fn test_zero_boot_timeout_is_rejected() {
        let config: Config = toml::from_str("[station]\nboot_timeout_secs = 0\n").unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroBootTimeout));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("station.toml");
        fs::write(&path, "[station]\nproduct = \"com.zubax.orel\"\nboot_timeout_secs = 0\n").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.station.product.is_none());
        assert_eq!(config.boot_timeout(), DEFAULT_BOOT_TIMEOUT);
    }

    #[test]
    fn test_positive_values_pass_validation() {
        let config: Config =
            toml::from_str("[station]\nboot_timeout_secs = 1\nbitrate = 1000000\n").unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/escprov.toml"));
        assert!(config.station.bitrate.is_none());
    }

    #[test]
    fn test_global_config_path() {
        // Only meaningful where a home directory exists
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
