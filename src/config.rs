//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::error::{HorusError, Result};
use crate::payload_list::{PAYLOAD_ID_LIST_SIGNATURE, PAYLOAD_ID_LIST_URL};

/// Summary port value that disables the payload summary channel
pub const SUMMARY_PORT_DISABLED: i32 = -1;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub ozimux: OziMuxConfig,
    #[serde(default)]
    pub habitat: HabitatConfig,
    #[serde(default)]
    pub payload_list: PayloadListConfig,
}

/// Receiving station identity
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default = "default_callsign")]
    pub callsign: String,

    #[serde(default)]
    pub station_lat: f64,

    #[serde(default)]
    pub station_lon: f64,

    #[serde(default)]
    pub radio_comment: String,

    #[serde(default)]
    pub antenna_comment: String,
}

/// UDP ingest socket configuration
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    #[serde(default = "default_input_udp_port")]
    pub udp_port: u16,

    #[serde(default = "default_bind_address")]
    pub bind_address: Ipv4Addr,
}

/// Local UDP fan-out configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OziMuxConfig {
    #[serde(default = "default_ozimux_port")]
    pub ozimux_port: u16,

    /// Payload summary port, -1 to disable
    #[serde(default = "default_summary_port")]
    pub summary_port: i32,

    #[serde(default = "default_broadcast_address")]
    pub broadcast_address: Ipv4Addr,
}

/// Habitat upload configuration
#[derive(Debug, Deserialize, Clone)]
pub struct HabitatConfig {
    #[serde(default = "default_habitat_url")]
    pub url: String,

    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    #[serde(default = "default_upload_timeout_s")]
    pub upload_timeout_s: u64,

    #[serde(default = "default_upload_retries")]
    pub upload_retries: u32,

    #[serde(default = "default_upload_retry_interval_ms")]
    pub upload_retry_interval_ms: u64,

    #[serde(default)]
    pub inhibit: bool,
}

/// Payload ID list source
#[derive(Debug, Deserialize, Clone)]
pub struct PayloadListConfig {
    #[serde(default = "default_payload_list_url")]
    pub url: String,

    #[serde(default = "default_payload_list_file")]
    pub local_file: String,

    #[serde(default = "default_payload_list_signature")]
    pub signature: String,

    #[serde(default = "default_payload_list_update")]
    pub update: bool,
}

// Default value functions
fn default_callsign() -> String { "HORUS_RX".to_string() }

fn default_input_udp_port() -> u16 { 55690 }
fn default_bind_address() -> Ipv4Addr { Ipv4Addr::LOCALHOST }

fn default_ozimux_port() -> u16 { 55683 }
fn default_summary_port() -> i32 { 55672 }
fn default_broadcast_address() -> Ipv4Addr { Ipv4Addr::BROADCAST }

fn default_habitat_url() -> String { "http://habitat.habhub.org/".to_string() }
fn default_queue_size() -> usize { 16 }
fn default_upload_timeout_s() -> u64 { 10 }
fn default_upload_retries() -> u32 { 5 }
fn default_upload_retry_interval_ms() -> u64 { 250 }

fn default_payload_list_url() -> String { PAYLOAD_ID_LIST_URL.to_string() }
fn default_payload_list_file() -> String { "payload_id_list.txt".to_string() }
fn default_payload_list_signature() -> String { PAYLOAD_ID_LIST_SIGNATURE.to_string() }
fn default_payload_list_update() -> bool { true }

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            callsign: default_callsign(),
            station_lat: 0.0,
            station_lon: 0.0,
            radio_comment: String::new(),
            antenna_comment: String::new(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            udp_port: default_input_udp_port(),
            bind_address: default_bind_address(),
        }
    }
}

impl Default for OziMuxConfig {
    fn default() -> Self {
        Self {
            ozimux_port: default_ozimux_port(),
            summary_port: default_summary_port(),
            broadcast_address: default_broadcast_address(),
        }
    }
}

impl Default for HabitatConfig {
    fn default() -> Self {
        Self {
            url: default_habitat_url(),
            queue_size: default_queue_size(),
            upload_timeout_s: default_upload_timeout_s(),
            upload_retries: default_upload_retries(),
            upload_retry_interval_ms: default_upload_retry_interval_ms(),
            inhibit: false,
        }
    }
}

impl Default for PayloadListConfig {
    fn default() -> Self {
        Self {
            url: default_payload_list_url(),
            local_file: default_payload_list_file(),
            signature: default_payload_list_signature(),
            update: default_payload_list_update(),
        }
    }
}

impl OziMuxConfig {
    /// Summary port, or `None` when the summary channel is disabled
    pub fn summary_port(&self) -> Option<u16> {
        u16::try_from(self.summary_port).ok().filter(|port| *port != 0)
    }
}

impl HabitatConfig {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_s)
    }

    pub fn upload_retry_interval(&self) -> Duration {
        Duration::from_millis(self.upload_retry_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use horus_relay::config::Config;
    ///
    /// let config = Config::load("horus_relay.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if self.user.callsign.trim().is_empty() {
            return Err(invalid("user callsign cannot be empty"));
        }

        if !(-90.0..=90.0).contains(&self.user.station_lat) {
            return Err(invalid("station_lat must be between -90.0 and 90.0"));
        }

        if !(-180.0..=180.0).contains(&self.user.station_lon) {
            return Err(invalid("station_lon must be between -180.0 and 180.0"));
        }

        if self.input.udp_port == 0 {
            return Err(invalid("input udp_port must be between 1 and 65535"));
        }

        if self.ozimux.ozimux_port == 0 {
            return Err(invalid("ozimux_port must be between 1 and 65535"));
        }

        if self.ozimux.summary_port != SUMMARY_PORT_DISABLED
            && !(1..=65535).contains(&self.ozimux.summary_port)
        {
            return Err(invalid("summary_port must be -1 (disabled) or between 1 and 65535"));
        }

        if !self.habitat.url.starts_with("http://") && !self.habitat.url.starts_with("https://") {
            return Err(invalid("habitat url must start with http:// or https://"));
        }

        if self.habitat.queue_size == 0 || self.habitat.queue_size > 1024 {
            return Err(invalid("queue_size must be between 1 and 1024"));
        }

        if self.habitat.upload_timeout_s == 0 || self.habitat.upload_timeout_s > 300 {
            return Err(invalid("upload_timeout_s must be between 1 and 300"));
        }

        if self.habitat.upload_retries == 0 || self.habitat.upload_retries > 100 {
            return Err(invalid("upload_retries must be between 1 and 100"));
        }

        if self.habitat.upload_retry_interval_ms > 60000 {
            return Err(invalid("upload_retry_interval_ms must be at most 60000"));
        }

        if self.payload_list.local_file.is_empty() {
            return Err(invalid("payload_list local_file cannot be empty"));
        }

        if self.payload_list.update && self.payload_list.signature.is_empty() {
            return Err(invalid("payload_list signature cannot be empty when update is enabled"));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> HorusError {
    HorusError::Config(toml::de::Error::custom(msg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.user.callsign, "HORUS_RX");
        assert_eq!(config.input.udp_port, 55690);
        assert_eq!(config.ozimux.ozimux_port, 55683);
        assert_eq!(config.ozimux.summary_port(), Some(55672));
        assert_eq!(config.habitat.queue_size, 16);
        assert!(!config.habitat.inhibit);
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let toml_content = r#"
[user]
callsign = "VK5QI"
station_lat = -34.9
station_lon = 138.6
radio_comment = "FT-817"

[input]
udp_port = 7355

[ozimux]
summary_port = -1
broadcast_address = "127.0.0.1"

[habitat]
upload_retries = 3

[payload_list]
update = false
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::load(temp_file.path()).unwrap();
        assert_eq!(config.user.callsign, "VK5QI");
        assert_eq!(config.user.station_lat, -34.9);
        assert_eq!(config.user.radio_comment, "FT-817");
        assert_eq!(config.input.udp_port, 7355);
        assert_eq!(config.input.bind_address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.ozimux.summary_port(), None);
        assert_eq!(config.ozimux.broadcast_address, Ipv4Addr::LOCALHOST);
        assert_eq!(config.habitat.upload_retries, 3);
        assert!(!config.payload_list.update);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            Config::load("/nonexistent/horus_relay.toml"),
            Err(HorusError::Io(_))
        ));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("[user\ncallsign ="),
            Err(HorusError::Config(_))
        ));
    }

    #[test]
    fn test_empty_callsign() {
        let mut config = Config::default();
        config.user.callsign = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_station_position_out_of_range() {
        let mut config = Config::default();
        config.user.station_lat = 91.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.user.station_lon = -180.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_ports() {
        let mut config = Config::default();
        config.input.udp_port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ozimux.ozimux_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_port_values() {
        for (port, valid) in [(-1, true), (1, true), (65535, true), (0, false), (-2, false), (65536, false)] {
            let mut config = Config::default();
            config.ozimux.summary_port = port;
            assert_eq!(config.validate().is_ok(), valid, "summary_port {}", port);
        }
    }

    #[test]
    fn test_habitat_url_scheme() {
        let mut config = Config::default();
        config.habitat.url = "habitat.habhub.org".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_queue_size_zero() {
        let mut config = Config::default();
        config.habitat.queue_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_timeout_range() {
        let mut config = Config::default();
        config.habitat.upload_timeout_s = 0;
        assert!(config.validate().is_err());

        config.habitat.upload_timeout_s = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_upload_retries_zero() {
        let mut config = Config::default();
        config.habitat.upload_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_interval_too_high() {
        let mut config = Config::default();
        config.habitat.upload_retry_interval_ms = 60001;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_signature_with_update() {
        let mut config = Config::default();
        config.payload_list.signature = String::new();
        assert!(config.validate().is_err());

        config.payload_list.update = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_functions() {
        assert_eq!(default_callsign(), "HORUS_RX");
        assert_eq!(default_input_udp_port(), 55690);
        assert_eq!(default_bind_address(), Ipv4Addr::new(127, 0, 0, 1));
        assert_eq!(default_ozimux_port(), 55683);
        assert_eq!(default_summary_port(), 55672);
        assert_eq!(default_broadcast_address(), Ipv4Addr::new(255, 255, 255, 255));
        assert_eq!(default_habitat_url(), "http://habitat.habhub.org/");
        assert_eq!(default_queue_size(), 16);
        assert_eq!(default_upload_timeout_s(), 10);
        assert_eq!(default_upload_retries(), 5);
        assert_eq!(default_upload_retry_interval_ms(), 250);
        assert_eq!(default_payload_list_file(), "payload_id_list.txt");
        assert!(default_payload_list_update());
    }
}
