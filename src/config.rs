//! Agent configuration
//!
//! Every value the device used to carry as a compiled-in constant lives here.
//! `AgentConfig::default()` reproduces those constants; a TOML file can
//! override any subset of them.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Time kept free between a full-length link connect and the watchdog deadline
pub const LINK_WATCHDOG_MARGIN_MS: u64 = 500;

/// Passphrase variable read when no passphrase source is configured
pub const DEFAULT_PASSPHRASE_ENV: &str = "LUXAGENT_WIFI_PASSPHRASE";

/// Main agent configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AgentConfig {
    pub wifi: WifiSection,
    pub mqtt: MqttSection,
    pub sensor: SensorSection,
    pub actuator: ActuatorSection,
    pub timing: TimingSection,
}

/// Wireless network section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WifiSection {
    /// Network name
    pub ssid: String,
    /// WPA2-PSK passphrase given inline
    pub passphrase: Option<String>,
    /// Environment variable containing the passphrase (used when `passphrase` is unset).
    /// Must be set when configured; with neither field set, `LUXAGENT_WIFI_PASSPHRASE`
    /// is read if present and an open network is assumed otherwise.
    pub passphrase_env: Option<String>,
    /// Timeout for one blocking association attempt
    pub connect_timeout_ms: u64,
    /// Address used to ask the host routing table whether the link is up (no traffic is sent)
    pub route_probe: SocketAddr,
}

impl Default for WifiSection {
    fn default() -> Self {
        Self {
            ssid: "CLEUDO".to_string(),
            passphrase: None,
            passphrase_env: None,
            connect_timeout_ms: 10_000,
            route_probe: SocketAddr::from(([1, 1, 1, 1], 53)),
        }
    }
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttSection {
    /// Broker URL with protocol and port, e.g. `mqtt://broker.hivemq.com:1883`
    pub broker_url: String,
    /// Topic readings are published to and commands are received on
    pub topic: String,
    pub client_id: String,
    pub keep_alive_secs: u64,
    /// Minimum spacing between broker session attempts
    pub reconnect_interval_ms: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://broker.hivemq.com:1883".to_string(),
            topic: "implementation/bh1750".to_string(),
            client_id: "pico-client".to_string(),
            keep_alive_secs: 60,
            reconnect_interval_ms: 5_000,
        }
    }
}

/// What to do with a reading the sensor could not produce
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReadingPolicy {
    /// Publish the `-1.00` sentinel, as the field devices always have
    #[default]
    PublishSentinel,
    /// Publish nothing for this tick
    Skip,
}

/// Light sensor section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SensorSection {
    /// Linux IIO device directory exposing `in_illuminance_*`
    pub iio_device: PathBuf,
    /// Bus address of the BH1750 when driven over I2C directly
    pub i2c_address: u8,
    pub invalid_reading_policy: InvalidReadingPolicy,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            iio_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            i2c_address: 0x23,
            invalid_reading_policy: InvalidReadingPolicy::default(),
        }
    }
}

/// Actuator section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ActuatorSection {
    /// sysfs LED directory (`/sys/class/leds/<name>`); commands are only logged when unset
    pub led_path: Option<PathBuf>,
}

/// Control loop and watchdog timing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingSection {
    pub watchdog_timeout_ms: u64,
    pub watchdog_pause_on_debug: bool,
    /// Number of cooperative sleep slices between readings
    pub sleep_slices: u32,
    pub slice_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            watchdog_timeout_ms: 10_000,
            watchdog_pause_on_debug: true,
            sleep_slices: 100,
            slice_ms: 10,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Broker endpoint extracted from `broker_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
}

/// Credentials handed to the radio driver
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub passphrase: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("passphrase", &"***")
            .finish()
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AgentConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints the loop relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wifi.ssid.is_empty() {
            return Err(ConfigError::InvalidConfig("wifi.ssid must not be empty".to_string()));
        }
        if let Some(passphrase) = &self.wifi.passphrase {
            validate_passphrase(passphrase)?;
        }

        self.broker_endpoint()?;
        validate_topic(&self.mqtt.topic)?;

        if self.mqtt.client_id.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id must not be empty".to_string(),
            ));
        }

        let timing = &self.timing;
        if timing.watchdog_timeout_ms <= LINK_WATCHDOG_MARGIN_MS {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.watchdog_timeout_ms must be greater than {LINK_WATCHDOG_MARGIN_MS}"
            )));
        }
        // The link connect blocks the loop; it must finish inside one watchdog window.
        if self.wifi.connect_timeout_ms > timing.watchdog_timeout_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "wifi.connect_timeout_ms ({}) exceeds timing.watchdog_timeout_ms ({})",
                self.wifi.connect_timeout_ms, timing.watchdog_timeout_ms
            )));
        }
        if timing.slice_ms >= timing.watchdog_timeout_ms {
            return Err(ConfigError::InvalidConfig(format!(
                "timing.slice_ms ({}) must be shorter than timing.watchdog_timeout_ms ({})",
                timing.slice_ms, timing.watchdog_timeout_ms
            )));
        }

        Ok(())
    }

    /// Parse the broker URL into host and port
    pub fn broker_endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let url = Url::parse(&self.mqtt.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;

        // TLS is not supported, so only plain mqtt:// is accepted
        if url.scheme() != "mqtt" {
            return Err(ConfigError::InvalidBrokerUrl(format!(
                "{} (unsupported scheme '{}')",
                self.mqtt.broker_url,
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.mqtt.broker_url.clone()))?;
        // Url keeps brackets around IPv6 literals
        let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
        let port = url.port().unwrap_or(1883);

        Ok(BrokerEndpoint { host, port })
    }

    /// Resolve the Wi-Fi credentials, reading the passphrase from the environment if needed
    pub fn wifi_credentials(&self) -> Result<WifiCredentials, ConfigError> {
        self.wifi_credentials_from(|name| std::env::var(name).ok())
    }

    fn wifi_credentials_from(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<WifiCredentials, ConfigError> {
        let passphrase = match (&self.wifi.passphrase, &self.wifi.passphrase_env) {
            (Some(inline), _) => inline.clone(),
            (None, Some(env_name)) => {
                lookup(env_name).ok_or_else(|| ConfigError::EnvVarNotFound(env_name.clone()))?
            }
            (None, None) => lookup(DEFAULT_PASSPHRASE_ENV).unwrap_or_default(),
        };
        if !passphrase.is_empty() {
            validate_passphrase(&passphrase)?;
        }

        Ok(WifiCredentials {
            ssid: self.wifi.ssid.clone(),
            passphrase,
        })
    }

    /// Copy safe to print: an inline passphrase is masked
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.wifi.passphrase.is_some() {
            copy.wifi.passphrase = Some("***".to_string());
        }
        copy
    }

    /// Timeout handed to the radio: the configured value, capped
    /// `LINK_WATCHDOG_MARGIN_MS` below the watchdog timeout
    pub fn link_connect_timeout(&self) -> Duration {
        let ceiling = self
            .timing
            .watchdog_timeout_ms
            .saturating_sub(LINK_WATCHDOG_MARGIN_MS);
        Duration::from_millis(self.wifi.connect_timeout_ms.min(ceiling))
    }

    pub fn session_reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.mqtt.reconnect_interval_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.mqtt.keep_alive_secs)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.watchdog_timeout_ms)
    }

    pub fn slice_duration(&self) -> Duration {
        Duration::from_millis(self.timing.slice_ms)
    }
}

/// WPA2-PSK passphrases are 8 to 63 printable characters
fn validate_passphrase(passphrase: &str) -> Result<(), ConfigError> {
    let len = passphrase.chars().count();
    if !(8..=63).contains(&len) {
        return Err(ConfigError::InvalidConfig(format!(
            "WPA2 passphrase must be 8-63 characters, got {len}"
        )));
    }
    Ok(())
}

/// Publish topics may not be empty or contain wildcards
fn validate_topic(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::InvalidTopic("topic must not be empty".to_string()));
    }
    if topic.contains(['+', '#', '\0']) {
        return Err(ConfigError::InvalidTopic(format!(
            "'{topic}' must not contain wildcards or NUL"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_device_constants() {
        let config = AgentConfig::default();
        assert_eq!(config.mqtt.topic, "implementation/bh1750");
        assert_eq!(config.mqtt.client_id, "pico-client");
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.reconnect_interval_ms, 5_000);
        assert_eq!(config.wifi.connect_timeout_ms, 10_000);
        assert_eq!(config.timing.watchdog_timeout_ms, 10_000);
        assert_eq!(config.timing.sleep_slices, 100);
        assert_eq!(config.timing.slice_ms, 10);
        assert_eq!(config.sensor.i2c_address, 0x23);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_broker_endpoint_parsing() {
        let config = AgentConfig::default();
        let endpoint = config.broker_endpoint().unwrap();
        assert_eq!(endpoint.host, "broker.hivemq.com");
        assert_eq!(endpoint.port, 1883);

        let mut config = AgentConfig::default();
        config.mqtt.broker_url = "mqtt://10.0.0.5".to_string();
        let endpoint = config.broker_endpoint().unwrap();
        assert_eq!(endpoint.host, "10.0.0.5");
        assert_eq!(endpoint.port, 1883);
    }

    #[test]
    fn test_tls_scheme_rejected() {
        let mut config = AgentConfig::default();
        config.mqtt.broker_url = "mqtts://broker.example.com:8883".to_string();
        assert!(matches!(
            config.broker_endpoint(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = AgentConfig::default();
        config.mqtt.broker_url = "invalid-url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let mut config = AgentConfig::default();
        config.mqtt.topic = "sensors/+/lux".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopic(_))));

        config.mqtt.topic = String::new();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTopic(_))));
    }

    #[test]
    fn test_link_timeout_must_fit_watchdog_window() {
        let mut config = AgentConfig::default();
        config.wifi.connect_timeout_ms = 15_000;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_link_connect_capped_below_watchdog() {
        let config = AgentConfig::default();
        assert_eq!(config.link_connect_timeout(), Duration::from_millis(9_500));

        let mut shorter = AgentConfig::default();
        shorter.wifi.connect_timeout_ms = 4_000;
        assert_eq!(shorter.link_connect_timeout(), Duration::from_millis(4_000));
    }

    #[test]
    fn test_watchdog_must_exceed_link_margin() {
        let mut config = AgentConfig::default();
        config.wifi.connect_timeout_ms = 100;
        config.timing.slice_ms = 1;
        config.timing.watchdog_timeout_ms = LINK_WATCHDOG_MARGIN_MS;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_slice_must_be_shorter_than_watchdog() {
        let mut config = AgentConfig::default();
        config.timing.slice_ms = 10_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inline_passphrase_wins_over_env() {
        let mut config = AgentConfig::default();
        config.wifi.passphrase = Some("correct-horse".to_string());
        config.wifi.passphrase_env = Some("LUXAGENT_TEST_UNSET_VAR".to_string());

        let credentials = config.wifi_credentials().unwrap();
        assert_eq!(credentials.ssid, "CLEUDO");
        assert_eq!(credentials.passphrase, "correct-horse");
    }

    #[test]
    fn test_missing_passphrase_env_var() {
        let mut config = AgentConfig::default();
        config.wifi.passphrase = None;
        config.wifi.passphrase_env = Some("LUXAGENT_TEST_DEFINITELY_UNSET".to_string());

        assert!(matches!(
            config.wifi_credentials(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }

    #[test]
    fn test_default_config_without_env_is_open_network() {
        let credentials = AgentConfig::default()
            .wifi_credentials_from(|_| None)
            .unwrap();
        assert_eq!(credentials.ssid, "CLEUDO");
        assert_eq!(credentials.passphrase, "");
    }

    #[test]
    fn test_default_config_reads_well_known_env_var() {
        let credentials = AgentConfig::default()
            .wifi_credentials_from(|name| {
                (name == DEFAULT_PASSPHRASE_ENV).then(|| "from-default-var".to_string())
            })
            .unwrap();
        assert_eq!(credentials.passphrase, "from-default-var");
    }

    #[test]
    fn test_configured_env_var_must_exist() {
        let mut config = AgentConfig::default();
        config.wifi.passphrase_env = Some("SITE_WIFI_PASS".to_string());

        // The well-known variable does not stand in for a configured one
        let result = config.wifi_credentials_from(|name| {
            (name == DEFAULT_PASSPHRASE_ENV).then(|| "from-default-var".to_string())
        });
        assert!(
            matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "SITE_WIFI_PASS")
        );
    }

    #[test]
    fn test_redacted_masks_inline_passphrase() {
        let mut config = AgentConfig::default();
        config.wifi.passphrase = Some("correct-horse".to_string());

        let shown = toml::to_string_pretty(&config.redacted()).unwrap();
        assert!(!shown.contains("correct-horse"));
        assert!(shown.contains("***"));
        // The original is untouched
        assert_eq!(config.wifi.passphrase.as_deref(), Some("correct-horse"));
        assert_eq!(AgentConfig::default().redacted(), AgentConfig::default());
    }

    #[test]
    fn test_short_passphrase_rejected() {
        let mut config = AgentConfig::default();
        config.wifi.passphrase = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_debug_hides_passphrase() {
        let credentials = WifiCredentials {
            ssid: "net".to_string(),
            passphrase: "hunter2hunter2".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("net"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1884"

[sensor]
invalid_reading_policy = "skip"
"#;
        let config: AgentConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1884");
        assert_eq!(config.mqtt.topic, "implementation/bh1750");
        assert_eq!(
            config.sensor.invalid_reading_policy,
            InvalidReadingPolicy::Skip
        );
        assert_eq!(config.timing.slice_ms, 10);
    }
}
