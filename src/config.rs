//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `node.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - ProducerConfig: Where readings come from (demo / serial / probe) and how often.
//!     - ServerConfig: Bind address and subscriber capacity.
//!     - SensorsConfig: HAL wiring and raw-sample conversion constants.
//!     - RelayConfig: Cloud upload endpoint, cadence and retry bound.
//!     - LoggingConfig: Log level and per-reading output.
//!
//! ==============================================================================

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::registry::MAX_CLIENTS;

/// env var that points at an explicit config file
pub const CONFIG_ENV: &str = "AQUANODE_CONFIG";

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct NodeConfig {
    #[serde(default)]
    pub producer: ProducerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sensors: SensorsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reading source. Chosen once at boot.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerMode {
    /// synthetic random readings
    #[default]
    Demo,
    /// `temperature,pH,turbidity,waterLevel` lines from an external board
    Serial,
    /// sample the sensors through the HAL
    Probe,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProducerConfig {
    pub mode: ProducerMode,
    /// refresh cadence for demo and probe modes
    pub interval_ms: u64,
    /// serial mode input: a tty / fifo path, or "-" for stdin
    pub line_source: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            mode: ProducerMode::Demo,
            interval_ms: 5000,
            line_source: "/dev/ttyUSB0".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub max_clients: usize,
    /// frames buffered per subscriber before it starts missing updates
    pub client_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:80".to_string(),
            max_clients: MAX_CLIENTS,
            client_buffer: 8,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SensorsConfig {
    /// ADS1115 address on i2c bus 1
    pub adc_i2c_address: u16,
    pub ph_channel: u8,
    pub turbidity_channel: u8,
    /// reference voltage and full-scale count of the ADC.
    /// defaults describe a 12-bit 3.3V converter; an ADS1115 at PGA 4.096V
    /// is vref = 4.096, adc_max = 32767.
    pub vref: f32,
    pub adc_max: f32,
    pub trig_pin: u8,
    pub echo_pin: u8,
    pub echo_timeout_us: u64,
    /// distance from the ultrasonic head to the tank floor
    pub tank_height_cm: f32,
    /// sysfs directory holding 1-wire devices; the first `28-*` entry is used
    pub w1_devices_dir: String,
    pub leds: IndicatorPins,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            adc_i2c_address: 0x48,
            ph_channel: 0,
            turbidity_channel: 1,
            vref: 3.3,
            adc_max: 4095.0,
            trig_pin: 12,
            echo_pin: 14,
            echo_timeout_us: 30_000,
            tank_height_cm: 240.0,
            w1_devices_dir: "/sys/bus/w1/devices".to_string(),
            leds: IndicatorPins::default(),
        }
    }
}

/// one status led per measured field
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct IndicatorPins {
    pub temperature: u8,
    pub ph: u8,
    pub turbidity: u8,
    pub water_level: u8,
}

impl Default for IndicatorPins {
    fn default() -> Self {
        Self { temperature: 26, ph: 27, turbidity: 25, water_level: 23 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key: String,
    pub interval_seconds: u64,
    /// how long to wait for the endpoint to answer
    pub timeout_ms: u64,
    /// consecutive connect failures tolerated before the node gives up
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://api.thingspeak.com".to_string(),
            api_key: String::new(),
            interval_seconds: 18,
            timeout_ms: 5000,
            max_retries: 30,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_sensor_data: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_sensor_data: true }
    }
}

impl NodeConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: NodeConfig = toml::from_str(content).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.producer.interval_ms == 0 {
            anyhow::bail!("producer.interval_ms must be greater than zero");
        }
        if self.relay.enabled {
            if self.relay.api_key.is_empty() {
                anyhow::bail!("relay.enabled requires relay.api_key");
            }
            if self.relay.interval_seconds == 0 {
                anyhow::bail!("relay.interval_seconds must be greater than zero");
            }
            if self.relay.timeout_ms == 0 {
                anyhow::bail!("relay.timeout_ms must be greater than zero");
            }
        }
        Ok(())
    }

    /// Load with default fallback
    ///
    /// runs before logging is initialised, so problems are printed directly.
    pub fn load_or_default() -> Self {
        let mut paths = Vec::new();
        if let Ok(explicit) = std::env::var(CONFIG_ENV) {
            paths.push(PathBuf::from(explicit));
        }
        paths.push(PathBuf::from("config").join("node.toml"));
        paths.push(PathBuf::from("..").join("config").join("node.toml"));

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {:#}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           NODE CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ Mode: {:?}", self.producer.mode);
        println!("│ Refresh Interval: {}ms", self.producer.interval_ms);
        println!("│ Listen: {}", self.server.bind);
        println!("│ Max Clients: {}", self.server.max_clients);
        println!("│ Cloud Relay: {}", if self.relay.enabled { "on" } else { "off" });
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
