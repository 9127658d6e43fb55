//! Serial line and session configuration
//!
//! Loaded through figment: built-in defaults, then a config file, then
//! `RTU_`-prefixed environment variables.

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BAUD_RATE, DEFAULT_MIN_FRAME_LEN, DEFAULT_QUEUE_DEPTH, DEFAULT_REGISTER_COUNT,
    DEFAULT_START_REGISTER, MAX_READ_REGISTERS, MAX_RTU_FRAME_SIZE, MIN_RESPONSE_LEN,
};
use crate::error::{Result, RtuError};

/// Serial parity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuConfig {
    /// Serial device, e.g. `COM1` or `/dev/ttyUSB0`
    pub device: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Per-request timeout. `None` or 0 disables it.
    pub timeout_ms: Option<u64>,
    /// Reassembly threshold: reads shorter than this are held without a
    /// decode attempt. A response is still only complete at its expected length.
    pub min_frame_len: usize,
    /// Override for slaves that answer with a non-standard length
    pub expected_response_len: Option<usize>,
    /// Register window used by `RtuClient::read`
    pub start_register: u16,
    pub register_count: u16,
    /// Command channel capacity, and the most requests that may wait
    /// behind the one in flight
    pub queue_depth: usize,
}

impl Default for RtuConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
            timeout_ms: None,
            min_frame_len: DEFAULT_MIN_FRAME_LEN,
            expected_response_len: None,
            start_register: DEFAULT_START_REGISTER,
            register_count: DEFAULT_REGISTER_COUNT,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl RtuConfig {
    /// 9600-8-N-1 on the given device
    pub fn for_device(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Effective request timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Held bytes needed before a decode is attempted for a response of
    /// `expected_len` bytes
    pub fn frame_threshold(&self, expected_len: usize) -> usize {
        self.min_frame_len.min(expected_len)
    }

    pub fn data_bits(&self) -> tokio_serial::DataBits {
        match self.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        }
    }

    pub fn stop_bits(&self) -> tokio_serial::StopBits {
        match self.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.trim().is_empty() {
            return Err(RtuError::config("Serial device not specified"));
        }
        if self.baud_rate == 0 {
            return Err(RtuError::config("baud_rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(RtuError::config(format!(
                "data_bits {} outside 5..=8",
                self.data_bits
            )));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(RtuError::config(format!(
                "stop_bits {} outside 1..=2",
                self.stop_bits
            )));
        }
        if self.register_count == 0 || self.register_count > MAX_READ_REGISTERS {
            return Err(RtuError::config(format!(
                "register_count {} outside 1..={}",
                self.register_count, MAX_READ_REGISTERS
            )));
        }
        if u32::from(self.start_register) + u32::from(self.register_count) > 0x1_0000 {
            return Err(RtuError::config(format!(
                "register window {}+{} exceeds the address space",
                self.start_register, self.register_count
            )));
        }
        if !(MIN_RESPONSE_LEN..=MAX_RTU_FRAME_SIZE).contains(&self.min_frame_len) {
            return Err(RtuError::config(format!(
                "min_frame_len {} outside {}..={}",
                self.min_frame_len, MIN_RESPONSE_LEN, MAX_RTU_FRAME_SIZE
            )));
        }
        if let Some(len) = self.expected_response_len {
            if !(MIN_RESPONSE_LEN..=MAX_RTU_FRAME_SIZE).contains(&len) {
                return Err(RtuError::config(format!(
                    "expected_response_len {} outside {}..={}",
                    len, MIN_RESPONSE_LEN, MAX_RTU_FRAME_SIZE
                )));
            }
        }
        if self.queue_depth == 0 {
            return Err(RtuError::config("queue_depth must be positive"));
        }
        Ok(())
    }
}

/// Load configuration from a specific file, with `RTU_*` environment overrides
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RtuConfig> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| RtuError::config("Config file must have an extension"))?;

    let figment = Figment::from(Serialized::defaults(RtuConfig::default()));
    let figment = match extension {
        "toml" => figment.merge(Toml::file(path)),
        "yaml" | "yml" => figment.merge(Yaml::file(path)),
        "json" => figment.merge(Json::file(path)),
        _ => {
            return Err(RtuError::config(format!(
                "Unsupported config file format: {extension}"
            )))
        },
    };

    let config: RtuConfig = figment.merge(Env::prefixed("RTU_")).extract()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_9600_8n1() {
        let config = RtuConfig::for_device("COM1");
        assert_eq!(config.device, "COM1");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.min_frame_len, 16);
        assert_eq!((config.start_register, config.register_count), (0, 6));
        assert_eq!(config.timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables() {
        let mut config = RtuConfig::for_device("COM1");
        config.timeout_ms = Some(0);
        assert_eq!(config.timeout(), None);

        let config = config.with_timeout(Duration::from_millis(500));
        assert_eq!(config.timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_frame_threshold() {
        let config = RtuConfig::for_device("COM1");
        assert_eq!(config.frame_threshold(17), 16);
        assert_eq!(config.frame_threshold(7), 7);
    }

    #[test]
    fn test_validate_rejects() {
        assert!(RtuConfig::default().validate().is_err());

        let mut config = RtuConfig::for_device("COM1");
        config.register_count = 126;
        assert!(config.validate().is_err());

        let mut config = RtuConfig::for_device("COM1");
        config.data_bits = 9;
        assert!(config.validate().is_err());

        let mut config = RtuConfig::for_device("COM1");
        config.min_frame_len = 1;
        assert!(matches!(config.validate(), Err(RtuError::Config(_))));
        config.min_frame_len = 5;
        assert!(config.validate().is_ok());

        let mut config = RtuConfig::for_device("COM1");
        config.expected_response_len = Some(3);
        assert!(config.validate().is_err());

        let mut config = RtuConfig::for_device("COM1");
        config.start_register = 0xFFFF;
        config.register_count = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            ".yaml",
            "device: /dev/ttyUSB0\nbaud_rate: 19200\nparity: even\ntimeout_ms: 1000\n",
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.device, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.timeout(), Some(Duration::from_secs(1)));
        // untouched fields keep defaults
        assert_eq!(config.register_count, 6);
    }

    #[test]
    fn test_load_toml_with_length_override() {
        let file = write_config(
            ".toml",
            "device = \"COM3\"\nexpected_response_len = 16\nmin_frame_len = 12\n",
        );
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.expected_response_len, Some(16));
        assert_eq!(config.min_frame_len, 12);
    }

    #[test]
    fn test_load_json() {
        let file = write_config(".json", r#"{"device": "COM2", "register_count": 10}"#);
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.register_count, 10);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let file = write_config(".yaml", "baud_rate: 9600\n");
        assert!(matches!(load_config(file.path()), Err(RtuError::Config(_))));

        let file = write_config(".ini", "device=COM1\n");
        assert!(matches!(load_config(file.path()), Err(RtuError::Config(_))));
    }

    #[test]
    fn test_parity_conversion() {
        assert_eq!(tokio_serial::Parity::from(Parity::Odd), tokio_serial::Parity::Odd);
        let json = serde_json::to_string(&Parity::Even).unwrap();
        assert_eq!(json, "\"even\"");
    }
}
