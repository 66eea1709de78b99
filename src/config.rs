//! Session configuration.
//!
//! Every tunable of a station is an integer parameter with a built-in
//! default, optionally overridden from a `key=value` file (`#` starts a
//! comment, values accept `0x` hex).  A malformed line, an unknown key or
//! an out-of-range value is fatal at startup — there is no runtime
//! recovery from a bad configuration.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::addr::MacAddr;
use crate::coding::CoderKind;
use crate::link::LinkParams;

/// Errors raised while loading a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    Io(std::io::Error),
    /// A line is not `key=value`.
    Malformed { line: usize },
    /// The key names no known parameter.
    UnknownKey { line: usize, key: String },
    /// The value is not an integer, or out of range for its parameter.
    BadValue { line: usize, key: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration: {e}"),
            ConfigError::Malformed { line } => {
                write!(f, "line {line}: expected key=value")
            }
            ConfigError::UnknownKey { line, key } => {
                write!(f, "line {line}: unknown parameter `{key}`")
            }
            ConfigError::BadValue { line, key } => {
                write!(f, "line {line}: bad value for `{key}`")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

/// All session parameters for one station.
#[derive(Debug, Clone)]
pub struct Config {
    /// Payload capacity of one transport unit, in bytes.
    pub network_packet_size: usize,
    /// Unit capacity of the network→link handoff channel.
    pub network_send_capacity: usize,
    /// Unit capacity of the link→network delivery channel.
    pub network_recv_capacity: usize,
    /// Byte capacity of the link layer's outbound frame ring.
    pub link_send_buffer: usize,
    /// Byte capacity of the link layer's inbound frame ring.
    pub link_recv_buffer: usize,
    /// Sliding-window size `W`.
    pub link_max_buffered_frames: usize,
    /// Retransmission timeout in milliseconds.
    pub link_timeout_ms: u64,
    /// Byte capacity of the physical layer's inbound payload ring.
    pub physical_recv_buffer: usize,
    /// Error-coding transform id (0 pass, 1 Hamming, 2 CRC-32).
    pub physical_coder: i64,
    /// Payload capacity of the hub's ingest channel.
    pub hub_capacity: usize,
    /// 1 enables random interference on the medium.
    pub hub_noise: i64,
    /// Percentage of payloads the noise touches.
    pub hub_noise_frequency: u32,
    /// Percentage of bytes flipped within a touched payload.
    pub hub_noise_byte_error_frequency: u32,
    /// RNG seed for reproducible interference.
    pub hub_noise_seed: u64,
    /// This station's hardware address.
    pub mac_address: [u8; 6],
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network_packet_size: 256,
            network_send_capacity: 16,
            network_recv_capacity: 16,
            link_send_buffer: 4096,
            link_recv_buffer: 4096,
            link_max_buffered_frames: 8,
            link_timeout_ms: 200,
            physical_recv_buffer: 8192,
            physical_coder: 0,
            hub_capacity: 64,
            hub_noise: 0,
            hub_noise_frequency: 10,
            hub_noise_byte_error_frequency: 1,
            hub_noise_seed: 0,
            mac_address: [0x02, 0, 0, 0, 0, 0x01],
        }
    }
}

impl Config {
    /// Defaults overridden by the `key=value` file at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse override text onto the defaults.
    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let content = raw.split('#').next().unwrap_or("").trim();
            if content.is_empty() {
                continue;
            }
            let (key, value) = content
                .split_once('=')
                .ok_or(ConfigError::Malformed { line })?;
            let key = key.trim();
            let value = parse_int(value.trim()).ok_or_else(|| ConfigError::BadValue {
                line,
                key: key.to_string(),
            })?;
            config.set(key, value).map_err(|bad| match bad {
                SetError::Unknown => ConfigError::UnknownKey {
                    line,
                    key: key.to_string(),
                },
                SetError::OutOfRange => ConfigError::BadValue {
                    line,
                    key: key.to_string(),
                },
            })?;
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: i64) -> Result<(), SetError> {
        fn positive(value: i64) -> Result<usize, SetError> {
            usize::try_from(value)
                .ok()
                .filter(|v| *v > 0)
                .ok_or(SetError::OutOfRange)
        }
        fn byte(value: i64) -> Result<u8, SetError> {
            u8::try_from(value).map_err(|_| SetError::OutOfRange)
        }
        fn percent(value: i64) -> Result<u32, SetError> {
            u32::try_from(value)
                .ok()
                .filter(|v| *v <= 100)
                .ok_or(SetError::OutOfRange)
        }

        match key {
            // Bounded so a packed unit always stays below the frame
            // codec's DATA size limit.
            "network_packet_size" => {
                self.network_packet_size = positive(value)?;
                if self.network_packet_size > 1024 {
                    return Err(SetError::OutOfRange);
                }
            }
            "network_send_capacity" => self.network_send_capacity = positive(value)?,
            "network_recv_capacity" => self.network_recv_capacity = positive(value)?,
            "link_send_buffer" => self.link_send_buffer = positive(value)?,
            "link_recv_buffer" => self.link_recv_buffer = positive(value)?,
            "link_max_buffered_frames" => self.link_max_buffered_frames = positive(value)?,
            "link_timeout_ms" => {
                self.link_timeout_ms = u64::try_from(value)
                    .ok()
                    .filter(|v| *v > 0)
                    .ok_or(SetError::OutOfRange)?
            }
            "physical_recv_buffer" => self.physical_recv_buffer = positive(value)?,
            "physical_coder" => self.physical_coder = value,
            "hub_capacity" => self.hub_capacity = positive(value)?,
            "hub_noise" => self.hub_noise = value,
            "hub_noise_frequency" => self.hub_noise_frequency = percent(value)?,
            "hub_noise_byte_error_frequency" => {
                self.hub_noise_byte_error_frequency = percent(value)?
            }
            "hub_noise_seed" => {
                self.hub_noise_seed = u64::try_from(value).map_err(|_| SetError::OutOfRange)?
            }
            "mac_address_byte_1" => self.mac_address[0] = byte(value)?,
            "mac_address_byte_2" => self.mac_address[1] = byte(value)?,
            "mac_address_byte_3" => self.mac_address[2] = byte(value)?,
            "mac_address_byte_4" => self.mac_address[3] = byte(value)?,
            "mac_address_byte_5" => self.mac_address[4] = byte(value)?,
            "mac_address_byte_6" => self.mac_address[5] = byte(value)?,
            _ => return Err(SetError::Unknown),
        }
        Ok(())
    }

    /// This station's hardware address.
    pub fn mac(&self) -> MacAddr {
        MacAddr(self.mac_address)
    }

    /// Parameters consumed by [`crate::link::LinkLayer`].
    pub fn link_params(&self) -> LinkParams {
        LinkParams {
            address: self.mac(),
            max_buffered_frames: self.link_max_buffered_frames,
            send_ring_capacity: self.link_send_buffer,
            recv_ring_capacity: self.link_recv_buffer,
            timeout: Duration::from_millis(self.link_timeout_ms),
        }
    }

    /// The configured error-coding transform.
    pub fn coder(&self) -> CoderKind {
        CoderKind::from_id(self.physical_coder)
    }
}

enum SetError {
    Unknown,
    OutOfRange,
}

fn parse_int(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.link_max_buffered_frames >= 1);
        assert_eq!(config.coder(), CoderKind::Passthrough);
        let params = config.link_params();
        assert_eq!(params.timeout, Duration::from_millis(config.link_timeout_ms));
        assert_eq!(params.ack_timeout() * 4, params.timeout);
    }

    #[test]
    fn overrides_comments_and_hex() {
        let config = Config::parse(
            "# station two\n\
             link_max_buffered_frames = 4\n\
             physical_coder=2\n\
             mac_address_byte_6 = 0x2a  # trailing comment\n\
             \n",
        )
        .unwrap();
        assert_eq!(config.link_max_buffered_frames, 4);
        assert_eq!(config.coder(), CoderKind::Crc32);
        assert_eq!(config.mac_address[5], 0x2a);
        // Untouched keys keep their defaults.
        assert_eq!(config.network_packet_size, Config::default().network_packet_size);
    }

    #[test]
    fn unknown_key_is_fatal() {
        let err = Config::parse("no_such_parameter=1\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownKey { line: 1, .. }));
    }

    #[test]
    fn malformed_line_is_fatal() {
        let err = Config::parse("link_timeout_ms\n").unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { line: 1 }));
    }

    #[test]
    fn bad_value_is_fatal() {
        let err = Config::parse("link_timeout_ms=soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 1, .. }));
        let err = Config::parse("link_send_buffer=0\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 1, .. }));
        let err = Config::parse("hub_noise_frequency=140\n").unwrap_err();
        assert!(matches!(err, ConfigError::BadValue { line: 1, .. }));
    }
}
