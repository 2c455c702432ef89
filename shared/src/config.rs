//! # Endpoint Configuration
//!
//! Plain structs with defaults matching the polling API (`buffer_capacity`
//! 100, 9600 baud, 8N1). Everything derives serde so foreign callers can
//! hand over a partial JSON object and get the defaults for the rest.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EndpointError, EndpointResult};

/// Default number of messages kept per endpoint buffer
pub const DEFAULT_BUFFER_CAPACITY: usize = 100;

/// Largest UDP payload we ever expect to receive
pub const MAX_DATAGRAM_SIZE: usize = 65535;

/// Default baud rate for serial ports
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Configuration for a UDP listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Maximum buffered datagrams before the oldest is dropped
    pub buffer_capacity: usize,
    /// Sleep between polls when the socket has nothing to read
    pub poll_interval_ms: u64,
    /// Receive buffer size; longer datagrams are truncated by the OS
    pub max_datagram_size: usize,
    /// Local address to bind (port comes from the open call)
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: 20,
            max_datagram_size: MAX_DATAGRAM_SIZE,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

impl ListenerConfig {
    /// Default config with a custom buffer capacity
    pub fn with_capacity(buffer_capacity: usize) -> Self {
        Self {
            buffer_capacity,
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> EndpointResult<()> {
        if self.buffer_capacity == 0 {
            return Err(EndpointError::InvalidConfig(
                "buffer_capacity must be at least 1".into(),
            ));
        }
        if self.max_datagram_size == 0 {
            return Err(EndpointError::InvalidConfig(
                "max_datagram_size must be at least 1".into(),
            ));
        }
        self.bind_ip().map(|_| ())
    }

    pub(crate) fn bind_ip(&self) -> EndpointResult<IpAddr> {
        self.bind_address
            .parse()
            .map_err(|_| EndpointError::InvalidAddress(self.bind_address.clone()))
    }
}

/// Number of data bits per serial character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = EndpointError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(EndpointError::InvalidConfig(format!(
                "data bits must be 5-8, got {other}"
            ))),
        }
    }
}

/// Serial parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

/// Serial stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

/// Configuration for a serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Hardware (RTS/CTS) flow control
    pub flow_control: bool,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Capacity of the async-read buffer
    pub buffer_capacity: usize,
    /// Sleep between polls when the async loop finds no pending bytes
    pub poll_interval_ms: u64,
    /// Start the async receive loop as part of `open`
    pub async_read: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: false,
            read_timeout_ms: 100,
            write_timeout_ms: 100,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            poll_interval_ms: 10,
            async_read: false,
        }
    }
}

impl SerialConfig {
    /// Default 8N1 config at the given baud rate
    pub fn with_baud_rate(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    /// Parse a (possibly partial) JSON object; missing fields take defaults
    pub fn from_json(json: &str) -> EndpointResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| EndpointError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> EndpointResult<()> {
        if self.baud_rate == 0 {
            return Err(EndpointError::InvalidConfig(
                "baud_rate must be positive".into(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(EndpointError::InvalidConfig(
                "buffer_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
