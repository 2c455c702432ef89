//! # Received Message Types
//!
//! A [`Message`] is what a receive loop produces: the payload bytes, who
//! sent them (UDP only) and when they arrived. Messages are never mutated
//! after creation; pollers get copies shaped as [`UdpPacket`] or
//! [`SerialChunk`], which are the records handed across the native bridge.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of received data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: Option<SocketAddr>,
    payload: Vec<u8>,
    received_at: DateTime<Utc>,
}

impl Message {
    /// A datagram received from `sender`, stamped now
    pub fn datagram(sender: SocketAddr, payload: Vec<u8>) -> Self {
        Self {
            sender: Some(sender),
            payload,
            received_at: Utc::now(),
        }
    }

    /// Bytes read from a serial line, stamped now
    pub fn serial(payload: Vec<u8>) -> Self {
        Self {
            sender: None,
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

/// A buffered datagram as seen by pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpPacket {
    #[serde(rename = "senderIP")]
    pub sender_ip: String,
    #[serde(rename = "senderPort")]
    pub sender_port: u16,
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for UdpPacket {
    fn from(message: Message) -> Self {
        // Listener loops always record a sender
        let sender = message
            .sender
            .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0));
        Self {
            sender_ip: sender.ip().to_string(),
            sender_port: sender.port(),
            data: message.payload,
            timestamp: message.received_at,
        }
    }
}

/// A chunk of bytes read by a serial async loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialChunk {
    pub data: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl From<Message> for SerialChunk {
    fn from(message: Message) -> Self {
        Self {
            data: message.payload,
            timestamp: message.received_at,
        }
    }
}

/// Per-endpoint buffer statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointStats {
    /// Messages pushed since the endpoint opened
    pub received: u64,
    /// Messages evicted because the buffer was full (data loss)
    pub dropped: u64,
    /// Messages currently buffered
    pub buffered: usize,
    /// Buffer capacity
    pub capacity: usize,
}
