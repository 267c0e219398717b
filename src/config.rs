/// Link configuration
///
/// Set once before operation begins, either through the fluent `with_*`
/// methods or deserialized from a host configuration file.
use serde::{Deserialize, Serialize};

use crate::errors::{LinkError, Result};
use crate::packet::{Framing, ENTRY_LEN, MIN_PACKET_LEN};

/// Per-link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Address this endpoint accepts packets for
    pub local_address: u8,

    /// Address stamped on outgoing packets
    pub peer_address: u8,

    /// Start-of-packet character
    pub header: u8,

    /// End-of-payload character
    pub terminator: u8,

    /// Positive acknowledgment character
    pub ack: u8,

    /// Negative acknowledgment character (checksum failure, resend now)
    pub nack: u8,

    /// Two-byte sentinel requesting the peer republish its whole table
    pub resend_all_command: u16,

    /// Maximum time a slot may go unsent even if unchanged
    pub heartbeat_interval_ms: u64,

    /// Time allowed from the first byte of a packet to its acknowledgment
    pub ack_timeout_ms: u64,

    /// Time allowed from a header byte to packet completion
    pub packet_timeout_ms: u64,

    /// Resend the same packet when the acknowledgment times out
    pub retransmit: bool,

    /// Resends allowed per packet before it is dropped
    pub max_retransmits: u32,

    /// Number of slots in each data table
    pub table_capacity: usize,

    /// Size of the transmit and receive buffers in bytes
    pub buffer_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            local_address: crate::DEFAULT_ADDRESS,
            peer_address: crate::DEFAULT_ADDRESS,
            header: crate::DEFAULT_HEADER,
            terminator: crate::DEFAULT_TERMINATOR,
            ack: crate::DEFAULT_ACK,
            nack: crate::DEFAULT_NACK,
            resend_all_command: crate::RESEND_ALL_COMMAND,
            heartbeat_interval_ms: crate::HEARTBEAT_INTERVAL_MS,
            ack_timeout_ms: crate::ACK_TIMEOUT_MS,
            packet_timeout_ms: crate::PACKET_TIMEOUT_MS,
            retransmit: false,
            max_retransmits: crate::MAX_RETRANSMIT_ATTEMPTS,
            table_capacity: crate::DEFAULT_TABLE_CAPACITY,
            buffer_capacity: crate::DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl LinkConfig {
    /// Defaults with one address used in both directions
    pub fn new(address: u8) -> Self {
        Self {
            local_address: address,
            peer_address: address,
            ..Self::default()
        }
    }

    pub fn with_local_address(mut self, address: u8) -> Self {
        self.local_address = address;
        self
    }

    pub fn with_peer_address(mut self, address: u8) -> Self {
        self.peer_address = address;
        self
    }

    pub fn with_header(mut self, header: u8) -> Self {
        self.header = header;
        self
    }

    pub fn with_terminator(mut self, terminator: u8) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_ack(mut self, ack: u8) -> Self {
        self.ack = ack;
        self
    }

    pub fn with_nack(mut self, nack: u8) -> Self {
        self.nack = nack;
        self
    }

    pub fn with_resend_all_command(mut self, command: u16) -> Self {
        self.resend_all_command = command;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.heartbeat_interval_ms = interval_ms;
        self
    }

    pub fn with_ack_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.ack_timeout_ms = timeout_ms;
        self
    }

    pub fn with_packet_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.packet_timeout_ms = timeout_ms;
        self
    }

    pub fn with_retransmit(mut self, enable: bool) -> Self {
        self.retransmit = enable;
        self
    }

    pub fn with_max_retransmits(mut self, retries: u32) -> Self {
        self.max_retransmits = retries;
        self
    }

    pub fn with_table_capacity(mut self, capacity: usize) -> Self {
        self.table_capacity = capacity;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn framing(&self) -> Framing {
        Framing {
            header: self.header,
            terminator: self.terminator,
        }
    }

    /// Check the settings can work together on one stream
    ///
    /// # Errors
    /// `InvalidConfig` when framing/control characters collide, the table
    /// is empty or large enough for an index byte to equal the terminator,
    /// the buffer cannot hold a single entry, or a timeout is zero.
    pub fn validate(&self) -> Result<()> {
        let [cmd_hi, cmd_lo] = self.resend_all_command.to_be_bytes();
        let specials = [
            ("header", self.header),
            ("terminator", self.terminator),
            ("ack", self.ack),
            ("nack", self.nack),
        ];

        for (i, (name_a, a)) in specials.iter().enumerate() {
            for (name_b, b) in &specials[i + 1..] {
                if a == b {
                    return Err(LinkError::InvalidConfig(format!(
                        "{} and {} share the character {:#04x}",
                        name_a, name_b, a
                    )));
                }
            }
        }

        // terminator never appears between packets, so only these matter
        for (name, ch) in [("header", self.header), ("ack", self.ack), ("nack", self.nack)] {
            if cmd_hi == ch {
                return Err(LinkError::InvalidConfig(format!(
                    "resend-all command {:#06x} starts with the {} character",
                    self.resend_all_command, name
                )));
            }
        }
        if cmd_lo == cmd_hi {
            return Err(LinkError::InvalidConfig(format!(
                "resend-all command {:#06x} must use two different bytes",
                self.resend_all_command
            )));
        }

        if self.table_capacity == 0 || self.table_capacity > self.terminator as usize {
            return Err(LinkError::InvalidConfig(format!(
                "table capacity {} must be between 1 and the terminator value {}",
                self.table_capacity, self.terminator
            )));
        }

        if self.buffer_capacity < MIN_PACKET_LEN + ENTRY_LEN {
            return Err(LinkError::InvalidConfig(format!(
                "buffer capacity {} must be at least {}",
                self.buffer_capacity,
                MIN_PACKET_LEN + ENTRY_LEN
            )));
        }

        if self.ack_timeout_ms == 0 || self.packet_timeout_ms == 0 || self.heartbeat_interval_ms == 0 {
            return Err(LinkError::InvalidConfig(
                "heartbeat interval and timeouts must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
