//! Serial DataLink - stop-and-wait value synchronization over serial lines
//!
//! Keeps a small table of signed 16-bit values in sync between two
//! endpoints joined by an unframed, unreliable byte stream. Each side
//! publishes sparse updates; changed and heartbeat-due slots are packed into
//! CRC16-protected packets, acknowledged by the peer, and retransmitted on
//! timeout or NACK.
//!
//! # Design Principles
//! - One packet in flight per direction, one byte written per service tick
//! - No blocking: the host loop drives `service` and `poll_input`
//! - Faults are recovered locally and reported through latched flags
//! - Transport and clock are traits so the core runs on anything
//!
//! # Example
//! ```
//! use serial_datalink::{LinkConfig, SerialDataLink};
//! use serial_datalink::transport::{ManualClock, QueueTransport};
//!
//! let config = LinkConfig::new(0x01);
//! let mut link = SerialDataLink::new(QueueTransport::new(), ManualClock::new(0), config)?;
//! link.publish(3, 42)?;
//! link.service();
//! assert_eq!(
//!     link.outgoing_packet(),
//!     Some(&[b'<', 0x01, 0x03, 0x00, 0x2A, b'>', 0xE0, 0x1B][..])
//! );
//! # Ok::<(), serial_datalink::LinkError>(())
//! ```

pub mod errors;
pub mod crc16;
pub mod table;
pub mod packet;
pub mod config;
pub mod transport;
pub mod ack_manager;
pub mod transmitter;
pub mod receiver;
pub mod link;
pub mod driver;

pub use config::LinkConfig;
pub use errors::{LinkError, Result};
pub use link::{Fault, LinkEvent, SerialDataLink};
pub use packet::{Framing, Packet};

/// Default start-of-packet character
pub const DEFAULT_HEADER: u8 = b'<';

/// Default end-of-payload character
pub const DEFAULT_TERMINATOR: u8 = b'>';

/// Default acknowledgment character (ASCII ACK)
pub const DEFAULT_ACK: u8 = 0x06;

/// Default negative acknowledgment character (ASCII NAK)
pub const DEFAULT_NACK: u8 = 0x15;

/// Default endpoint address
pub const DEFAULT_ADDRESS: u8 = 0x01;

/// Two-byte command asking the peer to republish every slot
pub const RESEND_ALL_COMMAND: u16 = 0xFEED;

/// Maximum time a slot goes unsent, in milliseconds
pub const HEARTBEAT_INTERVAL_MS: u64 = 500;

/// ACK timeout in milliseconds, measured from a packet's first byte
pub const ACK_TIMEOUT_MS: u64 = 100;

/// Partial packet lifetime in milliseconds
pub const PACKET_TIMEOUT_MS: u64 = 150;

/// Maximum resends of one packet before it is dropped
pub const MAX_RETRANSMIT_ATTEMPTS: u32 = 3;

/// Slots per data table
pub const DEFAULT_TABLE_CAPACITY: usize = 20;

/// Transmit and receive buffer size in bytes
pub const DEFAULT_BUFFER_CAPACITY: usize = 128;
