/// Packet codec
///
/// Wire layout (multi-byte fields big-endian):
///
/// ```text
/// HEADER ADDRESS { INDEX VALUE_HI VALUE_LO }* TERMINATOR CRC_HI CRC_LO
/// ```
///
/// The checksum covers every byte from the header through the terminator.
use crate::crc16;
use crate::errors::{LinkError, Result};

/// Header + address + terminator + two checksum bytes
pub const MIN_PACKET_LEN: usize = 5;

/// Index byte + two value bytes
pub const ENTRY_LEN: usize = 3;

/// Offset of the first entry (after header and address)
pub const PAYLOAD_OFFSET: usize = 2;

/// Framing characters shared by both ends of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framing {
    pub header: u8,
    pub terminator: u8,
}

impl Default for Framing {
    fn default() -> Self {
        Self {
            header: crate::DEFAULT_HEADER,
            terminator: crate::DEFAULT_TERMINATOR,
        }
    }
}

/// One protocol message: slot updates for a single recipient
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Address of the intended recipient
    pub address: u8,

    /// (index, value) pairs in ascending index order
    pub entries: Vec<(u8, i16)>,
}

impl Packet {
    pub fn new(address: u8) -> Self {
        Self {
            address,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, index: u8, value: i16) {
        self.entries.push((index, value));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Encoded size of a packet carrying `entries` updates
pub const fn encoded_len(entries: usize) -> usize {
    MIN_PACKET_LEN + entries * ENTRY_LEN
}

/// Largest number of entries that fit a buffer of `capacity` bytes
pub const fn max_entries(capacity: usize) -> usize {
    if capacity < MIN_PACKET_LEN {
        0
    } else {
        (capacity - MIN_PACKET_LEN) / ENTRY_LEN
    }
}

/// Serialize a packet to its wire form
///
/// # Errors
/// `EmptyPacket` if there is nothing to send; empty packets never go on
/// the wire.
pub fn encode(packet: &Packet, framing: Framing) -> Result<Vec<u8>> {
    if packet.is_empty() {
        return Err(LinkError::EmptyPacket);
    }

    let mut out = Vec::with_capacity(encoded_len(packet.entries.len()));
    out.push(framing.header);
    out.push(packet.address);
    for &(index, value) in &packet.entries {
        out.push(index);
        out.extend_from_slice(&value.to_be_bytes());
    }
    out.push(framing.terminator);

    let crc = crc16::checksum(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    Ok(out)
}

/// Validate a received frame and parse its entries
///
/// Indices are not checked against any table here; the caller applies
/// entries in order and decides what an unknown index means.
pub fn decode(frame: &[u8], framing: Framing) -> Result<Packet> {
    if frame.len() < MIN_PACKET_LEN {
        return Err(LinkError::PacketTooShort {
            minimum: MIN_PACKET_LEN,
            received: frame.len(),
        });
    }

    let body_len = frame.len() - 2;
    let expected = u16::from_be_bytes([frame[body_len], frame[body_len + 1]]);
    let actual = crc16::checksum(&frame[..body_len]);
    if expected != actual {
        return Err(LinkError::ChecksumMismatch { expected, actual });
    }

    if frame[0] != framing.header {
        return Err(LinkError::Malformed(format!(
            "expected header {:#04x}, got {:#04x}",
            framing.header, frame[0]
        )));
    }
    let terminator_pos = body_len - 1;
    if frame[terminator_pos] != framing.terminator {
        return Err(LinkError::Malformed(format!(
            "expected terminator {:#04x} at offset {}, got {:#04x}",
            framing.terminator, terminator_pos, frame[terminator_pos]
        )));
    }

    let payload = &frame[PAYLOAD_OFFSET..terminator_pos];
    if payload.len() % ENTRY_LEN != 0 {
        return Err(LinkError::Malformed(format!(
            "payload of {} bytes is not a whole number of entries",
            payload.len()
        )));
    }

    let entries = payload
        .chunks_exact(ENTRY_LEN)
        .map(|entry| (entry[0], i16::from_be_bytes([entry[1], entry[2]])))
        .collect();

    Ok(Packet {
        address: frame[1],
        entries,
    })
}
