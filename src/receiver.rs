/// Receiver module - byte-at-a-time packet parser
///
/// Bytes arrive one at a time from the host loop. The parser hunts for a
/// header, checks the address, then accumulates until the positional
/// terminator test fires. Frames addressed elsewhere are followed to their
/// end and dropped, so their payload is never read as control traffic.
use tracing::{debug, trace, warn};

use crate::config::LinkConfig;
use crate::link::Fault;
use crate::packet::{ENTRY_LEN, MIN_PACKET_LEN, PAYLOAD_OFFSET};

/// Receive state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    SeekingHeader,
    SeekingAddress,
    Accumulating,
    /// Consuming a frame addressed to another endpoint
    SkippingForeign,
}

/// What one fed byte produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RxStep {
    /// Nothing to act on yet
    Pending,

    /// A complete frame, header through checksum
    Frame(Vec<u8>),

    /// The partial packet was thrown away
    Fault(Fault),
}

/// Byte-at-a-time packet parser
#[derive(Debug, Clone)]
pub struct Receiver {
    state: RxState,
    buffer: Vec<u8>,
    capacity: usize,
    header_ms: u64,
}

impl Receiver {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RxState::SeekingHeader,
            buffer: Vec::with_capacity(capacity),
            capacity,
            header_ms: 0,
        }
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    /// Bytes of the partial packet collected so far
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = RxState::SeekingHeader;
    }

    /// Discard a partial packet older than the packet timeout
    ///
    /// An expired foreign frame is dropped without a fault.
    pub fn expire_stale(&mut self, now_ms: u64, timeout_ms: u64) -> Option<Fault> {
        if self.state == RxState::SeekingHeader {
            return None;
        }
        if now_ms.saturating_sub(self.header_ms) <= timeout_ms {
            return None;
        }
        if self.state == RxState::SkippingForeign {
            debug!(buffered = self.buffer.len(), "foreign packet timed out");
            self.reset();
            return None;
        }
        warn!(
            buffered = self.buffer.len(),
            age_ms = now_ms.saturating_sub(self.header_ms),
            "discarding stale partial packet"
        );
        self.reset();
        Some(Fault::StalePartialPacket)
    }

    /// Feed one byte of packet traffic
    pub fn feed(&mut self, byte: u8, now_ms: u64, config: &LinkConfig) -> RxStep {
        match self.state {
            RxState::SeekingHeader => {
                if byte == config.header {
                    self.buffer.clear();
                    self.buffer.push(byte);
                    self.header_ms = now_ms;
                    self.state = RxState::SeekingAddress;
                } else {
                    trace!(byte, "discarding noise");
                }
                RxStep::Pending
            }
            RxState::SeekingAddress => {
                if byte == config.local_address {
                    self.buffer.push(byte);
                    self.state = RxState::Accumulating;
                } else {
                    debug!(address = byte, "packet for another endpoint");
                    self.buffer.push(byte);
                    self.state = RxState::SkippingForeign;
                }
                RxStep::Pending
            }
            RxState::SkippingForeign => {
                self.buffer.push(byte);
                if self.is_complete(config.terminator) || self.buffer.len() >= self.capacity {
                    trace!(len = self.buffer.len(), "foreign packet skipped");
                    self.reset();
                }
                RxStep::Pending
            }
            RxState::Accumulating => {
                self.buffer.push(byte);
                if self.is_complete(config.terminator) {
                    let frame = std::mem::take(&mut self.buffer);
                    self.reset();
                    return RxStep::Frame(frame);
                }
                if self.buffer.len() >= self.capacity {
                    warn!(capacity = self.capacity, "receive buffer overflow");
                    self.reset();
                    return RxStep::Fault(Fault::BufferOverflow);
                }
                RxStep::Pending
            }
        }
    }

    /// Terminator three bytes behind the last one, on the entry grid
    ///
    /// Completion is inferred from position because payload bytes are not
    /// escaped. Only offsets `PAYLOAD_OFFSET + k * ENTRY_LEN` can hold the
    /// terminator, and index bytes there are below the table capacity,
    /// which validation keeps at or under the terminator value.
    fn is_complete(&self, terminator: u8) -> bool {
        let len = self.buffer.len();
        if len < MIN_PACKET_LEN {
            return false;
        }
        let pos = len - 3;
        (pos - PAYLOAD_OFFSET) % ENTRY_LEN == 0 && self.buffer[pos] == terminator
    }
}
