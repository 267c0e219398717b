/// Byte stream and clock collaborators
///
/// The link never touches hardware directly. It sees a non-blocking byte
/// stream with one byte of lookahead and a monotonic millisecond clock,
/// both supplied by the host.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Non-blocking, unframed duplex byte stream
pub trait Transport {
    /// Number of bytes that can be read without blocking
    fn available(&self) -> usize;

    /// Next byte without consuming it
    fn peek_byte(&self) -> Option<u8>;

    /// Consume the next byte
    fn read_byte(&mut self) -> Option<u8>;

    /// Queue one byte for the peer
    fn write_byte(&mut self, byte: u8);
}

/// In-memory transport backed by two queues
///
/// Used by the async driver as the bridge to a real stream, and by tests
/// to wire two links together by shuttling bytes between them.
#[derive(Debug, Default, Clone)]
pub struct QueueTransport {
    inbound: VecDeque<u8>,
    outbound: VecDeque<u8>,
}

impl QueueTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make bytes available to the link's reader
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend(bytes.iter().copied());
    }

    /// Take everything the link has written so far
    pub fn drain_outbound(&mut self) -> Vec<u8> {
        self.outbound.drain(..).collect()
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}

impl Transport for QueueTransport {
    fn available(&self) -> usize {
        self.inbound.len()
    }

    fn peek_byte(&self) -> Option<u8> {
        self.inbound.front().copied()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.inbound.pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        self.outbound.push_back(byte);
    }
}

/// Monotonic time source in milliseconds
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall-clock backed monotonic time, starting at zero on construction
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock shared between clones
///
/// Lets simulations and tests step time deterministically.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
