/// ACK manager - control channel and retransmission bookkeeping
///
/// Control traffic is out of band: single ACK/NACK characters and a
/// two-byte resend-all command, recognised only between packets. Control
/// bytes this endpoint emits while its own packet is mid-flight are held
/// back and flushed after the packet's last byte so they never split it.
use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::config::LinkConfig;
use crate::transport::Transport;

/// Out-of-band control messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Peer applied our packet
    Ack,

    /// Peer saw a corrupted packet and wants it again now
    Nack,

    /// Peer lost sync and wants every slot republished
    ResendAll,
}

/// Result of classifying one byte seen between packets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Control(Control),

    /// First command byte seen, second not yet available
    Held,

    /// Not control traffic; hand to the packet parser
    Data(u8),
}

/// Encodes, decodes and defers control traffic
#[derive(Debug, Clone)]
pub struct AckManager {
    ack: u8,
    nack: u8,
    command: [u8; 2],
    held: Option<u8>,
    outbox: VecDeque<u8>,
}

impl AckManager {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            ack: config.ack,
            nack: config.nack,
            command: config.resend_all_command.to_be_bytes(),
            held: None,
            outbox: VecDeque::new(),
        }
    }

    /// Wire bytes for a control message
    pub fn encode(&self, control: Control) -> Vec<u8> {
        match control {
            Control::Ack => vec![self.ack],
            Control::Nack => vec![self.nack],
            Control::ResendAll => self.command.to_vec(),
        }
    }

    /// Classify a byte read while no packet is being parsed
    ///
    /// The second command byte is looked for with `peek_byte` so a stray
    /// first byte never swallows the byte after it.
    pub fn classify<T: Transport>(&mut self, byte: u8, transport: &mut T) -> Inbound {
        let [cmd_hi, cmd_lo] = self.command;

        if let Some(held) = self.held.take() {
            if byte == cmd_lo {
                return Inbound::Control(Control::ResendAll);
            }
            trace!(byte = held, "discarding unmatched command byte");
        }

        if byte == self.ack {
            return Inbound::Control(Control::Ack);
        }
        if byte == self.nack {
            return Inbound::Control(Control::Nack);
        }
        if byte == cmd_hi {
            match transport.peek_byte() {
                Some(next) if next == cmd_lo => {
                    transport.read_byte();
                    return Inbound::Control(Control::ResendAll);
                }
                Some(_) => {}
                None => {
                    self.held = Some(byte);
                    return Inbound::Held;
                }
            }
        }

        Inbound::Data(byte)
    }

    /// Defer a control message until the current packet finishes
    pub fn queue(&mut self, control: Control) {
        debug!(?control, "deferring control message behind packet in flight");
        let bytes = self.encode(control);
        self.outbox.extend(bytes);
    }

    pub fn has_queued(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Write every deferred control byte
    pub fn flush<T: Transport>(&mut self, transport: &mut T) -> usize {
        let count = self.outbox.len();
        while let Some(byte) = self.outbox.pop_front() {
            transport.write_byte(byte);
        }
        count
    }

    /// Forget held and deferred bytes
    pub fn reset(&mut self) {
        self.held = None;
        self.outbox.clear();
    }
}

/// Retransmission counter for the packet currently held by the transmitter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetransmissionState {
    /// Resends performed so far (0 = only the original transmission)
    pub attempt: u32,
}

impl RetransmissionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a resend, returning its attempt number
    pub fn record_retry(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// No resends left under `max_retransmits`
    pub fn is_exhausted(&self, max_retransmits: u32) -> bool {
        self.attempt >= max_retransmits
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
