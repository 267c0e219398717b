/// Transmitter module - stop-and-wait send side
///
/// Builds one packet from every due slot, feeds it to the transport one
/// byte per service tick, then waits for the peer's acknowledgment. At most
/// one packet is ever outstanding.
use tracing::{debug, trace, warn};

use crate::ack_manager::{AckManager, RetransmissionState};
use crate::config::LinkConfig;
use crate::link::{Fault, LinkEvent};
use crate::packet::{self, Packet};
use crate::table::DataTable;
use crate::transport::Transport;

/// Transmit state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing in flight; the next tick may build a packet
    Idle,

    /// Packet built, bytes still going out
    Sending,

    /// Whole packet written, waiting for the peer's ACK
    AwaitingAck,
}

/// Transmit state machine
#[derive(Debug, Clone)]
pub struct Transmitter {
    state: TxState,
    buffer: Vec<u8>,
    cursor: usize,
    /// Time the first byte of the current transmission went out
    started_ms: u64,
    retries: RetransmissionState,
}

impl Transmitter {
    pub fn new() -> Self {
        Self {
            state: TxState::Idle,
            buffer: Vec::new(),
            cursor: 0,
            started_ms: 0,
            retries: RetransmissionState::new(),
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Bytes of the packet in flight, if any
    pub fn packet(&self) -> Option<&[u8]> {
        match self.state {
            TxState::Idle => None,
            _ => Some(&self.buffer),
        }
    }

    /// A packet is partially written; control bytes must wait
    pub fn is_mid_packet(&self) -> bool {
        self.state == TxState::Sending
    }

    /// Advance by one tick
    pub fn service<T: Transport>(
        &mut self,
        now_ms: u64,
        table: &mut DataTable,
        config: &LinkConfig,
        transport: &mut T,
        control: &mut AckManager,
        events: &mut Vec<LinkEvent>,
    ) {
        match self.state {
            TxState::Idle => {
                if self.build(now_ms, table, config, events) {
                    self.send_next_byte(now_ms, transport, control, events);
                }
            }
            TxState::Sending => self.send_next_byte(now_ms, transport, control, events),
            TxState::AwaitingAck => {
                if now_ms.saturating_sub(self.started_ms) > config.ack_timeout_ms {
                    self.handle_timeout(config, events);
                }
            }
        }
    }

    /// Assemble a packet from every due slot
    ///
    /// Slots are marked sent here, before any byte is written, so a value
    /// published while this packet is in flight is flagged for the next one.
    fn build(
        &mut self,
        now_ms: u64,
        table: &mut DataTable,
        config: &LinkConfig,
        events: &mut Vec<LinkEvent>,
    ) -> bool {
        let limit = packet::max_entries(config.buffer_capacity);
        let due: Vec<u8> = table
            .due_slots(now_ms, config.heartbeat_interval_ms)
            .take(limit)
            .collect();
        if due.is_empty() {
            return false;
        }

        let mut packet = Packet::new(config.peer_address);
        for index in due {
            if let Some(value) = table.get(index) {
                packet.push(index, value);
                table.mark_sent(index, now_ms);
            }
        }

        match packet::encode(&packet, config.framing()) {
            Ok(bytes) => {
                debug!(
                    entries = packet.entries.len(),
                    bytes = bytes.len(),
                    "built packet"
                );
                events.push(LinkEvent::PacketBuilt {
                    entries: packet.entries.len(),
                });
                self.buffer = bytes;
                self.cursor = 0;
                self.retries.reset();
                self.state = TxState::Sending;
                true
            }
            Err(err) => {
                warn!(%err, "failed to encode packet");
                false
            }
        }
    }

    fn send_next_byte<T: Transport>(
        &mut self,
        now_ms: u64,
        transport: &mut T,
        control: &mut AckManager,
        events: &mut Vec<LinkEvent>,
    ) {
        if self.cursor == 0 {
            // the ACK deadline runs from the first byte, not the last
            self.started_ms = now_ms;
        }
        if let Some(&byte) = self.buffer.get(self.cursor) {
            trace!(byte, cursor = self.cursor, "tx");
            transport.write_byte(byte);
            self.cursor += 1;
        }
        if self.cursor >= self.buffer.len() {
            self.state = TxState::AwaitingAck;
            events.push(LinkEvent::PacketSent);
            control.flush(transport);
        }
    }

    fn handle_timeout(&mut self, config: &LinkConfig, events: &mut Vec<LinkEvent>) {
        warn!(
            timeout_ms = config.ack_timeout_ms,
            attempt = self.retries.attempt,
            "acknowledgment timed out"
        );
        events.push(LinkEvent::Fault(Fault::AcknowledgmentTimeout));

        if config.retransmit && !self.retries.is_exhausted(config.max_retransmits) {
            self.rewind(events);
        } else {
            self.drop_packet(events);
        }
    }

    /// Peer acknowledged the packet in flight
    pub fn on_ack(&mut self, events: &mut Vec<LinkEvent>) {
        if self.state != TxState::AwaitingAck {
            debug!(state = ?self.state, "ignoring stray acknowledgment");
            return;
        }
        debug!("packet acknowledged");
        self.state = TxState::Idle;
        self.retries.reset();
        events.push(LinkEvent::Acknowledged);
    }

    /// Peer rejected the packet in flight; resend it now
    pub fn on_nack(&mut self, config: &LinkConfig, events: &mut Vec<LinkEvent>) {
        if self.state != TxState::AwaitingAck {
            debug!(state = ?self.state, "ignoring stray negative acknowledgment");
            return;
        }
        events.push(LinkEvent::Nacked);
        if self.retries.is_exhausted(config.max_retransmits) {
            self.drop_packet(events);
        } else {
            self.rewind(events);
        }
    }

    /// Resend the already built buffer from its first byte
    fn rewind(&mut self, events: &mut Vec<LinkEvent>) {
        let attempt = self.retries.record_retry();
        debug!(attempt, "retransmitting packet");
        self.cursor = 0;
        self.state = TxState::Sending;
        events.push(LinkEvent::Retransmitting { attempt });
    }

    fn drop_packet(&mut self, events: &mut Vec<LinkEvent>) {
        warn!(bytes = self.buffer.len(), "dropping unacknowledged packet");
        self.state = TxState::Idle;
        self.cursor = 0;
        self.retries.reset();
        events.push(LinkEvent::PacketDropped);
    }

    /// Abandon any packet in flight
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for Transmitter {
    fn default() -> Self {
        Self::new()
    }
}
