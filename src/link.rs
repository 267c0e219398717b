/// Serial data link endpoint
///
/// Owns both data tables, both state machines and the status latches. All
/// mutation goes through two entry points the host calls from its loop:
/// [`SerialDataLink::service`] for the send side and
/// [`SerialDataLink::poll_input`] for the receive side.
use tracing::{debug, warn};

use crate::ack_manager::{AckManager, Control, Inbound};
use crate::config::LinkConfig;
use crate::errors::{LinkError, Result};
use crate::packet;
use crate::receiver::{Receiver, RxState, RxStep};
use crate::table::DataTable;
use crate::transmitter::{Transmitter, TxState};
use crate::transport::{Clock, Transport};

/// Locally recovered protocol faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Frame checksum did not match; packet discarded
    ChecksumMismatch { expected: u16, actual: u16 },

    /// Entry for a slot outside the receive table; rest of packet skipped
    UnknownIndex(u8),

    /// Receive buffer filled without a complete packet
    BufferOverflow,

    /// Partial packet outlived the packet timeout
    StalePartialPacket,

    /// No ACK within the acknowledgment timeout
    AcknowledgmentTimeout,

    /// Checksum passed but framing was inconsistent
    Malformed,
}

/// Something that happened during a service or poll step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    PacketBuilt { entries: usize },
    PacketSent,
    Acknowledged,
    Nacked,
    Retransmitting { attempt: u32 },
    PacketDropped,
    DataApplied { entries: usize },
    ResendAllRequested,
    Fault(Fault),
}

/// One end of a value-synchronizing serial link
pub struct SerialDataLink<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    config: LinkConfig,
    tx_table: DataTable,
    rx_table: DataTable,
    transmitter: Transmitter,
    receiver: Receiver,
    control: AckManager,
    transmission_error: bool,
    read_error: bool,
    new_data: bool,
}

impl<T: Transport, C: Clock> SerialDataLink<T, C> {
    /// Create a link over `transport`, timed by `clock`
    ///
    /// # Errors
    /// `InvalidConfig` if the configuration fails validation.
    pub fn new(transport: T, clock: C, config: LinkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            clock,
            tx_table: DataTable::new(config.table_capacity),
            rx_table: DataTable::new(config.table_capacity),
            transmitter: Transmitter::new(),
            receiver: Receiver::new(config.buffer_capacity),
            control: AckManager::new(&config),
            config,
            transmission_error: false,
            read_error: false,
            new_data: false,
        })
    }

    /// Replace the configuration
    ///
    /// Both state machines restart; any packet in flight is abandoned.
    /// Table contents survive unless the capacity changes.
    pub fn configure(&mut self, config: LinkConfig) -> Result<()> {
        config.validate()?;
        if config.table_capacity != self.config.table_capacity {
            self.tx_table = DataTable::new(config.table_capacity);
            self.rx_table = DataTable::new(config.table_capacity);
        }
        self.transmitter.reset();
        self.receiver = Receiver::new(config.buffer_capacity);
        self.control = AckManager::new(&config);
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Publish a local value; it is sent on a later service step if changed
    pub fn publish(&mut self, index: u8, value: i16) -> Result<()> {
        self.tx_table.publish(index, value).map(|_| ())
    }

    /// Latest value learned from the peer
    pub fn read(&self, index: u8) -> Option<i16> {
        self.rx_table.get(index)
    }

    /// Value this endpoint last published
    pub fn local_value(&self, index: u8) -> Option<i16> {
        self.tx_table.get(index)
    }

    /// Send side step: build, write one byte, or check the ACK deadline
    pub fn service(&mut self) -> Vec<LinkEvent> {
        let now = self.clock.now_ms();
        let mut events = Vec::new();
        self.transmitter.service(
            now,
            &mut self.tx_table,
            &self.config,
            &mut self.transport,
            &mut self.control,
            &mut events,
        );
        if !self.transmitter.is_mid_packet() && self.control.has_queued() {
            self.control.flush(&mut self.transport);
        }
        self.latch(&events);
        events
    }

    /// Receive side step: drain every byte currently available
    pub fn poll_input(&mut self) -> Vec<LinkEvent> {
        let now = self.clock.now_ms();
        let mut events = Vec::new();

        self.check_stale(now, &mut events);
        while self.transport.available() > 0 {
            self.check_stale(now, &mut events);
            let Some(byte) = self.transport.read_byte() else {
                break;
            };

            // control traffic is only recognised between packets
            let byte = if self.receiver.state() == RxState::SeekingHeader {
                match self.control.classify(byte, &mut self.transport) {
                    Inbound::Control(control) => {
                        self.handle_control(control, &mut events);
                        continue;
                    }
                    Inbound::Held => continue,
                    Inbound::Data(byte) => byte,
                }
            } else {
                byte
            };

            match self.receiver.feed(byte, now, &self.config) {
                RxStep::Pending => {}
                RxStep::Frame(frame) => self.process_frame(&frame, &mut events),
                RxStep::Fault(fault) => self.read_fault(fault, &mut events),
            }
        }

        self.latch(&events);
        events
    }

    /// Ask the peer to republish its whole table
    pub fn request_resend_all(&mut self) {
        self.send_control(Control::ResendAll);
    }

    fn check_stale(&mut self, now: u64, events: &mut Vec<LinkEvent>) {
        if let Some(fault) = self.receiver.expire_stale(now, self.config.packet_timeout_ms) {
            self.read_fault(fault, events);
        }
    }

    fn handle_control(&mut self, control: Control, events: &mut Vec<LinkEvent>) {
        match control {
            Control::Ack => self.transmitter.on_ack(events),
            Control::Nack => self.transmitter.on_nack(&self.config, events),
            Control::ResendAll => {
                debug!("peer requested full resend");
                self.tx_table.mark_all_dirty();
                events.push(LinkEvent::ResendAllRequested);
            }
        }
    }

    fn process_frame(&mut self, frame: &[u8], events: &mut Vec<LinkEvent>) {
        let packet = match packet::decode(frame, self.config.framing()) {
            Ok(packet) => packet,
            Err(LinkError::ChecksumMismatch { expected, actual }) => {
                warn!(expected, actual, "checksum mismatch");
                events.push(LinkEvent::Fault(Fault::ChecksumMismatch { expected, actual }));
                self.send_control(Control::Nack);
                return;
            }
            Err(err) => {
                warn!(%err, "malformed packet");
                events.push(LinkEvent::Fault(Fault::Malformed));
                self.send_control(Control::Nack);
                return;
            }
        };

        // entries before an unknown index stay applied
        let mut applied = 0;
        let mut unknown = None;
        for &(index, value) in &packet.entries {
            if self.rx_table.store(index, value).is_err() {
                unknown = Some(index);
                break;
            }
            applied += 1;
        }

        if applied > 0 {
            events.push(LinkEvent::DataApplied { entries: applied });
        }
        match unknown {
            Some(index) => {
                warn!(index, capacity = self.rx_table.capacity(), "unknown slot index");
                events.push(LinkEvent::Fault(Fault::UnknownIndex(index)));
            }
            None => {
                debug!(entries = applied, "packet applied");
                self.send_control(Control::Ack);
            }
        }
    }

    fn read_fault(&mut self, fault: Fault, events: &mut Vec<LinkEvent>) {
        events.push(LinkEvent::Fault(fault));
        if matches!(fault, Fault::BufferOverflow | Fault::StalePartialPacket) {
            // we no longer know which updates were lost
            self.send_control(Control::ResendAll);
        }
    }

    /// Write a control message now, or after our packet in flight
    fn send_control(&mut self, control: Control) {
        if self.transmitter.is_mid_packet() {
            self.control.queue(control);
        } else {
            for byte in self.control.encode(control) {
                self.transport.write_byte(byte);
            }
        }
    }

    fn latch(&mut self, events: &[LinkEvent]) {
        for event in events {
            match event {
                LinkEvent::DataApplied { .. } => self.new_data = true,
                LinkEvent::Fault(Fault::AcknowledgmentTimeout) | LinkEvent::PacketDropped => {
                    self.transmission_error = true
                }
                LinkEvent::Fault(_) => self.read_error = true,
                _ => {}
            }
        }
    }

    /// Transmission error latch; cleared only when `clear` is set
    pub fn take_transmission_error(&mut self, clear: bool) -> bool {
        let status = self.transmission_error;
        if clear {
            self.transmission_error = false;
        }
        status
    }

    /// Read error latch; cleared only when `clear` is set
    pub fn take_read_error(&mut self, clear: bool) -> bool {
        let status = self.read_error;
        if clear {
            self.read_error = false;
        }
        status
    }

    /// New data latch; cleared only when `clear` is set
    pub fn take_new_data(&mut self, clear: bool) -> bool {
        let status = self.new_data;
        if clear {
            self.new_data = false;
        }
        status
    }

    pub fn tx_state(&self) -> TxState {
        self.transmitter.state()
    }

    pub fn rx_state(&self) -> RxState {
        self.receiver.state()
    }

    /// Wire bytes of the packet in flight
    pub fn outgoing_packet(&self) -> Option<&[u8]> {
        self.transmitter.packet()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}
