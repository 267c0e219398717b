use serial_datalink::packet::{self, Framing, Packet};
use serial_datalink::receiver::RxState;
use serial_datalink::transmitter::TxState;
use serial_datalink::transport::{ManualClock, QueueTransport};
use serial_datalink::{Fault, LinkConfig, LinkError, LinkEvent, SerialDataLink};

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Link = SerialDataLink<QueueTransport, ManualClock>;

const ADDR_A: u8 = 0x01;
const ADDR_B: u8 = 0x02;

/// Two endpoints joined back to back, sharing one clock
struct Pair {
    a: Link,
    b: Link,
    clock: ManualClock,
}

impl Pair {
    fn new(config_a: LinkConfig, config_b: LinkConfig) -> Self {
        let clock = ManualClock::new(0);
        Self {
            a: SerialDataLink::new(QueueTransport::new(), clock.clone(), config_a).unwrap(),
            b: SerialDataLink::new(QueueTransport::new(), clock.clone(), config_b).unwrap(),
            clock,
        }
    }

    fn default_pair() -> Self {
        Self::new(config_a(), config_b())
    }

    fn shuttle(&mut self) {
        let a_to_b = self.a.transport_mut().drain_outbound();
        let b_to_a = self.b.transport_mut().drain_outbound();
        self.b.transport_mut().push_inbound(&a_to_b);
        self.a.transport_mut().push_inbound(&b_to_a);
    }

    /// One host-loop iteration on both ends
    fn step(&mut self) -> (Vec<LinkEvent>, Vec<LinkEvent>) {
        let mut a_events = self.a.service();
        let mut b_events = self.b.service();
        self.shuttle();
        a_events.extend(self.a.poll_input());
        b_events.extend(self.b.poll_input());
        self.shuttle();
        (a_events, b_events)
    }

    fn run(&mut self, steps: usize) -> (Vec<LinkEvent>, Vec<LinkEvent>) {
        let mut a_all = Vec::new();
        let mut b_all = Vec::new();
        for _ in 0..steps {
            let (a, b) = self.step();
            a_all.extend(a);
            b_all.extend(b);
        }
        (a_all, b_all)
    }
}

fn config_a() -> LinkConfig {
    LinkConfig::new(ADDR_A).with_peer_address(ADDR_B)
}

fn config_b() -> LinkConfig {
    LinkConfig::new(ADDR_B).with_peer_address(ADDR_A)
}

fn count(events: &[LinkEvent], wanted: fn(&LinkEvent) -> bool) -> usize {
    events.iter().filter(|e| wanted(e)).count()
}

/// Write every byte of the packet in flight, returning the wire bytes
fn transmit_whole_packet(link: &mut Link) -> Vec<u8> {
    while link.tx_state() == TxState::Sending {
        link.service();
    }
    link.transport_mut().drain_outbound()
}

// "<" 0x02 idx=3 value=42 ">" crc
const PACKET_FOR_B: [u8; 8] = [0x3C, 0x02, 0x03, 0x00, 0x2A, 0x3E, 0xE0, 0x93];

#[test]
fn test_end_to_end_single_value() {
    let mut pair = Pair::default_pair();
    pair.a.publish(3, 42).unwrap();

    let events = pair.a.service();
    assert_eq!(events, vec![LinkEvent::PacketBuilt { entries: 1 }]);
    assert_eq!(pair.a.outgoing_packet(), Some(&PACKET_FOR_B[..]));

    let wire = transmit_whole_packet(&mut pair.a);
    assert_eq!(wire, PACKET_FOR_B);
    assert_eq!(pair.a.tx_state(), TxState::AwaitingAck);

    pair.b.transport_mut().push_inbound(&wire);
    let events = pair.b.poll_input();
    assert_eq!(events, vec![LinkEvent::DataApplied { entries: 1 }]);
    assert!(pair.b.take_new_data(false));
    assert_eq!(pair.b.read(3), Some(42));

    let ack = pair.b.transport_mut().drain_outbound();
    assert_eq!(ack, vec![0x06]);
    pair.a.transport_mut().push_inbound(&ack);
    assert_eq!(pair.a.poll_input(), vec![LinkEvent::Acknowledged]);
    assert_eq!(pair.a.tx_state(), TxState::Idle);
    assert!(!pair.a.take_transmission_error(false));
}

#[test]
fn test_republishing_same_value_sends_once() {
    let mut pair = Pair::default_pair();
    pair.a.publish(1, 5).unwrap();
    pair.a.publish(1, 5).unwrap();

    let (a_events, _) = pair.run(40);
    assert_eq!(count(&a_events, |e| matches!(e, LinkEvent::PacketBuilt { .. })), 1);
    assert_eq!(count(&a_events, |e| *e == LinkEvent::Acknowledged), 1);

    // an actual change goes out again
    pair.a.publish(1, 6).unwrap();
    let (a_events, _) = pair.run(40);
    assert_eq!(count(&a_events, |e| matches!(e, LinkEvent::PacketBuilt { .. })), 1);
    assert_eq!(pair.b.read(1), Some(6));
}

#[test]
fn test_heartbeat_resends_unchanged_slots() {
    let mut pair = Pair::default_pair();
    pair.clock.set(100);
    pair.a.publish(1, 5).unwrap();
    pair.run(40);
    assert_eq!(pair.a.tx_state(), TxState::Idle);

    // every other slot was last "sent" at 0
    pair.clock.set(500);
    let events = pair.a.service();
    assert_eq!(events, vec![LinkEvent::PacketBuilt { entries: 19 }]);
    pair.run(100);

    // slot 1 was sent at 100, so it is due at 600 on its own
    pair.clock.set(600);
    let events = pair.a.service();
    assert_eq!(events, vec![LinkEvent::PacketBuilt { entries: 1 }]);
    assert_eq!(pair.a.outgoing_packet().map(|p| p[2]), Some(1));
}

#[test]
fn test_single_bit_flips_are_rejected() {
    let packet = Packet {
        address: ADDR_B,
        entries: vec![(3, 42), (7, -1234)],
    };
    let wire = packet::encode(&packet, Framing::default()).unwrap();

    for byte in 0..wire.len() {
        for bit in 0..8 {
            let mut tampered = wire.clone();
            tampered[byte] ^= 1 << bit;

            assert!(
                matches!(
                    packet::decode(&tampered, Framing::default()),
                    Err(LinkError::ChecksumMismatch { .. })
                ),
                "flip of byte {} bit {} went undetected",
                byte,
                bit
            );

            let mut b = Pair::default_pair().b;
            b.transport_mut().push_inbound(&tampered);
            let events = b.poll_input();
            assert!(!events.iter().any(|e| matches!(e, LinkEvent::DataApplied { .. })));
            assert_eq!(b.read(3), Some(0));
            assert_eq!(b.read(7), Some(0));
            assert!(!b.take_new_data(false));
        }
    }
}

#[test]
fn test_ack_timeout_without_retransmit() {
    let mut pair = Pair::default_pair();
    pair.a.publish(2, 9).unwrap();
    pair.a.service();
    transmit_whole_packet(&mut pair.a);

    pair.clock.advance(100);
    assert!(pair.a.service().is_empty());
    assert!(!pair.a.take_transmission_error(false));

    pair.clock.advance(1);
    let events = pair.a.service();
    assert_eq!(
        events,
        vec![
            LinkEvent::Fault(Fault::AcknowledgmentTimeout),
            LinkEvent::PacketDropped
        ]
    );
    assert!(pair.a.take_transmission_error(true));
    assert!(!pair.a.take_transmission_error(false));
    assert_eq!(pair.a.tx_state(), TxState::Idle);

    // nothing is resent
    pair.a.service();
    assert_eq!(pair.a.transport().outbound_len(), 0);
}

#[test]
fn test_ack_timeout_with_retransmit_resends_identical_bytes() {
    let mut pair = Pair::new(config_a().with_retransmit(true), config_b());
    pair.a.publish(2, 9).unwrap();
    pair.a.service();
    let first = transmit_whole_packet(&mut pair.a);

    pair.clock.advance(101);
    let events = pair.a.service();
    assert!(events.contains(&LinkEvent::Fault(Fault::AcknowledgmentTimeout)));
    assert!(events.contains(&LinkEvent::Retransmitting { attempt: 1 }));
    assert!(pair.a.take_transmission_error(true));

    pair.a.service();
    let second = transmit_whole_packet(&mut pair.a);
    assert_eq!(first, second);

    // the retry is delivered normally
    pair.b.transport_mut().push_inbound(&second);
    pair.b.poll_input();
    assert_eq!(pair.b.read(2), Some(9));
}

#[test]
fn test_resend_all_republishes_every_slot() {
    let mut pair = Pair::default_pair();
    for idx in 0..20u8 {
        pair.a.publish(idx, idx as i16 * 100 - 900).unwrap();
    }
    pair.run(120);
    assert_eq!(pair.a.tx_state(), TxState::Idle);

    // B forgets everything it learned
    pair.b.configure(config_b().with_table_capacity(19)).unwrap();
    pair.b.configure(config_b()).unwrap();
    assert_eq!(pair.b.read(5), Some(0));

    pair.b.request_resend_all();
    pair.shuttle();
    assert_eq!(pair.a.poll_input(), vec![LinkEvent::ResendAllRequested]);
    assert_eq!(pair.a.service(), vec![LinkEvent::PacketBuilt { entries: 20 }]);

    pair.run(120);
    for idx in 0..20u8 {
        assert_eq!(pair.b.read(idx), pair.a.local_value(idx));
    }
}

#[test]
fn test_foreign_address_discarded_silently() {
    let mut pair = Pair::default_pair();
    // addressed to 0x09: "<" 0x09 (0,5) (1,7) ">" crc
    let foreign = [0x3C, 0x09, 0x00, 0x00, 0x05, 0x01, 0x00, 0x07, 0x3E, 0xC7, 0xA6];
    pair.b.transport_mut().push_inbound(&foreign);

    assert!(pair.b.poll_input().is_empty());
    assert!(!pair.b.take_read_error(false));
    assert!(!pair.b.take_new_data(false));
    assert_eq!(pair.b.read(0), Some(0));
    assert_eq!(pair.b.read(1), Some(0));
    assert_eq!(pair.b.transport().outbound_len(), 0);
    assert_eq!(pair.b.rx_state(), RxState::SeekingHeader);

    // the next packet for us still lands
    pair.b.transport_mut().push_inbound(&PACKET_FOR_B);
    pair.b.poll_input();
    assert_eq!(pair.b.read(3), Some(42));
}

fn foreign_packet(entries: Vec<(u8, i16)>) -> Vec<u8> {
    packet::encode(&Packet { address: 0x09, entries }, Framing::default()).unwrap()
}

#[test]
fn test_foreign_ack_byte_does_not_acknowledge_our_packet() {
    let mut pair = Pair::default_pair();
    pair.b.publish(0, 1).unwrap();
    transmit_whole_packet(&mut pair.b);
    assert_eq!(pair.b.tx_state(), TxState::AwaitingAck);

    // index 6 is the ACK byte
    pair.b.transport_mut().push_inbound(&foreign_packet(vec![(6, 0)]));
    assert!(pair.b.poll_input().is_empty());
    assert_eq!(pair.b.tx_state(), TxState::AwaitingAck);
}

#[test]
fn test_foreign_header_pair_does_not_start_a_frame() {
    let mut pair = Pair::default_pair();
    // value bytes '<' 0x02 look like the start of a packet for us
    pair.b.transport_mut().push_inbound(&foreign_packet(vec![(0, 0x3C02)]));

    assert!(pair.b.poll_input().is_empty());
    assert!(!pair.b.take_read_error(false));
    assert_eq!(pair.b.transport().outbound_len(), 0);
    assert_eq!(pair.b.rx_state(), RxState::SeekingHeader);
}

#[test]
fn test_foreign_resend_command_does_not_dirty_table() {
    let mut pair = Pair::default_pair();
    // -275 is 0xFEED on the wire
    pair.b.transport_mut().push_inbound(&foreign_packet(vec![(1, -275)]));

    assert!(pair.b.poll_input().is_empty());
    assert!(pair.b.service().is_empty());
    assert_eq!(pair.b.tx_state(), TxState::Idle);
}

#[test]
fn test_buffer_overflow_requests_full_resync() {
    let mut b = Pair::default_pair().b;
    let capacity = config_b().buffer_capacity;
    let mut bytes = vec![0x3C, ADDR_B];
    bytes.extend(std::iter::repeat(0x00).take(capacity));
    b.transport_mut().push_inbound(&bytes);

    let events = b.poll_input();
    assert_eq!(events, vec![LinkEvent::Fault(Fault::BufferOverflow)]);
    assert!(b.take_read_error(true));
    assert_eq!(b.transport_mut().drain_outbound(), vec![0xFE, 0xED]);
    assert_eq!(b.rx_state(), RxState::SeekingHeader);
}

#[test]
fn test_noise_between_packets_is_skipped() {
    let config = config_b();
    let mut rng = StdRng::seed_from_u64(0x5EED);
    let mut b = Pair::default_pair().b;

    for _ in 0..50 {
        let noise: Vec<u8> = (0..rng.gen_range(0..20))
            .map(|_| rng.gen::<u8>())
            .filter(|&byte| {
                byte != config.header && byte != config.ack && byte != config.nack && byte != 0xFE
            })
            .collect();
        b.transport_mut().push_inbound(&noise);
        b.transport_mut().push_inbound(&PACKET_FOR_B);
    }

    let events = b.poll_input();
    assert_eq!(
        count(&events, |e| matches!(e, LinkEvent::DataApplied { .. })),
        50
    );
    assert!(!b.take_read_error(false));
    assert_eq!(b.transport_mut().drain_outbound(), vec![0x06; 50]);
}

#[test]
fn test_corrupted_packet_nacked_and_resent() {
    let mut pair = Pair::default_pair();
    pair.a.publish(4, 77).unwrap();
    pair.a.service();
    let mut wire = transmit_whole_packet(&mut pair.a);
    wire[4] ^= 0x40;

    pair.b.transport_mut().push_inbound(&wire);
    let events = pair.b.poll_input();
    assert!(matches!(
        events.as_slice(),
        [LinkEvent::Fault(Fault::ChecksumMismatch { .. })]
    ));
    assert!(pair.b.take_read_error(true));

    pair.shuttle();
    let events = pair.a.poll_input();
    assert_eq!(
        events,
        vec![LinkEvent::Nacked, LinkEvent::Retransmitting { attempt: 1 }]
    );

    pair.run(20);
    assert_eq!(pair.b.read(4), Some(77));
    assert_eq!(pair.a.tx_state(), TxState::Idle);
    assert!(!pair.a.take_transmission_error(false));
}

#[test]
fn test_unknown_index_keeps_earlier_entries() {
    let mut pair = Pair::new(config_a().with_table_capacity(30), config_b());
    pair.a.publish(2, 11).unwrap();
    pair.a.publish(25, 3).unwrap();
    pair.a.service();
    let wire = transmit_whole_packet(&mut pair.a);

    pair.b.transport_mut().push_inbound(&wire);
    let events = pair.b.poll_input();
    assert_eq!(
        events,
        vec![
            LinkEvent::DataApplied { entries: 1 },
            LinkEvent::Fault(Fault::UnknownIndex(25))
        ]
    );
    assert_eq!(pair.b.read(2), Some(11));
    assert!(pair.b.take_read_error(false));
    assert!(pair.b.take_new_data(false));
    // not acknowledged
    assert_eq!(pair.b.transport().outbound_len(), 0);
}

#[test]
fn test_stale_partial_packet_triggers_full_resync() {
    let mut pair = Pair::default_pair();
    pair.a.publish(6, -6).unwrap();
    pair.run(30);
    assert_eq!(pair.b.read(6), Some(-6));

    // half a packet, then silence
    pair.b.transport_mut().push_inbound(&PACKET_FOR_B[..4]);
    pair.b.poll_input();
    pair.clock.advance(151);
    let events = pair.b.poll_input();
    assert_eq!(events, vec![LinkEvent::Fault(Fault::StalePartialPacket)]);
    assert!(pair.b.take_read_error(true));

    pair.shuttle();
    assert_eq!(pair.a.poll_input(), vec![LinkEvent::ResendAllRequested]);
    assert_eq!(pair.a.service(), vec![LinkEvent::PacketBuilt { entries: 20 }]);
}

#[test]
fn test_both_directions_converge() {
    let mut pair = Pair::default_pair();
    pair.a.publish(0, 1000).unwrap();
    pair.a.publish(19, -1).unwrap();
    pair.b.publish(10, 12345).unwrap();

    pair.run(40);

    assert_eq!(pair.b.read(0), Some(1000));
    assert_eq!(pair.b.read(19), Some(-1));
    assert_eq!(pair.a.read(10), Some(12345));
    assert_eq!(pair.a.tx_state(), TxState::Idle);
    assert_eq!(pair.b.tx_state(), TxState::Idle);
    assert!(pair.a.take_new_data(true));
    assert!(pair.b.take_new_data(true));
    assert!(!pair.a.take_read_error(false));
    assert!(!pair.b.take_read_error(false));
}

proptest! {
    #[test]
    fn prop_checksum_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..128)) {
        prop_assert_eq!(
            serial_datalink::crc16::checksum(&bytes),
            serial_datalink::crc16::checksum(&bytes.clone())
        );
    }

    #[test]
    fn prop_encode_decode_roundtrip(
        values in proptest::collection::btree_map(0u8..20, any::<i16>(), 1..20),
        address in any::<u8>(),
    ) {
        let packet = Packet {
            address,
            entries: values.into_iter().collect(),
        };
        let wire = packet::encode(&packet, Framing::default()).unwrap();
        prop_assert_eq!(packet::decode(&wire, Framing::default()).unwrap(), packet);
    }

    #[test]
    fn prop_peer_converges(
        writes in proptest::collection::vec((0u8..20, any::<i16>()), 1..40),
    ) {
        let mut pair = Pair::default_pair();
        for &(index, value) in &writes {
            pair.a.publish(index, value).unwrap();
        }
        pair.run(150);
        for idx in 0..20u8 {
            prop_assert_eq!(pair.b.read(idx), pair.a.local_value(idx));
        }
        prop_assert!(!pair.b.take_read_error(false));
    }
}
