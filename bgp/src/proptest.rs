// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Property-based tests for the BGP wire format using proptest
//!
//! These tests verify that encoding then decoding is the identity for:
//! - message headers of every legal length and any type octet
//! - OPEN messages with up to 255 octets of optional parameters
//! - complete framed messages

use crate::error::Error;
use crate::messages::{
    Header, Message, MessageType, OpenMessage, BGP4, MARKER,
    MAX_MESSAGE_SIZE,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::net::Ipv4Addr;

// =============================================================================
// Strategies
// =============================================================================

/// Strategy for generating headers with a legal length and any type
fn header_strategy() -> impl Strategy<Value = Header> {
    (19u16..=4096, any::<u8>()).prop_map(|(length, typ)| Header { length, typ })
}

/// Strategy for generating OPEN messages with arbitrary fields
fn open_strategy() -> impl Strategy<Value = OpenMessage> {
    (
        any::<u16>(),
        any::<u16>(),
        any::<u32>(),
        vec(any::<u8>(), 0..=255),
    )
        .prop_map(|(asn, hold_time, id, parameters)| OpenMessage {
            version: BGP4,
            asn,
            hold_time,
            id: Ipv4Addr::from(id),
            parameters,
        })
}

/// Strategy for generating opaque UPDATE or NOTIFICATION bodies that fit in
/// a single message
fn opaque_message_strategy() -> impl Strategy<Value = Message> {
    let max = MAX_MESSAGE_SIZE - Header::WIRE_SIZE;
    prop_oneof![
        vec(any::<u8>(), 0..=max).prop_map(Message::Update),
        vec(any::<u8>(), 0..=max).prop_map(Message::Notification),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    // -------------------------------------------------------------------------
    // Header
    // -------------------------------------------------------------------------

    /// Property: header wire format round-trip is identity
    #[test]
    fn prop_header_wire_format_roundtrip(header in header_strategy()) {
        let wire = header.to_wire();
        prop_assert_eq!(&wire[..16], MARKER.as_slice());

        let decoded = Header::from_wire(&wire)
            .expect("should decode from wire");
        prop_assert_eq!(decoded, header);
        prop_assert_eq!(
            Header::new(header.length, header.typ).expect("legal header"),
            header
        );
    }

    /// Property: a header with any damaged marker octet is rejected
    #[test]
    fn prop_header_damaged_marker_rejected(
        header in header_strategy(),
        index in 0usize..16,
        value in 0u8..0xff,
    ) {
        let mut wire = header.to_wire();
        wire[index] = value;
        prop_assert!(matches!(Header::from_wire(&wire), Err(Error::NoMarker)));
    }

    /// Property: declared lengths outside 19..=4096 are rejected
    #[test]
    fn prop_header_illegal_length_rejected(
        length in prop_oneof![0u16..19, 4097u16..=u16::MAX],
        typ in any::<u8>(),
    ) {
        let mut wire = Header { length: 19, typ }.to_wire();
        wire[16..18].copy_from_slice(&length.to_be_bytes());
        prop_assert!(Header::from_wire(&wire).is_err());
        prop_assert!(Header::new(length, typ).is_err());
    }

    // -------------------------------------------------------------------------
    // OPEN
    // -------------------------------------------------------------------------

    /// Property: OPEN wire format round-trip is identity
    #[test]
    fn prop_open_wire_format_roundtrip(om in open_strategy()) {
        let wire = om.to_wire().expect("should encode to wire");
        prop_assert_eq!(
            wire.len(),
            OpenMessage::FIXED_SIZE + om.parameters.len()
        );
        prop_assert_eq!(usize::from(wire[9]), om.parameters.len());

        let decoded = OpenMessage::from_wire(&wire)
            .expect("should decode from wire");
        prop_assert_eq!(decoded, om);
    }

    /// Property: every strict prefix of an encoded OPEN is rejected
    #[test]
    fn prop_open_truncation_rejected(
        om in open_strategy(),
        cut in any::<prop::sample::Index>(),
    ) {
        let wire = om.to_wire().expect("should encode to wire");
        let len = cut.index(wire.len());
        prop_assert!(OpenMessage::from_wire(&wire[..len]).is_err());
    }

    // -------------------------------------------------------------------------
    // Framing
    // -------------------------------------------------------------------------

    /// Property: a framed OPEN decodes back to the same message
    #[test]
    fn prop_open_frame_roundtrip(om in open_strategy()) {
        let msg = Message::from(om);
        let frame = msg.to_frame().expect("should frame");

        let header = Header::from_wire(&frame).expect("should decode header");
        prop_assert_eq!(usize::from(header.length), frame.len());
        prop_assert_eq!(header.message_type().ok(), Some(MessageType::Open));

        let decoded = Message::from_wire(&header, &frame[Header::WIRE_SIZE..])
            .expect("should decode body");
        prop_assert_eq!(decoded, msg);
    }

    /// Property: opaque bodies up to the maximum message size survive framing
    #[test]
    fn prop_opaque_frame_roundtrip(msg in opaque_message_strategy()) {
        let frame = msg.to_frame().expect("should frame");
        prop_assert!(frame.len() <= MAX_MESSAGE_SIZE);

        let header = Header::from_wire(&frame).expect("should decode header");
        let decoded = Message::from_wire(&header, &frame[Header::WIRE_SIZE..])
            .expect("should decode body");
        prop_assert_eq!(decoded, msg);
    }
}
