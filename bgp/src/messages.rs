// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::error::{Error, ExpectationMismatch};
use nom::{
    bytes::complete::take,
    number::complete::{be_u16, be_u32, u8 as parse_u8},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::net::Ipv4Addr;

pub const MAX_MESSAGE_SIZE: usize = 4096;

/// BGP Message types.
///
/// Ref: RFC 4271 §4.1
#[derive(
    Debug, Eq, PartialEq, TryFromPrimitive, IntoPrimitive, Copy, Clone,
)]
#[repr(u8)]
pub enum MessageType {
    /// The first message sent by each side once a TCP connection is
    /// established.
    ///
    /// RFC 4271 §4.2
    Open = 1,

    /// Used to transfer routing information between BGP peers.
    ///
    /// RFC 4271 §4.3
    Update = 2,

    /// Sent when an error condition is detected.
    ///
    /// RFC 4271 §4.5
    Notification = 3,

    /// Exchanged between peers often enough not to cause the hold timer to
    /// expire.
    ///
    /// RFC 4271 §4.4
    KeepAlive = 4,
}

impl From<&Message> for MessageType {
    fn from(m: &Message) -> Self {
        match m {
            Message::Open(_) => Self::Open,
            Message::Update(_) => Self::Update,
            Message::Notification(_) => Self::Notification,
            Message::KeepAlive => Self::KeepAlive,
        }
    }
}

/// A BGP message body. UPDATE and NOTIFICATION bodies are carried as opaque
/// octets; only OPEN is decoded into fields.
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum Message {
    Open(OpenMessage),
    Update(Vec<u8>),
    Notification(Vec<u8>),
    KeepAlive,
}

impl Message {
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        match self {
            Self::Open(m) => m.to_wire(),
            Self::Update(body) | Self::Notification(body) => Ok(body.clone()),
            Self::KeepAlive => Ok(Vec::new()),
        }
    }

    /// Build a complete wire message, header included.
    pub fn to_frame(&self) -> Result<Vec<u8>, Error> {
        let body = self.to_wire()?;
        let length = body.len() + Header::WIRE_SIZE;
        if length > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge(format!(
                "{:?} message of {length} bytes",
                MessageType::from(self)
            )));
        }
        let header =
            Header::new(length as u16, MessageType::from(self).into())?;
        let mut buf = header.to_wire().to_vec();
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Decode a message body according to the type carried in its header.
    pub fn from_wire(header: &Header, body: &[u8]) -> Result<Message, Error> {
        let expected = header.body_len();
        if body.len() != expected {
            return Err(Error::BadLength(ExpectationMismatch {
                expected,
                got: body.len(),
            }));
        }
        match header.message_type()? {
            MessageType::Open => Ok(OpenMessage::from_wire(body)?.into()),
            MessageType::Update => Ok(Message::Update(body.to_vec())),
            MessageType::Notification => {
                Ok(Message::Notification(body.to_vec()))
            }
            MessageType::KeepAlive => {
                if !body.is_empty() {
                    return Err(Error::BadLength(ExpectationMismatch {
                        expected: 0,
                        got: body.len(),
                    }));
                }
                Ok(Message::KeepAlive)
            }
        }
    }
}

impl From<OpenMessage> for Message {
    fn from(m: OpenMessage) -> Message {
        Message::Open(m)
    }
}

/// Each BGP message has a fixed sized header.
///
/// ```text
/// 0                   1                   2                   3
/// 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |                                                               |
///   +                                                               +
///   |                                                               |
///   +                                                               +
///   |                           Marker                              |
///   +                                                               +
///   |                                                               |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///   |          Length               |      Type     |
///   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// This object contains the length and type fields. The marker is written by
/// [`Header::to_wire`] and checked by [`Header::from_wire`]. The type is kept
/// as a raw octet so that headers of unknown types can still be framed; use
/// [`Header::message_type`] to dispatch on it.
///
/// Ref: RFC 4271 §4.1
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Header {
    /// Total length of the message, including the header. May be no larger than
    /// 4096.
    pub length: u16,

    /// Indicates the type of message.
    pub typ: u8,
}

/// According to RFC 4271 §4.1 the header marker is all ones.
pub const MARKER: [u8; 16] = [0xFFu8; 16];

impl Header {
    pub const WIRE_SIZE: usize = 19;

    /// Create a new BGP message header. Length must be between 19 and 4096 per
    /// RFC 4271 §4.1.
    pub fn new(length: u16, typ: u8) -> Result<Header, Error> {
        Self::check_length(length)?;
        Ok(Header { length, typ })
    }

    fn check_length(length: u16) -> Result<(), Error> {
        if usize::from(length) < Header::WIRE_SIZE {
            return Err(Error::TooSmall(format!(
                "message header length {length}"
            )));
        }
        if usize::from(length) > MAX_MESSAGE_SIZE {
            return Err(Error::TooLarge(format!(
                "message header length {length}"
            )));
        }
        Ok(())
    }

    /// Serialize the header to wire format.
    pub fn to_wire(&self) -> [u8; Header::WIRE_SIZE] {
        let mut buf = [0u8; Header::WIRE_SIZE];
        buf[..16].copy_from_slice(&MARKER);
        buf[16..18].copy_from_slice(&self.length.to_be_bytes());
        buf[18] = self.typ;
        buf
    }

    /// Deserialize a header from wire format.
    pub fn from_wire(input: &[u8]) -> Result<Header, Error> {
        if input.len() < Header::WIRE_SIZE {
            return Err(Error::TooSmall(format!(
                "message header: {} bytes",
                input.len()
            )));
        }
        let (input, marker) = take(MARKER.len())(input)?;
        if marker != MARKER.as_slice() {
            return Err(Error::NoMarker);
        }
        let (input, length) = be_u16(input)?;
        let (_, typ) = parse_u8(input)?;
        Self::check_length(length)?;
        Ok(Header { length, typ })
    }

    pub fn message_type(&self) -> Result<MessageType, Error> {
        MessageType::try_from(self.typ)
            .map_err(|_| Error::UnknownMessageType(self.typ))
    }

    /// Number of body octets that follow this header on the wire.
    pub fn body_len(&self) -> usize {
        usize::from(self.length).saturating_sub(Header::WIRE_SIZE)
    }
}

/// The version number for BGP-4
pub const BGP4: u8 = 4;

/// The first message sent by each side once a TCP connection is established.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |    Version    |     My Autonomous System      |   Hold Time   :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :               |                BGP Identifier                 :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :               | Opt Parm Len  |     Optional Parameters       :
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// :                                                               :
/// :             Optional Parameters (cont, variable)              :
/// :                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// The optional parameter length is not stored. It is always derived from
/// `parameters` when serializing.
///
/// Ref: RFC 4271 §4.2
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct OpenMessage {
    /// BGP protocol version.
    pub version: u8,

    /// Autonomous system number of the sender.
    pub asn: u16,

    /// Number of seconds the sender proposes for the hold timer.
    pub hold_time: u16,

    /// BGP identifier of the sender
    pub id: Ipv4Addr,

    /// Raw optional parameter octets.
    pub parameters: Vec<u8>,
}

impl OpenMessage {
    /// Size of the fixed portion of an open message.
    pub const FIXED_SIZE: usize = 10;

    pub fn new(asn: u16, hold_time: u16, id: Ipv4Addr) -> OpenMessage {
        OpenMessage {
            version: BGP4,
            asn,
            hold_time,
            id,
            parameters: Vec::new(),
        }
    }

    /// Serilize an open message to wire format.
    pub fn to_wire(&self) -> Result<Vec<u8>, Error> {
        if self.parameters.len() > u8::MAX as usize {
            return Err(Error::TooLarge(
                "open message optional parameters".into(),
            ));
        }

        let mut buf =
            Vec::with_capacity(Self::FIXED_SIZE + self.parameters.len());

        // version
        buf.push(self.version);

        // as
        buf.extend_from_slice(&self.asn.to_be_bytes());

        // hold time
        buf.extend_from_slice(&self.hold_time.to_be_bytes());

        // id
        buf.extend_from_slice(&self.id.octets());

        // opt param len
        buf.push(self.parameters.len() as u8);
        buf.extend_from_slice(&self.parameters);

        Ok(buf)
    }

    /// Deserialize an open message from wire format.
    pub fn from_wire(input: &[u8]) -> Result<OpenMessage, Error> {
        if input.len() < Self::FIXED_SIZE {
            return Err(Error::TooSmall(format!(
                "open message: {} bytes",
                input.len()
            )));
        }
        let (input, version) = parse_u8(input)?;
        let (input, asn) = be_u16(input)?;
        let (input, hold_time) = be_u16(input)?;
        let (input, id) = be_u32(input)?;
        let (input, param_len) = parse_u8(input)?;
        let param_len = usize::from(param_len);

        if input.len() < param_len {
            return Err(Error::TooSmall(
                "open message optional parameters".into(),
            ));
        }
        let (rest, parameters) = take(param_len)(input)?;
        if !rest.is_empty() {
            return Err(Error::BadLength(ExpectationMismatch {
                expected: param_len,
                got: param_len + rest.len(),
            }));
        }

        Ok(OpenMessage {
            version,
            asn,
            hold_time,
            id: Ipv4Addr::from(id),
            parameters: parameters.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pretty_hex::*;

    #[test]
    fn header_round_trip() {
        let h0 = Header {
            length: 0x0701,
            typ: MessageType::Notification.into(),
        };

        let buf = h0.to_wire();
        println!("buf: {}", buf.hex_dump());

        assert_eq!(
            buf.to_vec(),
            vec![
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
                0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // marker
                0x07, 0x01, // length
                3,    // type
            ]
        );

        let h1 = Header::from_wire(&buf).expect("header from wire");
        assert_eq!(h0, h1);
    }

    #[test]
    fn header_round_trip_bounds_and_raw_types() {
        for length in [19u16, 20, 29, 4095, 4096] {
            for typ in [0u8, 1, 4, 5, 0xff] {
                let h0 = Header::new(length, typ).expect("valid header");
                let h1 =
                    Header::from_wire(&h0.to_wire()).expect("header from wire");
                assert_eq!(h0, h1);
            }
        }
    }

    #[test]
    fn header_declared_length_too_small() {
        let mut buf = Header { length: 19, typ: 1 }.to_wire();
        buf[16..18].copy_from_slice(&5u16.to_be_bytes());
        assert!(matches!(Header::from_wire(&buf), Err(Error::TooSmall(_))));
    }

    #[test]
    fn header_declared_length_too_large() {
        let mut buf = Header { length: 19, typ: 1 }.to_wire();
        buf[16..18].copy_from_slice(&4097u16.to_be_bytes());
        assert!(matches!(Header::from_wire(&buf), Err(Error::TooLarge(_))));
        assert!(Header::new(4097, 1).is_err());
        assert!(Header::new(18, 1).is_err());
    }

    #[test]
    fn header_truncated() {
        let buf = Header { length: 19, typ: 4 }.to_wire();
        let err = Header::from_wire(&buf[..10]).unwrap_err();
        assert!(matches!(err, Error::TooSmall(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Codec);
    }

    #[test]
    fn header_bad_marker() {
        let mut buf = Header { length: 19, typ: 4 }.to_wire();
        buf[3] = 0;
        assert!(matches!(Header::from_wire(&buf), Err(Error::NoMarker)));
    }

    #[test]
    fn open_wire_layout() {
        let om = OpenMessage {
            version: BGP4,
            asn: 64512,
            hold_time: 90,
            id: Ipv4Addr::new(127, 0, 0, 1),
            parameters: vec![0xaa, 0xbb],
        };
        let buf = om.to_wire().expect("open message to wire");
        println!("buf: {}", buf.hex_dump());
        assert_eq!(
            buf,
            vec![
                4, // version
                0xfc, 0x00, // asn
                0x00, 0x5a, // hold time
                127, 0, 0, 1, // id
                2, // opt param len
                0xaa, 0xbb, // opt params
            ]
        );
    }

    #[test]
    fn open_round_trip() {
        for n in [0usize, 1, 255] {
            let om0 = OpenMessage {
                parameters: (0..n).map(|i| i as u8).collect(),
                ..OpenMessage::new(64513, 0x1234, Ipv4Addr::new(10, 0, 0, 2))
            };

            let buf = om0.to_wire().expect("open message to wire");
            assert_eq!(buf.len(), OpenMessage::FIXED_SIZE + n);

            let om1 =
                OpenMessage::from_wire(&buf).expect("open message from wire");
            assert_eq!(om0, om1);
        }
    }

    #[test]
    fn open_too_many_parameters() {
        let om = OpenMessage {
            parameters: vec![0; 256],
            ..OpenMessage::new(1, 90, Ipv4Addr::LOCALHOST)
        };
        assert!(matches!(om.to_wire(), Err(Error::TooLarge(_))));
    }

    #[test]
    fn open_truncated() {
        let om = OpenMessage {
            parameters: vec![1, 2, 3],
            ..OpenMessage::new(1, 90, Ipv4Addr::LOCALHOST)
        };
        let buf = om.to_wire().expect("open message to wire");

        assert!(matches!(
            OpenMessage::from_wire(&buf[..9]),
            Err(Error::TooSmall(_))
        ));
        assert!(matches!(
            OpenMessage::from_wire(&buf[..buf.len() - 1]),
            Err(Error::TooSmall(_))
        ));
    }

    #[test]
    fn open_trailing_octets() {
        let mut buf = OpenMessage::new(1, 90, Ipv4Addr::LOCALHOST)
            .to_wire()
            .expect("open message to wire");
        buf.push(0);
        assert!(matches!(
            OpenMessage::from_wire(&buf),
            Err(Error::BadLength(_))
        ));
    }

    #[test]
    fn frame_dispatch() {
        let open: Message =
            OpenMessage::new(64512, 90, Ipv4Addr::new(127, 0, 0, 1)).into();
        let frame = open.to_frame().expect("open frame");
        assert_eq!(frame.len(), Header::WIRE_SIZE + OpenMessage::FIXED_SIZE);

        let header = Header::from_wire(&frame).expect("header from wire");
        assert_eq!(header.message_type().unwrap(), MessageType::Open);
        assert_eq!(usize::from(header.length), frame.len());

        let decoded = Message::from_wire(&header, &frame[Header::WIRE_SIZE..])
            .expect("message from wire");
        assert_eq!(decoded, open);

        let ka = Message::KeepAlive.to_frame().expect("keepalive frame");
        assert_eq!(ka.len(), Header::WIRE_SIZE);
        let header = Header::from_wire(&ka).expect("header from wire");
        assert_eq!(
            Message::from_wire(&header, &[]).unwrap(),
            Message::KeepAlive
        );
    }

    #[test]
    fn frame_errors() {
        let header = Header::new(19, 9).unwrap();
        assert!(matches!(
            Message::from_wire(&header, &[]),
            Err(Error::UnknownMessageType(9))
        ));

        let header = Header::new(20, MessageType::KeepAlive.into()).unwrap();
        assert!(matches!(
            Message::from_wire(&header, &[0]),
            Err(Error::BadLength(_))
        ));

        let header = Header::new(40, MessageType::Update.into()).unwrap();
        assert!(matches!(
            Message::from_wire(&header, &[0; 3]),
            Err(Error::BadLength(_))
        ));

        let big = Message::Update(vec![0; MAX_MESSAGE_SIZE]);
        assert!(matches!(big.to_frame(), Err(Error::TooLarge(_))));
    }
}
