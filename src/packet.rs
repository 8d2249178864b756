//! MQTT 3.1.1 control packet codec.
//!
//! Serializes outbound packets into the caller-supplied fixed-capacity send
//! buffer and parses complete inbound frames out of the receive buffer. The
//! codec performs no I/O: moving the framed bytes is the session
//! controller's job.

use heapless::Vec;

use crate::client::ConnectOptions;
use crate::error::Error;
use crate::handler::{Message, QoS};

// MQTT Control Packet types, as fixed header first bytes (type + flags).
pub(crate) const CONNECT: u8 = 0x10;
pub(crate) const CONNACK: u8 = 0x20;
pub(crate) const PUBLISH: u8 = 0x30;
pub(crate) const PUBACK: u8 = 0x40;
pub(crate) const PUBREC: u8 = 0x50;
pub(crate) const PUBREL: u8 = 0x62;
pub(crate) const PUBCOMP: u8 = 0x70;
pub(crate) const SUBSCRIBE: u8 = 0x82;
pub(crate) const SUBACK: u8 = 0x90;
pub(crate) const UNSUBSCRIBE: u8 = 0xA2;
pub(crate) const UNSUBACK: u8 = 0xB0;
pub(crate) const PINGREQ: u8 = 0xC0;
pub(crate) const PINGRESP: u8 = 0xD0;
pub(crate) const DISCONNECT: u8 = 0xE0;

// Protocol constants defined by the MQTT 3.1.1 specification.
const PROTOCOL_NAME: &[u8] = b"MQTT";
const PROTOCOL_LEVEL: u8 = 4; // MQTT 3.1.1

/// DUP bit in a PUBLISH fixed header.
pub(crate) const DUP_FLAG: u8 = 0x08;

/// Largest value a remaining-length varint can carry (4 bytes).
pub(crate) const MAX_REMAINING_LEN: usize = 268_435_455;

/// A complete PINGREQ frame.
pub(crate) const PINGREQ_FRAME: [u8; 2] = [PINGREQ, 0];
/// A complete DISCONNECT frame.
pub(crate) const DISCONNECT_FRAME: [u8; 2] = [DISCONNECT, 0];

/// Builds one of the two-byte-header acknowledgment frames
/// (PUBACK/PUBREC/PUBREL/PUBCOMP) carrying a packet identifier.
pub(crate) fn ack_frame(first_byte: u8, packet_id: u16) -> [u8; 4] {
    let id = packet_id.to_be_bytes();
    [first_byte, 2, id[0], id[1]]
}

/// A parsed inbound PUBLISH, borrowing the receive buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct InboundPublish<'a> {
    pub topic: &'a str,
    pub packet_id: Option<u16>,
    pub qos: QoS,
    pub dup: bool,
    pub retained: bool,
    pub payload: &'a [u8],
}

/// A validated inbound control packet.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Packet<'a> {
    ConnAck { session_present: bool, return_code: u8 },
    Publish(InboundPublish<'a>),
    PubAck { packet_id: u16 },
    PubRec { packet_id: u16 },
    PubRel { packet_id: u16 },
    PubComp { packet_id: u16 },
    SubAck { packet_id: u16, return_code: u8 },
    UnsubAck { packet_id: u16 },
    PingResp,
}

fn put<const N: usize>(buf: &mut Vec<u8, N>, byte: u8) -> Result<(), Error> {
    buf.push(byte).map_err(|_| Error::BufferOverflow)
}

fn put_slice<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<(), Error> {
    buf.extend_from_slice(bytes).map_err(|_| Error::BufferOverflow)
}

fn put_u16<const N: usize>(buf: &mut Vec<u8, N>, value: u16) -> Result<(), Error> {
    put_slice(buf, &value.to_be_bytes())
}

// Length-prefixed string/bytes field.
fn put_field<const N: usize>(buf: &mut Vec<u8, N>, bytes: &[u8]) -> Result<(), Error> {
    if bytes.len() > u16::MAX as usize {
        return Err(Error::BufferOverflow);
    }
    put_u16(buf, bytes.len() as u16)?;
    put_slice(buf, bytes)
}

/// Appends the remaining-length varint (1-4 bytes) for `len`.
pub(crate) fn encode_remaining_length<const N: usize>(
    buf: &mut Vec<u8, N>,
    mut len: usize,
) -> Result<(), Error> {
    if len > MAX_REMAINING_LEN {
        return Err(Error::BufferOverflow);
    }
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        put(buf, byte)?;
        if len == 0 {
            return Ok(());
        }
    }
}

/// Decodes a remaining-length varint from `bytes`.
///
/// Returns `Ok(None)` when more bytes are needed, `Ok(Some((value, nbytes)))`
/// once complete, and `Err(MalformedPacket)` for encodings longer than 4
/// bytes. Resumable: the session controller calls this after every header
/// byte it receives.
pub(crate) fn decode_remaining_length(bytes: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let mut value = 0usize;
    let mut multiplier = 1usize;
    for (i, &byte) in bytes.iter().enumerate() {
        if i == 4 {
            return Err(Error::MalformedPacket);
        }
        value += (byte as usize & 0x7F) * multiplier;
        multiplier *= 128;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if bytes.len() >= 4 {
        return Err(Error::MalformedPacket);
    }
    Ok(None)
}

/// Encodes a CONNECT packet into `buf`.
///
/// The buffer is cleared first; on error nothing is handed to the transport
/// and the buffer content is unspecified.
pub(crate) fn encode_connect<const N: usize>(
    buf: &mut Vec<u8, N>,
    options: &ConnectOptions<'_>,
) -> Result<(), Error> {
    let mut flags = 0u8;
    if options.clean_session {
        flags |= 0x02;
    }
    let mut remaining = 10 + 2 + options.client_id.len();
    if let Some(will) = &options.will {
        flags |= 0x04 | ((will.qos as u8) << 3);
        if will.retained {
            flags |= 0x20;
        }
        remaining += 2 + will.topic.len() + 2 + will.payload.len();
    }
    if let Some(username) = options.username {
        flags |= 0x80;
        remaining += 2 + username.len();
    }
    if let Some(password) = options.password {
        flags |= 0x40;
        remaining += 2 + password.len();
    }

    buf.clear();
    put(buf, CONNECT)?;
    encode_remaining_length(buf, remaining)?;

    // Variable header
    put_field(buf, PROTOCOL_NAME)?;
    put(buf, PROTOCOL_LEVEL)?;
    put(buf, flags)?;
    put_u16(buf, options.keep_alive_seconds)?;

    // Payload
    put_field(buf, options.client_id.as_bytes())?;
    if let Some(will) = &options.will {
        put_field(buf, will.topic.as_bytes())?;
        put_field(buf, will.payload)?;
    }
    if let Some(username) = options.username {
        put_field(buf, username.as_bytes())?;
    }
    if let Some(password) = options.password {
        put_field(buf, password)?;
    }
    Ok(())
}

/// Encodes a PUBLISH packet into `buf`.
///
/// `packet_id` must be `Some` exactly when `message.qos` is above
/// [`QoS::AtMostOnce`].
pub(crate) fn encode_publish<const N: usize>(
    buf: &mut Vec<u8, N>,
    topic: &str,
    message: &Message<'_>,
    packet_id: Option<u16>,
) -> Result<(), Error> {
    debug_assert_eq!(packet_id.is_some(), message.qos != QoS::AtMostOnce);

    let mut first = PUBLISH | ((message.qos as u8) << 1);
    if message.dup {
        first |= DUP_FLAG;
    }
    if message.retained {
        first |= 0x01;
    }
    let mut remaining = 2 + topic.len() + message.payload.len();
    if packet_id.is_some() {
        remaining += 2;
    }

    buf.clear();
    put(buf, first)?;
    encode_remaining_length(buf, remaining)?;
    put_field(buf, topic.as_bytes())?;
    if let Some(id) = packet_id {
        put_u16(buf, id)?;
    }
    put_slice(buf, message.payload)
}

/// Encodes a SUBSCRIBE packet for a single topic filter.
pub(crate) fn encode_subscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    packet_id: u16,
    filter: &str,
    qos: QoS,
) -> Result<(), Error> {
    buf.clear();
    put(buf, SUBSCRIBE)?;
    encode_remaining_length(buf, 2 + 2 + filter.len() + 1)?;
    put_u16(buf, packet_id)?;
    put_field(buf, filter.as_bytes())?;
    put(buf, qos as u8)
}

/// Encodes an UNSUBSCRIBE packet for a single topic filter.
pub(crate) fn encode_unsubscribe<const N: usize>(
    buf: &mut Vec<u8, N>,
    packet_id: u16,
    filter: &str,
) -> Result<(), Error> {
    buf.clear();
    put(buf, UNSUBSCRIBE)?;
    encode_remaining_length(buf, 2 + 2 + filter.len())?;
    put_u16(buf, packet_id)?;
    put_field(buf, filter.as_bytes())
}

fn read_u16(bytes: &[u8]) -> Result<u16, Error> {
    if bytes.len() < 2 {
        return Err(Error::MalformedPacket);
    }
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn packet_id_body(body: &[u8]) -> Result<u16, Error> {
    if body.len() != 2 {
        return Err(Error::MalformedPacket);
    }
    let id = read_u16(body)?;
    if id == 0 {
        return Err(Error::MalformedPacket);
    }
    Ok(id)
}

/// Parses and validates one complete inbound frame.
///
/// `frame` must span exactly one packet, fixed header included; the session
/// controller assembles it from possibly partial transport reads first.
/// Length fields are never trusted beyond the frame's actual extent.
pub(crate) fn decode(frame: &[u8]) -> Result<Packet<'_>, Error> {
    if frame.len() < 2 {
        return Err(Error::MalformedPacket);
    }
    let first = frame[0];
    let (remaining, header_len) =
        decode_remaining_length(&frame[1..])?.ok_or(Error::MalformedPacket)?;
    if frame.len() != 1 + header_len + remaining {
        return Err(Error::MalformedPacket);
    }
    let body = &frame[1 + header_len..];

    match first & 0xF0 {
        CONNACK => {
            if first != CONNACK || body.len() != 2 || body[0] & 0xFE != 0 {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::ConnAck {
                session_present: body[0] & 0x01 != 0,
                return_code: body[1],
            })
        }
        PUBLISH => {
            let qos = QoS::from_bits((first >> 1) & 0b11).ok_or(Error::MalformedPacket)?;
            let dup = first & DUP_FLAG != 0;
            // The DUP flag is reserved to retransmissions, which QoS0 never has.
            if dup && qos == QoS::AtMostOnce {
                return Err(Error::MalformedPacket);
            }
            let topic_len = read_u16(body)? as usize;
            if body.len() < 2 + topic_len {
                return Err(Error::MalformedPacket);
            }
            let topic = core::str::from_utf8(&body[2..2 + topic_len])
                .map_err(|_| Error::MalformedPacket)?;
            if topic.is_empty() {
                return Err(Error::MalformedPacket);
            }
            let mut offset = 2 + topic_len;
            let packet_id = if qos != QoS::AtMostOnce {
                let id = read_u16(&body[offset..])?;
                if id == 0 {
                    return Err(Error::MalformedPacket);
                }
                offset += 2;
                Some(id)
            } else {
                None
            };
            Ok(Packet::Publish(InboundPublish {
                topic,
                packet_id,
                qos,
                dup,
                retained: first & 0x01 != 0,
                payload: &body[offset..],
            }))
        }
        0x40 => {
            if first != PUBACK {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::PubAck {
                packet_id: packet_id_body(body)?,
            })
        }
        0x50 => {
            if first != PUBREC {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::PubRec {
                packet_id: packet_id_body(body)?,
            })
        }
        0x60 => {
            // PUBREL carries mandatory 0b0010 flags.
            if first != PUBREL {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::PubRel {
                packet_id: packet_id_body(body)?,
            })
        }
        0x70 => {
            if first != PUBCOMP {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::PubComp {
                packet_id: packet_id_body(body)?,
            })
        }
        0x90 => {
            // One return code: the engine subscribes one filter per packet.
            if first != SUBACK || body.len() != 3 {
                return Err(Error::MalformedPacket);
            }
            let packet_id = read_u16(body)?;
            let return_code = body[2];
            if packet_id == 0 || !matches!(return_code, 0 | 1 | 2 | 0x80) {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::SubAck {
                packet_id,
                return_code,
            })
        }
        0xB0 => {
            if first != UNSUBACK {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::UnsubAck {
                packet_id: packet_id_body(body)?,
            })
        }
        0xD0 => {
            if first != PINGRESP || !body.is_empty() {
                return Err(Error::MalformedPacket);
            }
            Ok(Packet::PingResp)
        }
        // Anything else is never broker-to-client traffic in MQTT 3.1.1.
        _ => Err(Error::MalformedPacket),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Will;

    fn varint<const N: usize>(len: usize) -> Vec<u8, N> {
        let mut buf = Vec::new();
        encode_remaining_length(&mut buf, len).unwrap();
        buf
    }

    #[test]
    fn remaining_length_boundaries() {
        assert_eq!(varint::<8>(0).as_slice(), &[0x00]);
        assert_eq!(varint::<8>(127).as_slice(), &[0x7F]);
        assert_eq!(varint::<8>(128).as_slice(), &[0x80, 0x01]);
        assert_eq!(varint::<8>(16_383).as_slice(), &[0xFF, 0x7F]);
        assert_eq!(varint::<8>(16_384).as_slice(), &[0x80, 0x80, 0x01]);
        assert_eq!(
            varint::<8>(MAX_REMAINING_LEN).as_slice(),
            &[0xFF, 0xFF, 0xFF, 0x7F]
        );

        let mut buf: Vec<u8, 8> = Vec::new();
        assert_eq!(
            encode_remaining_length(&mut buf, MAX_REMAINING_LEN + 1),
            Err(Error::BufferOverflow)
        );
    }

    #[test]
    fn remaining_length_decode_is_resumable() {
        assert_eq!(decode_remaining_length(&[]), Ok(None));
        assert_eq!(decode_remaining_length(&[0x80]), Ok(None));
        assert_eq!(decode_remaining_length(&[0x80, 0x01]), Ok(Some((128, 2))));
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0x7F]),
            Ok(Some((MAX_REMAINING_LEN, 4)))
        );
        // A fifth continuation byte is forbidden by the specification.
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80]),
            Err(Error::MalformedPacket)
        );
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]),
            Err(Error::MalformedPacket)
        );
    }

    #[test]
    fn connect_encoding_matches_wire_layout() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let options = ConnectOptions::new("TEST-ID")
            .keep_alive_seconds(10)
            .clean_session(true);
        encode_connect(&mut buf, &options).unwrap();

        #[rustfmt::skip]
        let expected: &[u8] = &[
            0x10, 19,
            0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 0x0A,
            0x00, 0x07, b'T', b'E', b'S', b'T', b'-', b'I', b'D',
        ];
        assert_eq!(buf.as_slice(), expected);
    }

    #[test]
    fn connect_flags_carry_will_and_credentials() {
        let mut buf: Vec<u8, 128> = Vec::new();
        let options = ConnectOptions::new("id")
            .clean_session(false)
            .will(Will {
                topic: "w/t",
                payload: b"gone",
                qos: QoS::AtLeastOnce,
                retained: true,
            })
            .username("user")
            .password(b"pass");
        encode_connect(&mut buf, &options).unwrap();

        let flags = buf[9];
        assert_eq!(flags, 0x80 | 0x40 | 0x20 | (1 << 3) | 0x04);
        // Payload order: client id, will topic, will payload, username, password.
        let payload = &buf[12..];
        assert_eq!(&payload[..4], &[0x00, 0x02, b'i', b'd']);
        assert_eq!(&payload[4..9], &[0x00, 0x03, b'w', b'/', b't']);
        assert_eq!(&payload[9..15], &[0x00, 0x04, b'g', b'o', b'n', b'e']);
    }

    #[test]
    fn publish_roundtrip_qos1() {
        let mut buf: Vec<u8, 64> = Vec::new();
        let message = Message {
            qos: QoS::AtLeastOnce,
            retained: false,
            dup: false,
            payload: b"Test Message !!!",
        };
        encode_publish(&mut buf, "test/TEST-ID/sub", &message, Some(42)).unwrap();

        match decode(&buf).unwrap() {
            Packet::Publish(publish) => {
                assert_eq!(publish.topic, "test/TEST-ID/sub");
                assert_eq!(publish.packet_id, Some(42));
                assert_eq!(publish.qos, QoS::AtLeastOnce);
                assert_eq!(publish.payload, b"Test Message !!!");
                assert!(!publish.dup);
                assert!(!publish.retained);
            }
            other => panic!("unexpected packet: {other:?}"),
        }
    }

    #[test]
    fn publish_encode_rejects_oversized_frame() {
        let mut buf: Vec<u8, 16> = Vec::new();
        let message = Message {
            qos: QoS::AtMostOnce,
            retained: false,
            dup: false,
            payload: &[0u8; 32],
        };
        assert_eq!(
            encode_publish(&mut buf, "t", &message, None),
            Err(Error::BufferOverflow)
        );
    }

    #[test]
    fn malformed_frames_are_rejected() {
        // QoS bits set to 3.
        assert_eq!(
            decode(&[0x36, 3, 0x00, 0x01, b't']),
            Err(Error::MalformedPacket)
        );
        // DUP on a QoS0 publish.
        assert_eq!(
            decode(&[0x38, 3, 0x00, 0x01, b't']),
            Err(Error::MalformedPacket)
        );
        // Topic length overruns the frame.
        assert_eq!(decode(&[0x30, 2, 0x00, 0x09]), Err(Error::MalformedPacket));
        // Remaining length disagrees with the frame extent.
        assert_eq!(
            decode(&[0x20, 5, 0x00, 0x00]),
            Err(Error::MalformedPacket)
        );
        // PUBREL without its mandatory flags.
        assert_eq!(
            decode(&[0x60, 2, 0x00, 0x01]),
            Err(Error::MalformedPacket)
        );
        // Zero packet identifier.
        assert_eq!(
            decode(&[0x40, 2, 0x00, 0x00]),
            Err(Error::MalformedPacket)
        );
        // Server-bound packet type (SUBSCRIBE) arriving inbound.
        assert_eq!(
            decode(&[0x82, 5, 0x00, 0x01, 0x00, 0x01, b't']),
            Err(Error::MalformedPacket)
        );
    }

    #[test]
    fn acks_and_pingresp_decode() {
        assert_eq!(
            decode(&ack_frame(PUBACK, 7)),
            Ok(Packet::PubAck { packet_id: 7 })
        );
        assert_eq!(
            decode(&ack_frame(PUBREL, 7)),
            Ok(Packet::PubRel { packet_id: 7 })
        );
        assert_eq!(decode(&[0xD0, 0]), Ok(Packet::PingResp));
        assert_eq!(
            decode(&[0x90, 3, 0x00, 0x02, 0x80]),
            Ok(Packet::SubAck {
                packet_id: 2,
                return_code: 0x80
            })
        );
        assert_eq!(
            decode(&[0x20, 2, 0x01, 0x00]),
            Ok(Packet::ConnAck {
                session_present: true,
                return_code: 0
            })
        );
    }
}
