/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//! UBX wire framing:
//! `SYNC1 SYNC2 CLASS ID LEN_LO LEN_HI PAYLOAD... CK_A CK_B`

use crate::messages::{Message, Packet};
use log::{debug, warn};

pub const UBX_PRELUDE_BYTES: [u8; 2] = [0xB5, 0x62];

/// sync(2) + class(1) + id(1) + len(2)
const HEADER_LEN: usize = 6;
const CHECKSUM_LEN: usize = 2;

/// Frames announcing a longer payload are treated as a false sync match.
/// None of the messages this driver cares about come close.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// generate a 16 bit Fletcher checksum over class, id, length and payload
pub fn checksum(bytes: &[u8]) -> [u8; 2] {
    let mut checksum = [0u8; 2];
    for b in bytes {
        checksum[0] = checksum[0].wrapping_add(*b);
        checksum[1] = checksum[1].wrapping_add(checksum[0]);
    }
    checksum
}

/// Frame a packet for transmission.
/// Returns an empty buffer if the payload can't be described by a 16 bit length.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let payload_len = packet.payload.len();
    if payload_len > u16::MAX as usize {
        warn!("payload of {} bytes cannot be framed", payload_len);
        return Vec::new();
    }
    let len_bytes = (payload_len as u16).to_le_bytes();

    let mut frame = Vec::with_capacity(HEADER_LEN + payload_len + CHECKSUM_LEN);
    frame.extend_from_slice(&UBX_PRELUDE_BYTES);
    frame.push(packet.class);
    frame.push(packet.id);
    frame.extend_from_slice(&len_bytes);
    frame.extend_from_slice(&packet.payload);
    let ck = checksum(&frame[2..]);
    frame.extend_from_slice(&ck);
    frame
}

/// Result of scanning a receive buffer
#[derive(Debug, Default)]
pub struct Decoded {
    /// Number of leading bytes the caller should discard
    pub consumed: usize,
    /// Messages found, in the order they appeared
    pub messages: Vec<Message>,
}

/// Scan `buffer` front to back for complete frames.
///
/// Bytes before a sync marker and frames with a bad checksum are consumed
/// and dropped. A partial frame at the end of the buffer is left unconsumed
/// so it can complete on a later call.
pub fn decode(buffer: &[u8]) -> Decoded {
    let mut decoded = Decoded::default();
    loop {
        let (consumed, msg) = decode_next(&buffer[decoded.consumed..]);
        decoded.consumed += consumed;
        match msg {
            Some(msg) => decoded.messages.push(msg),
            None => break,
        }
    }
    decoded
}

/// Decode the first complete frame in `buffer`.
///
/// Returns the number of bytes consumed up to and including that frame.
/// With no complete frame, the count covers only the bytes that can be
/// discarded for good.
pub fn decode_next(buffer: &[u8]) -> (usize, Option<Message>) {
    let mut idx = 0;

    while idx < buffer.len() {
        let remain = &buffer[idx..];

        // look for the beginning of a UBX header
        if remain[0] != UBX_PRELUDE_BYTES[0] {
            idx += 1;
            continue;
        }
        if remain.len() < 2 {
            break;
        }
        if remain[1] != UBX_PRELUDE_BYTES[1] {
            idx += 1;
            continue;
        }
        if remain.len() < HEADER_LEN {
            break;
        }

        let payload_len = u16::from_le_bytes([remain[4], remain[5]]) as usize;
        if payload_len > MAX_PAYLOAD_LEN {
            debug!("implausible length {}, resyncing", payload_len);
            idx += 1;
            continue;
        }
        let frame_len = HEADER_LEN + payload_len + CHECKSUM_LEN;
        if remain.len() < frame_len {
            // wait for the rest of this frame
            break;
        }

        let body = &remain[2..HEADER_LEN + payload_len];
        let expected = checksum(body);
        let received = [remain[frame_len - 2], remain[frame_len - 1]];
        if expected != received {
            // skip to the next packet header
            debug!(
                "dropping frame {:02x}:{:02x}, checksum {:02x?} != {:02x?}",
                remain[2], remain[3], received, expected
            );
            idx += 1;
            continue;
        }

        let packet = Packet::new(
            remain[2],
            remain[3],
            remain[HEADER_LEN..HEADER_LEN + payload_len].to_vec(),
        );
        let msg = Message::from_packet(packet);
        if let Message::Unhandled(ref pkt) = msg {
            debug!("unhandled message {:02x}:{:02x}", pkt.class, pkt.id);
        }
        return (idx + frame_len, Some(msg));
    }

    (idx, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::*;

    #[test]
    fn checksum_matches_known_cfg_msg() {
        // CFG-MSG enabling NMEA-GGA, checksum as produced by u-center
        let data = [0x06, 0x01, 0x03, 0x00, 0xF0, 0x00, 0x01];
        assert_eq!(checksum(&data), [0xFB, 0x11]);
    }

    #[test]
    fn encode_frames_header_and_checksum() {
        let frame = encode(&Packet::poll(UBX_CLASS_CFG, UBX_ID_CFG_PRT));
        assert_eq!(frame, vec![0xB5, 0x62, 0x06, 0x00, 0x00, 0x00, 0x06, 0x18]);
    }

    #[test]
    fn oversized_payload_encodes_to_nothing() {
        let pkt = Packet::new(0x0A, 0x04, vec![0u8; 70_000]);
        assert!(encode(&pkt).is_empty());
    }

    #[test]
    fn round_trip_recovers_packet() {
        let pkt = Packet::new(0x0A, 0x04, b"ROM CORE 3.01".to_vec());
        let decoded = decode(&encode(&pkt));
        assert_eq!(decoded.consumed, 6 + 13 + 2);
        assert_eq!(decoded.messages, vec![Message::Unhandled(pkt)]);
    }

    #[test]
    fn partial_frame_is_left_in_buffer() {
        let frame = encode(&Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_ACK, vec![6, 1]));
        let decoded = decode(&frame[..frame.len() - 1]);
        assert_eq!(decoded.consumed, 0);
        assert!(decoded.messages.is_empty());

        // lone first sync byte at the end is retained too
        let decoded = decode(&[0x00, 0x11, 0xB5]);
        assert_eq!(decoded.consumed, 2);
    }

    #[test]
    fn garbage_before_frame_is_consumed() {
        let mut buf = b"$GPGGA,,,*66\r\n".to_vec();
        buf.extend(encode(&Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_ACK, vec![6, 8])));
        let decoded = decode(&buf);
        assert_eq!(decoded.consumed, buf.len());
        assert_eq!(
            decoded.messages,
            vec![Message::Ack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_RATE
            }]
        );
    }

    #[test]
    fn corrupt_frame_does_not_swallow_next_frame() {
        let bad = Packet::new(0x0A, 0x09, vec![1, 2, 3, 4, 5, 6]);
        let good = Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_NAK, vec![6, 1]);
        let mut buf = encode(&bad);
        buf[8] ^= 0x40;
        let bad_len = buf.len();
        buf.extend(encode(&good));

        let decoded = decode(&buf);
        assert_eq!(decoded.consumed, buf.len());
        assert_eq!(
            decoded.messages,
            vec![Message::Nack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_MSG
            }]
        );

        // with the good frame only partially received, nothing past the
        // corrupt frame may be consumed
        let decoded = decode(&buf[..bad_len + 4]);
        assert!(decoded.messages.is_empty());
        assert!(decoded.consumed <= bad_len);
    }

    #[test]
    fn implausible_length_resyncs() {
        let mut buf = vec![0xB5, 0x62, 0x01, 0x07, 0xFF, 0xFF];
        buf.extend(encode(&Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_ACK, vec![6, 0])));
        let decoded = decode(&buf);
        assert_eq!(decoded.messages.len(), 1);
        assert_eq!(decoded.consumed, buf.len());
    }
}
