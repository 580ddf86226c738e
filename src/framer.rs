//! Datagram framing for the AS-5669 (v1) and AS-5684 (v2) transports.
//!
//! A datagram may carry several messages back to back. v1 messages each
//! carry a full 16 byte header; v2 datagrams lead with a single transport
//! version byte followed by per-message headers and a trailing sequence
//! number. All multi-byte fields are little-endian.

use bytes::BytesMut;
use packed_struct::prelude::*;

use crate::address::JausAddress;
use crate::error::JausBridgeError;
use crate::message::{AS5669, AS5684, CODE_NONE, Message};

/// Minimum size of an AS-5669 message: the full v1 header
pub const MIN_PACKET_SIZE_V1: usize = 16;
/// Minimum size of an AS-5684 message region: per-message header plus
/// trailing sequence number, without the shared transport version byte
pub const MIN_PACKET_SIZE_V2: usize = 14;

/// AS-5669 message header. The payload follows directly, its length is in
/// the low 16 bits of `data_control`.
#[derive(Debug, PackedStruct, PartialEq, Eq, Clone)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "16")]
pub struct HeaderV1 {
    #[packed_field(bytes = "0")]
    pub version: u8,
    #[packed_field(bytes = "1")]
    pub cmd_code: u8,
    #[packed_field(bytes = "2..=5")]
    pub dst_id: u32,
    #[packed_field(bytes = "6..=9")]
    pub src_id: u32,
    #[packed_field(bytes = "10..=13")]
    pub data_control: u32,
    #[packed_field(bytes = "14..=15")]
    pub seqnr: u16,
}

/// AS-5684 per-message header prefix. `data_size` spans from the
/// `message_type` byte through the trailing sequence number inclusive.
#[derive(Debug, PackedStruct, PartialEq, Eq, Clone)]
#[packed_struct(bit_numbering = "msb0", endian = "lsb", size_bytes = "12")]
pub struct HeaderV2 {
    #[packed_field(bytes = "0")]
    pub message_type: u8,
    #[packed_field(bytes = "1..=2")]
    pub data_size: u16,
    #[packed_field(bytes = "3")]
    pub data_flags: u8,
    #[packed_field(bytes = "4..=7")]
    pub dst_id: u32,
    #[packed_field(bytes = "8..=11")]
    pub src_id: u32,
}

/// Serialize one message into its on-wire datagram form.
pub fn serialize(msg: &Message) -> Result<Vec<u8>, JausBridgeError> {
    let payload = msg.payload();
    if payload.len() > u16::MAX as usize {
        return Err(JausBridgeError::InvalidValue(format!(
            "payload of {} bytes does not fit a datagram",
            payload.len()
        )));
    }
    match msg.version {
        AS5669 => {
            let header = HeaderV1 {
                version: AS5669,
                cmd_code: msg.cmd_code,
                dst_id: msg.dst_id.as_raw(),
                src_id: msg.src_id.as_raw(),
                data_control: payload.len() as u32,
                seqnr: (msg.seqnr & 0xffff) as u16,
            };
            let mut out = header.pack()?.to_vec();
            out.extend_from_slice(payload);
            Ok(out)
        }
        _ => {
            let data_size = MIN_PACKET_SIZE_V2 + payload.len();
            if data_size > u16::MAX as usize {
                return Err(JausBridgeError::InvalidValue(format!(
                    "message of {data_size} bytes does not fit a datagram"
                )));
            }
            let header = HeaderV2 {
                message_type: msg.cmd_code,
                data_size: data_size as u16,
                data_flags: msg.priority & 0x03,
                dst_id: msg.dst_id.as_raw(),
                src_id: msg.src_id.as_raw(),
            };
            let mut out = vec![AS5684];
            out.extend_from_slice(&header.pack()?);
            out.extend_from_slice(payload);
            out.extend_from_slice(&((msg.seqnr & 0xffff) as u16).to_le_bytes());
            Ok(out)
        }
    }
}

/// Split a received datagram into the messages it carries.
pub fn parse(data: &[u8]) -> Result<Vec<Message>, JausBridgeError> {
    let mut msgs = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        match data[offset] {
            AS5669 => offset = parse_v1(data, offset, &mut msgs)?,
            AS5684 => {
                offset += 1;
                while offset < data.len() {
                    offset = parse_v2(data, offset, &mut msgs)?;
                }
            }
            other => {
                return Err(JausBridgeError::InvalidValue(format!(
                    "unknown transport version {other}"
                )));
            }
        }
    }
    Ok(msgs)
}

fn parse_v1(
    data: &[u8],
    offset: usize,
    msgs: &mut Vec<Message>,
) -> Result<usize, JausBridgeError> {
    let remaining = data.len() - offset;
    if remaining < MIN_PACKET_SIZE_V1 {
        return Err(JausBridgeError::ShortFrame {
            len: remaining,
            min: MIN_PACKET_SIZE_V1,
        });
    }
    let mut raw: [u8; MIN_PACKET_SIZE_V1] = [0; MIN_PACKET_SIZE_V1];
    raw.copy_from_slice(&data[offset..offset + MIN_PACKET_SIZE_V1]);
    let header = HeaderV1::unpack(&raw)?;
    let payload_len = (header.data_control & 0xffff) as usize;
    if remaining < MIN_PACKET_SIZE_V1 + payload_len {
        return Err(JausBridgeError::ShortFrame {
            len: remaining,
            min: MIN_PACKET_SIZE_V1 + payload_len,
        });
    }
    let payload_start = offset + MIN_PACKET_SIZE_V1;
    let mut msg = Message::default();
    msg.version = AS5669;
    msg.cmd_code = header.cmd_code;
    msg.src_id = JausAddress::from_raw(header.src_id);
    msg.dst_id = JausAddress::from_raw(header.dst_id);
    msg.seqnr = header.seqnr as u32;
    msg.set_payload(BytesMut::from(
        &data[payload_start..payload_start + payload_len],
    ));
    msg.msg_id = peek_message_id(&msg);
    msgs.push(msg);
    Ok(payload_start + payload_len)
}

fn parse_v2(
    data: &[u8],
    offset: usize,
    msgs: &mut Vec<Message>,
) -> Result<usize, JausBridgeError> {
    let remaining = data.len() - offset;
    if remaining < MIN_PACKET_SIZE_V2 {
        return Err(JausBridgeError::ShortFrame {
            len: remaining,
            min: MIN_PACKET_SIZE_V2,
        });
    }
    let mut raw: [u8; 12] = [0; 12];
    raw.copy_from_slice(&data[offset..offset + 12]);
    let header = HeaderV2::unpack(&raw)?;
    let data_size = header.data_size as usize;
    if data_size < MIN_PACKET_SIZE_V2 || remaining < data_size {
        return Err(JausBridgeError::ShortFrame {
            len: remaining,
            min: data_size.max(MIN_PACKET_SIZE_V2),
        });
    }
    let payload_start = offset + 12;
    let payload_end = offset + data_size - 2;
    let mut seq_raw: [u8; 2] = [0; 2];
    seq_raw.copy_from_slice(&data[payload_end..payload_end + 2]);
    let mut msg = Message::default();
    msg.version = AS5684;
    msg.cmd_code = header.message_type;
    msg.src_id = JausAddress::from_raw(header.src_id);
    msg.dst_id = JausAddress::from_raw(header.dst_id);
    msg.seqnr = u16::from_le_bytes(seq_raw) as u32;
    msg.priority = header.data_flags & 0x03;
    msg.set_payload(BytesMut::from(&data[payload_start..payload_end]));
    msg.msg_id = peek_message_id(&msg);
    msgs.push(msg);
    Ok(offset + data_size)
}

/// Data messages carry their 16 bit message id in the first two payload bytes.
fn peek_message_id(msg: &Message) -> u16 {
    let payload = msg.payload();
    if msg.cmd_code == CODE_NONE && payload.len() >= 2 {
        u16::from_le_bytes([payload[0], payload[1]])
    } else {
        0
    }
}
