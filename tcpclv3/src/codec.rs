//! Post-handshake TCPCLv3 message framing (RFC 7242 §4.2): a one-byte
//! type/flags header followed by type-specific, SDNV-length-prefixed data.

use crate::error::{Error, Result};
use bpcore_bpv6::sdnv;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const TYPE_DATA_SEGMENT: u8 = 0x1;
const TYPE_ACK_SEGMENT: u8 = 0x2;
const TYPE_REFUSE_BUNDLE: u8 = 0x3;
const TYPE_KEEPALIVE: u8 = 0x4;
const TYPE_SHUTDOWN: u8 = 0x5;
const TYPE_LENGTH: u8 = 0x6;

const FLAG_START: u8 = 0b10;
const FLAG_END: u8 = 0b01;

const SHUTDOWN_FLAG_REASON: u8 = 0b10;
const SHUTDOWN_FLAG_DELAY: u8 = 0b01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefuseReason {
    Unknown,
    CompletedSuccessfully,
    NoResources,
    Retransmit,
    Other(u8),
}

impl From<u8> for RefuseReason {
    fn from(v: u8) -> Self {
        match v {
            0x0 => RefuseReason::Unknown,
            0x1 => RefuseReason::CompletedSuccessfully,
            0x2 => RefuseReason::NoResources,
            0x3 => RefuseReason::Retransmit,
            v => RefuseReason::Other(v),
        }
    }
}

impl From<RefuseReason> for u8 {
    fn from(v: RefuseReason) -> Self {
        match v {
            RefuseReason::Unknown => 0x0,
            RefuseReason::CompletedSuccessfully => 0x1,
            RefuseReason::NoResources => 0x2,
            RefuseReason::Retransmit => 0x3,
            RefuseReason::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Idle,
    VersionMismatch,
    Busy,
    ContactFailure,
    ResourceExhaustion,
    Other(u8),
}

impl From<u8> for ShutdownReason {
    fn from(v: u8) -> Self {
        match v {
            0x0 => ShutdownReason::Idle,
            0x1 => ShutdownReason::VersionMismatch,
            0x2 => ShutdownReason::Busy,
            0x3 => ShutdownReason::ContactFailure,
            0x4 => ShutdownReason::ResourceExhaustion,
            v => ShutdownReason::Other(v),
        }
    }
}

impl From<ShutdownReason> for u8 {
    fn from(v: ShutdownReason) -> Self {
        match v {
            ShutdownReason::Idle => 0x0,
            ShutdownReason::VersionMismatch => 0x1,
            ShutdownReason::Busy => 0x2,
            ShutdownReason::ContactFailure => 0x3,
            ShutdownReason::ResourceExhaustion => 0x4,
            ShutdownReason::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSegmentFlags {
    pub start: bool,
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    DataSegment { flags: DataSegmentFlags, data: Bytes },
    AckSegment { length: u64 },
    RefuseBundle { reason: RefuseReason },
    KeepAlive,
    Shutdown { reason: Option<ShutdownReason>, reconnection_delay: Option<u16> },
    Length { length: u64 },
}

impl Message {
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::DataSegment { .. } => "DATA_SEGMENT",
            Message::AckSegment { .. } => "ACK_SEGMENT",
            Message::RefuseBundle { .. } => "REFUSE_BUNDLE",
            Message::KeepAlive => "KEEPALIVE",
            Message::Shutdown { .. } => "SHUTDOWN",
            Message::Length { .. } => "LENGTH",
        }
    }
}

#[derive(Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        match item {
            Message::DataSegment { flags, data } => {
                let mut type_flags = TYPE_DATA_SEGMENT << 4;
                if flags.start {
                    type_flags |= FLAG_START;
                }
                if flags.end {
                    type_flags |= FLAG_END;
                }
                dst.put_u8(type_flags);
                let mut len_buf = Vec::new();
                sdnv::encode(data.len() as u64, &mut len_buf);
                dst.extend_from_slice(&len_buf);
                dst.extend_from_slice(&data);
            }
            Message::AckSegment { length } => {
                dst.put_u8(TYPE_ACK_SEGMENT << 4);
                let mut len_buf = Vec::new();
                sdnv::encode(length, &mut len_buf);
                dst.extend_from_slice(&len_buf);
            }
            Message::RefuseBundle { reason } => {
                dst.put_u8((TYPE_REFUSE_BUNDLE << 4) | (u8::from(reason) & 0xf));
            }
            Message::KeepAlive => {
                dst.put_u8(TYPE_KEEPALIVE << 4);
            }
            Message::Shutdown { reason, reconnection_delay } => {
                let mut type_flags = TYPE_SHUTDOWN << 4;
                if reason.is_some() {
                    type_flags |= SHUTDOWN_FLAG_REASON;
                }
                if reconnection_delay.is_some() {
                    type_flags |= SHUTDOWN_FLAG_DELAY;
                }
                dst.put_u8(type_flags);
                if let Some(reason) = reason {
                    dst.put_u8(reason.into());
                }
                if let Some(delay) = reconnection_delay {
                    dst.put_u16(delay);
                }
            }
            Message::Length { length } => {
                dst.put_u8(TYPE_LENGTH << 4);
                let mut len_buf = Vec::new();
                sdnv::encode(length, &mut len_buf);
                dst.extend_from_slice(&len_buf);
            }
        }
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.is_empty() {
            return Ok(None);
        }
        let type_flags = src[0];
        let msg_type = type_flags >> 4;
        let low_nibble = type_flags & 0xf;

        match msg_type {
            t if t == TYPE_DATA_SEGMENT => {
                let Some((length, len_bytes)) = try_decode_sdnv(&src[1..]) else {
                    return Ok(None);
                };
                let total = 1 + len_bytes + length as usize;
                if src.len() < total {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&src[1 + len_bytes..total]);
                src.advance(total);
                Ok(Some(Message::DataSegment {
                    flags: DataSegmentFlags {
                        start: low_nibble & FLAG_START != 0,
                        end: low_nibble & FLAG_END != 0,
                    },
                    data,
                }))
            }
            t if t == TYPE_ACK_SEGMENT => {
                let Some((length, len_bytes)) = try_decode_sdnv(&src[1..]) else {
                    return Ok(None);
                };
                src.advance(1 + len_bytes);
                Ok(Some(Message::AckSegment { length }))
            }
            t if t == TYPE_REFUSE_BUNDLE => {
                src.advance(1);
                Ok(Some(Message::RefuseBundle { reason: low_nibble.into() }))
            }
            t if t == TYPE_KEEPALIVE => {
                src.advance(1);
                Ok(Some(Message::KeepAlive))
            }
            t if t == TYPE_SHUTDOWN => {
                let has_reason = low_nibble & SHUTDOWN_FLAG_REASON != 0;
                let has_delay = low_nibble & SHUTDOWN_FLAG_DELAY != 0;
                let needed = 1 + usize::from(has_reason) + if has_delay { 2 } else { 0 };
                if src.len() < needed {
                    return Ok(None);
                }
                let mut pos = 1;
                let reason = if has_reason {
                    let r = ShutdownReason::from(src[pos]);
                    pos += 1;
                    Some(r)
                } else {
                    None
                };
                let reconnection_delay = if has_delay {
                    let d = u16::from_be_bytes([src[pos], src[pos + 1]]);
                    pos += 2;
                    Some(d)
                } else {
                    None
                };
                src.advance(pos);
                Ok(Some(Message::Shutdown { reason, reconnection_delay }))
            }
            t if t == TYPE_LENGTH => {
                let Some((length, len_bytes)) = try_decode_sdnv(&src[1..]) else {
                    return Ok(None);
                };
                src.advance(1 + len_bytes);
                Ok(Some(Message::Length { length }))
            }
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

/// Tries to decode an SDNV from `data`, returning `None` (rather than an
/// error) on truncation so the framed decoder can wait for more bytes.
fn try_decode_sdnv(data: &[u8]) -> Option<(u64, usize)> {
    sdnv::decode(data).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(msg.clone(), &mut buf).unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn data_segment_round_trips() {
        round_trip(Message::DataSegment {
            flags: DataSegmentFlags { start: true, end: false },
            data: Bytes::from_static(b"hello"),
        });
    }

    #[test]
    fn ack_segment_round_trips() {
        round_trip(Message::AckSegment { length: 12345 });
    }

    #[test]
    fn keepalive_round_trips() {
        round_trip(Message::KeepAlive);
    }

    #[test]
    fn shutdown_with_reason_and_delay_round_trips() {
        round_trip(Message::Shutdown {
            reason: Some(ShutdownReason::Busy),
            reconnection_delay: Some(30),
        });
    }

    #[test]
    fn shutdown_with_no_fields_round_trips() {
        round_trip(Message::Shutdown { reason: None, reconnection_delay: None });
    }

    #[test]
    fn decode_waits_for_full_data_segment() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::DataSegment {
                    flags: DataSegmentFlags { start: true, end: true },
                    data: Bytes::from_static(b"0123456789"),
                },
                &mut buf,
            )
            .unwrap();
        buf.truncate(buf.len() - 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn unknown_message_type_errors() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::from(&[0xF0u8][..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::UnknownMessageType(0xF))));
    }
}
