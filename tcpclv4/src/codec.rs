//! Post-handshake TCPCLv4 message framing (RFC 9174 §4.4): a one-byte
//! message-type header followed by type-specific fields, all big-endian.

use crate::error::{Error, Result};
use crate::extension::{self, Extension};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const TYPE_XFER_SEGMENT: u8 = 1;
const TYPE_XFER_ACK: u8 = 2;
const TYPE_XFER_REFUSE: u8 = 3;
const TYPE_KEEPALIVE: u8 = 4;
const TYPE_SESS_TERM: u8 = 5;
const TYPE_MSG_REJECT: u8 = 6;
const TYPE_SESS_INIT: u8 = 7;

const XFER_FLAG_START: u8 = 1 << 1;
const XFER_FLAG_END: u8 = 1 << 0;

const SESS_TERM_FLAG_REPLY: u8 = 1 << 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFlags {
    pub start: bool,
    pub end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferRefuseReason {
    Unknown,
    CompletedSuccessfully,
    NoResources,
    Retransmit,
    NotAcceptable,
    ExtensionFailure,
    SessionTerminating,
    Other(u8),
}

impl From<u8> for XferRefuseReason {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Unknown,
            0x01 => Self::CompletedSuccessfully,
            0x02 => Self::NoResources,
            0x03 => Self::Retransmit,
            0x04 => Self::NotAcceptable,
            0x05 => Self::ExtensionFailure,
            0x06 => Self::SessionTerminating,
            v => Self::Other(v),
        }
    }
}

impl From<XferRefuseReason> for u8 {
    fn from(v: XferRefuseReason) -> Self {
        match v {
            XferRefuseReason::Unknown => 0x00,
            XferRefuseReason::CompletedSuccessfully => 0x01,
            XferRefuseReason::NoResources => 0x02,
            XferRefuseReason::Retransmit => 0x03,
            XferRefuseReason::NotAcceptable => 0x04,
            XferRefuseReason::ExtensionFailure => 0x05,
            XferRefuseReason::SessionTerminating => 0x06,
            XferRefuseReason::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessTermReason {
    Unknown,
    IdleTimeout,
    VersionMismatch,
    Busy,
    ContactFailure,
    ResourceExhaustion,
    Other(u8),
}

impl From<u8> for SessTermReason {
    fn from(v: u8) -> Self {
        match v {
            0x00 => Self::Unknown,
            0x01 => Self::IdleTimeout,
            0x02 => Self::VersionMismatch,
            0x03 => Self::Busy,
            0x04 => Self::ContactFailure,
            0x05 => Self::ResourceExhaustion,
            v => Self::Other(v),
        }
    }
}

impl From<SessTermReason> for u8 {
    fn from(v: SessTermReason) -> Self {
        match v {
            SessTermReason::Unknown => 0x00,
            SessTermReason::IdleTimeout => 0x01,
            SessTermReason::VersionMismatch => 0x02,
            SessTermReason::Busy => 0x03,
            SessTermReason::ContactFailure => 0x04,
            SessTermReason::ResourceExhaustion => 0x05,
            SessTermReason::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgRejectReason {
    MessageTypeUnknown,
    MessageUnsupported,
    MessageUnexpected,
    Other(u8),
}

impl From<u8> for MsgRejectReason {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Self::MessageTypeUnknown,
            0x02 => Self::MessageUnsupported,
            0x03 => Self::MessageUnexpected,
            v => Self::Other(v),
        }
    }
}

impl From<MsgRejectReason> for u8 {
    fn from(v: MsgRejectReason) -> Self {
        match v {
            MsgRejectReason::MessageTypeUnknown => 0x01,
            MsgRejectReason::MessageUnsupported => 0x02,
            MsgRejectReason::MessageUnexpected => 0x03,
            MsgRejectReason::Other(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionInit {
    pub keepalive_interval: u16,
    pub segment_mru: u64,
    pub transfer_mru: u64,
    pub node_id: bpcore_bpv6::Eid,
    pub extensions: Vec<Extension>,
}

impl SessionInit {
    pub fn negotiate_keepalive(&self, peer: &SessionInit) -> u16 {
        self.keepalive_interval.min(peer.keepalive_interval)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    SessionInit(SessionInit),
    XferSegment {
        flags: TransferFlags,
        transfer_id: u64,
        extensions: Vec<Extension>,
        data: Bytes,
    },
    XferAck {
        flags: TransferFlags,
        transfer_id: u64,
        acked_length: u64,
    },
    XferRefuse {
        reason: XferRefuseReason,
        transfer_id: u64,
    },
    Keepalive,
    SessTerm {
        reply: bool,
        reason: SessTermReason,
    },
    MsgReject {
        reason: MsgRejectReason,
        rejected_type: u8,
    },
}

impl Message {
    pub fn message_type(&self) -> &'static str {
        match self {
            Message::SessionInit(_) => "SESS_INIT",
            Message::XferSegment { .. } => "XFER_SEGMENT",
            Message::XferAck { .. } => "XFER_ACK",
            Message::XferRefuse { .. } => "XFER_REFUSE",
            Message::Keepalive => "KEEPALIVE",
            Message::SessTerm { .. } => "SESS_TERM",
            Message::MsgReject { .. } => "MSG_REJECT",
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
            Message::SessionInit(init) => {
                dst.put_u8(TYPE_SESS_INIT);
                dst.put_u16(init.keepalive_interval);
                dst.put_u64(init.segment_mru);
                dst.put_u64(init.transfer_mru);
                let node_id = init.node_id.to_string();
                dst.put_u16(node_id.len() as u16);
                dst.extend_from_slice(node_id.as_bytes());
                extension::encode_list(&init.extensions, dst);
            }
            Message::XferSegment { flags, transfer_id, extensions, data } => {
                dst.put_u8(TYPE_XFER_SEGMENT);
                dst.put_u8(transfer_flags_byte(flags));
                dst.put_u64(transfer_id);
                if flags.start {
                    extension::encode_list(&extensions, dst);
                }
                dst.put_u64(data.len() as u64);
                dst.extend_from_slice(&data);
            }
            Message::XferAck { flags, transfer_id, acked_length } => {
                dst.put_u8(TYPE_XFER_ACK);
                dst.put_u8(transfer_flags_byte(flags));
                dst.put_u64(transfer_id);
                dst.put_u64(acked_length);
            }
            Message::XferRefuse { reason, transfer_id } => {
                dst.put_u8(TYPE_XFER_REFUSE);
                dst.put_u8(reason.into());
                dst.put_u64(transfer_id);
            }
            Message::Keepalive => {
                dst.put_u8(TYPE_KEEPALIVE);
            }
            Message::SessTerm { reply, reason } => {
                dst.put_u8(TYPE_SESS_TERM);
                dst.put_u8(if reply { SESS_TERM_FLAG_REPLY } else { 0 });
                dst.put_u8(reason.into());
            }
            Message::MsgReject { reason, rejected_type } => {
                dst.put_u8(TYPE_MSG_REJECT);
                dst.put_u8(reason.into());
                dst.put_u8(rejected_type);
            }
        }
        Ok(())
    }
}

fn transfer_flags_byte(flags: TransferFlags) -> u8 {
    let mut b = 0;
    if flags.start {
        b |= XFER_FLAG_START;
    }
    if flags.end {
        b |= XFER_FLAG_END;
    }
    b
}

fn transfer_flags_from_byte(b: u8) -> TransferFlags {
    TransferFlags { start: b & XFER_FLAG_START != 0, end: b & XFER_FLAG_END != 0 }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.is_empty() {
            return Ok(None);
        }
        let msg_type = src[0];

        match msg_type {
            TYPE_SESS_INIT => {
                if src.len() < 1 + 2 + 8 + 8 + 2 {
                    return Ok(None);
                }
                let mut pos = 1;
                let keepalive_interval = u16::from_be_bytes([src[pos], src[pos + 1]]);
                pos += 2;
                let segment_mru = u64_at(src, pos);
                pos += 8;
                let transfer_mru = u64_at(src, pos);
                pos += 8;
                let node_id_len = u16::from_be_bytes([src[pos], src[pos + 1]]) as usize;
                pos += 2;
                if src.len() < pos + node_id_len {
                    return Ok(None);
                }
                let node_id_str = std::str::from_utf8(&src[pos..pos + node_id_len])
                    .map_err(|_| Error::Eid(bpcore_bpv6::eid::EidError::MissingScheme))?;
                let node_id: bpcore_bpv6::Eid = node_id_str.parse()?;
                pos += node_id_len;

                let Some((extensions, ext_consumed)) = extension::decode_list(&src[pos..]) else {
                    return Ok(None);
                };
                pos += ext_consumed;

                src.advance(pos);
                Ok(Some(Message::SessionInit(SessionInit {
                    keepalive_interval,
                    segment_mru,
                    transfer_mru,
                    node_id,
                    extensions,
                })))
            }
            TYPE_XFER_SEGMENT => {
                if src.len() < 1 + 1 + 8 {
                    return Ok(None);
                }
                let flags = transfer_flags_from_byte(src[1]);
                let mut pos = 2;
                let transfer_id = u64_at(src, pos);
                pos += 8;

                let extensions = if flags.start {
                    let Some((extensions, consumed)) = extension::decode_list(&src[pos..]) else {
                        return Ok(None);
                    };
                    pos += consumed;
                    extensions
                } else {
                    Vec::new()
                };

                if src.len() < pos + 8 {
                    return Ok(None);
                }
                let data_len = u64_at(src, pos) as usize;
                pos += 8;
                if src.len() < pos + data_len {
                    return Ok(None);
                }
                let data = Bytes::copy_from_slice(&src[pos..pos + data_len]);
                pos += data_len;

                src.advance(pos);
                Ok(Some(Message::XferSegment { flags, transfer_id, extensions, data }))
            }
            TYPE_XFER_ACK => {
                if src.len() < 1 + 1 + 8 + 8 {
                    return Ok(None);
                }
                let flags = transfer_flags_from_byte(src[1]);
                let transfer_id = u64_at(src, 2);
                let acked_length = u64_at(src, 10);
                src.advance(18);
                Ok(Some(Message::XferAck { flags, transfer_id, acked_length }))
            }
            TYPE_XFER_REFUSE => {
                if src.len() < 1 + 1 + 8 {
                    return Ok(None);
                }
                let reason = XferRefuseReason::from(src[1]);
                let transfer_id = u64_at(src, 2);
                src.advance(10);
                Ok(Some(Message::XferRefuse { reason, transfer_id }))
            }
            TYPE_KEEPALIVE => {
                src.advance(1);
                Ok(Some(Message::Keepalive))
            }
            TYPE_SESS_TERM => {
                if src.len() < 3 {
                    return Ok(None);
                }
                let reply = src[1] & SESS_TERM_FLAG_REPLY != 0;
                let reason = SessTermReason::from(src[2]);
                src.advance(3);
                Ok(Some(Message::SessTerm { reply, reason }))
            }
            TYPE_MSG_REJECT => {
                if src.len() < 3 {
                    return Ok(None);
                }
                let reason = MsgRejectReason::from(src[1]);
                let rejected_type = src[2];
                src.advance(3);
                Ok(Some(Message::MsgReject { reason, rejected_type }))
            }
            other => Err(Error::UnknownMessageType(other)),
        }
    }
}

fn u64_at(src: &BytesMut, pos: usize) -> u64 {
    u64::from_be_bytes(src[pos..pos + 8].try_into().unwrap())
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
    fn session_init_round_trips() {
        round_trip(Message::SessionInit(SessionInit {
            keepalive_interval: 30,
            segment_mru: 16384,
            transfer_mru: 1_000_000,
            node_id: bpcore_bpv6::Eid::new(5, 0),
            extensions: vec![],
        }));
    }

    #[test]
    fn xfer_segment_without_extensions_round_trips() {
        round_trip(Message::XferSegment {
            flags: TransferFlags { start: false, end: true },
            transfer_id: 7,
            extensions: vec![],
            data: Bytes::from_static(b"payload"),
        });
    }

    #[test]
    fn xfer_segment_start_carries_extensions() {
        round_trip(Message::XferSegment {
            flags: TransferFlags { start: true, end: false },
            transfer_id: 0,
            extensions: vec![Extension { critical: false, item_type: 1, value: Bytes::from_static(b"len") }],
            data: Bytes::from_static(b"first-chunk"),
        });
    }

    #[test]
    fn xfer_ack_round_trips() {
        round_trip(Message::XferAck {
            flags: TransferFlags { start: true, end: true },
            transfer_id: 3,
            acked_length: 21,
        });
    }

    #[test]
    fn sess_term_round_trips() {
        round_trip(Message::SessTerm { reply: true, reason: SessTermReason::IdleTimeout });
    }

    #[test]
    fn keepalive_round_trips() {
        round_trip(Message::Keepalive);
    }

    #[test]
    fn msg_reject_round_trips() {
        round_trip(Message::MsgReject { reason: MsgRejectReason::MessageTypeUnknown, rejected_type: 0xF });
    }

    #[test]
    fn decode_waits_for_full_xfer_segment() {
        let mut codec = MessageCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(
                Message::XferSegment {
                    flags: TransferFlags { start: true, end: true },
                    transfer_id: 1,
                    extensions: vec![],
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
        let mut buf = BytesMut::from(&[0xFFu8][..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::UnknownMessageType(0xFF))));
    }
}
