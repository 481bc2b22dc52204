//! Session and transfer extension items: a critical-bit flags byte, a u16
//! type, a u16 length, and the value bytes. Used both in SESSION_INIT
//! (u32-length-prefixed list) and in a start-flagged XFER_SEGMENT (also
//! u32-length-prefixed, per the data model's extension fields).

use bytes::{Buf, BufMut, Bytes, BytesMut};

const FLAG_CRITICAL: u8 = 1 << 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub critical: bool,
    pub item_type: u16,
    pub value: Bytes,
}

impl Extension {
    fn encoded_len(&self) -> usize {
        1 + 2 + 2 + self.value.len()
    }

    fn encode(&self, out: &mut BytesMut) {
        out.put_u8(if self.critical { FLAG_CRITICAL } else { 0 });
        out.put_u16(self.item_type);
        out.put_u16(self.value.len() as u16);
        out.extend_from_slice(&self.value);
    }
}

/// Encodes `items` preceded by a u32 total-byte-length prefix.
pub fn encode_list(items: &[Extension], out: &mut BytesMut) {
    let total: usize = items.iter().map(Extension::encoded_len).sum();
    out.put_u32(total as u32);
    for item in items {
        item.encode(out);
    }
}

/// Decodes a u32-length-prefixed extension list from the front of `buf`.
/// Returns `Ok(None)` if `buf` doesn't yet hold the full list.
pub fn decode_list(buf: &[u8]) -> Option<(Vec<Extension>, usize)> {
    if buf.len() < 4 {
        return None;
    }
    let total = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + total {
        return None;
    }
    let mut items = Vec::new();
    let mut body = &buf[4..4 + total];
    while !body.is_empty() {
        if body.len() < 5 {
            break;
        }
        let critical = body[0] & FLAG_CRITICAL != 0;
        let item_type = u16::from_be_bytes([body[1], body[2]]);
        let len = u16::from_be_bytes([body[3], body[4]]) as usize;
        if body.len() < 5 + len {
            break;
        }
        let value = Bytes::copy_from_slice(&body[5..5 + len]);
        items.push(Extension { critical, item_type, value });
        body.advance(5 + len);
    }
    Some((items, 4 + total))
}

/// `true` if any item in `items` is critical and its type isn't in `known`.
pub fn has_unknown_critical(items: &[Extension], known: &[u16]) -> Option<u16> {
    items
        .iter()
        .find(|item| item.critical && !known.contains(&item.item_type))
        .map(|item| item.item_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_round_trips() {
        let mut buf = BytesMut::new();
        encode_list(&[], &mut buf);
        let (items, consumed) = decode_list(&buf).unwrap();
        assert!(items.is_empty());
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn list_round_trips() {
        let items = vec![
            Extension { critical: false, item_type: 1, value: Bytes::from_static(b"abc") },
            Extension { critical: true, item_type: 2, value: Bytes::new() },
        ];
        let mut buf = BytesMut::new();
        encode_list(&items, &mut buf);
        let (decoded, consumed) = decode_list(&buf).unwrap();
        assert_eq!(decoded, items);
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn unknown_critical_is_detected() {
        let items = vec![Extension { critical: true, item_type: 99, value: Bytes::new() }];
        assert_eq!(has_unknown_critical(&items, &[1, 2]), Some(99));
        assert_eq!(has_unknown_critical(&items, &[99]), None);
    }

    #[test]
    fn decode_waits_for_full_list() {
        let items = vec![Extension { critical: false, item_type: 1, value: Bytes::from_static(b"abcdef") }];
        let mut buf = BytesMut::new();
        encode_list(&items, &mut buf);
        buf.truncate(buf.len() - 1);
        assert!(decode_list(&buf).is_none());
    }
}
