//! Metadata Extension Block: an SDNV metadata-type code followed by
//! type-specific bytes. Type 1 is a concatenation of null-terminated `ipn:`
//! URIs; every other type is kept opaque.

use crate::eid::Eid;
use crate::error::Error;
use crate::sdnv;

const URI_LIST_TYPE: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataContent {
    UriList(Vec<Eid>),
    Opaque { metadata_type: u64, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub content: MetadataContent,
}

impl Metadata {
    pub fn uri_list(uris: Vec<Eid>) -> Self {
        Self {
            content: MetadataContent::UriList(uris),
        }
    }

    fn metadata_type(&self) -> u64 {
        match &self.content {
            MetadataContent::UriList(_) => URI_LIST_TYPE,
            MetadataContent::Opaque { metadata_type, .. } => *metadata_type,
        }
    }

    fn body_len(&self) -> u64 {
        match &self.content {
            MetadataContent::UriList(uris) => uris
                .iter()
                .map(|u| u.to_string().len() as u64 + 1)
                .sum(),
            MetadataContent::Opaque { data, .. } => data.len() as u64,
        }
    }

    pub fn serialized_size(&self) -> u64 {
        sdnv::encoded_len(self.metadata_type()) as u64 + self.body_len()
    }

    pub fn serialize(&self, buf: &mut Vec<u8>) {
        sdnv::encode(self.metadata_type(), buf);
        match &self.content {
            MetadataContent::UriList(uris) => {
                for uri in uris {
                    buf.extend_from_slice(uri.to_string().as_bytes());
                    buf.push(0);
                }
            }
            MetadataContent::Opaque { data, .. } => buf.extend_from_slice(data),
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut md = Self {
            content: MetadataContent::Opaque { metadata_type: 0, data: Vec::new() },
        };
        md.deserialize_into(data)?;
        Ok(md)
    }

    /// Re-decodes `data` into `self`, reusing the inner `Vec`'s capacity
    /// when the new content is the same shape (`UriList` into `UriList`,
    /// `Opaque` into `Opaque`) instead of allocating a fresh one.
    pub(crate) fn deserialize_into(&mut self, data: &[u8]) -> Result<(), Error> {
        let (metadata_type, n) = sdnv::decode(data)?;
        let rest = &data[n..];

        if metadata_type == URI_LIST_TYPE {
            let uris = match &mut self.content {
                MetadataContent::UriList(uris) => {
                    uris.clear();
                    uris
                }
                MetadataContent::Opaque { .. } => {
                    self.content = MetadataContent::UriList(Vec::new());
                    match &mut self.content {
                        MetadataContent::UriList(uris) => uris,
                        MetadataContent::Opaque { .. } => unreachable!(),
                    }
                }
            };
            for chunk in rest.split(|&b| b == 0) {
                if chunk.is_empty() {
                    continue;
                }
                let s = std::str::from_utf8(chunk).map_err(|_| Error::MalformedAdminRecord)?;
                uris.push(s.parse::<Eid>().map_err(|_| Error::MalformedAdminRecord)?);
            }
        } else {
            match &mut self.content {
                MetadataContent::Opaque { metadata_type: mt, data: d } => {
                    *mt = metadata_type;
                    d.clear();
                    d.extend_from_slice(rest);
                }
                MetadataContent::UriList(_) => {
                    self.content = MetadataContent::Opaque {
                        metadata_type,
                        data: rest.to_vec(),
                    };
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_list_roundtrips() {
        let md = Metadata::uri_list(vec![Eid::new(1, 0), Eid::new(2, 3)]);
        let mut buf = Vec::new();
        md.serialize(&mut buf);
        assert_eq!(buf.len(), md.serialized_size() as usize);
        assert_eq!(Metadata::deserialize(&buf).unwrap(), md);
    }

    #[test]
    fn opaque_type_roundtrips() {
        let md = Metadata {
            content: MetadataContent::Opaque {
                metadata_type: 99,
                data: vec![1, 2, 3],
            },
        };
        let mut buf = Vec::new();
        md.serialize(&mut buf);
        assert_eq!(Metadata::deserialize(&buf).unwrap(), md);
    }
}
