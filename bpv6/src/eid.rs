//! The `ipn:` URI scheme used by Compressed Bundle Header Encoding (CBHE).
//!
//! BPv6 endpoints are identified purely by a `(node_id, service_id)` pair;
//! there is no `dtn://` scheme and no allocator-id component as in BPv7's
//! `ipn` scheme. `dtn:none`, the one non-`ipn` endpoint RFC 5050 still
//! requires for an absent report-to EID, is folded into `node_id: 0` here
//! since CBHE itself reserves node zero for exactly that purpose.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EidError {
    #[error("missing ipn: scheme prefix")]
    MissingScheme,

    #[error("unsupported EID scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("ipn URI must have exactly two dot-separated components")]
    InvalidComponents,

    #[error("invalid ipn node number {0:?}")]
    InvalidNodeNumber(String),

    #[error("invalid ipn service number {0:?}")]
    InvalidServiceNumber(String),
}

/// A service-number component, which may be a literal value or the `*`
/// wildcard used by an endpoint that denotes "any service at this node".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Service {
    Id(u64),
    Wildcard,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Service::Id(n) => write!(f, "{n}"),
            Service::Wildcard => f.write_str("*"),
        }
    }
}

/// A BPv6 CBHE endpoint id, `ipn:<node_id>.<service_id>`.
///
/// `node_id == 0` represents `dtn:none`, the null endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eid {
    pub node_id: u64,
    pub service_id: Service,
}

impl Eid {
    /// The null endpoint, `dtn:none` / `ipn:0.0`.
    pub const NULL: Eid = Eid {
        node_id: 0,
        service_id: Service::Id(0),
    };

    pub fn new(node_id: u64, service_id: u64) -> Self {
        Self {
            node_id,
            service_id: Service::Id(service_id),
        }
    }

    pub fn with_wildcard_service(node_id: u64) -> Self {
        Self {
            node_id,
            service_id: Service::Wildcard,
        }
    }

    pub fn is_null(&self) -> bool {
        self.node_id == 0
    }

    /// Returns the literal service number, or `None` if this EID uses the
    /// wildcard service.
    pub fn service_number(&self) -> Option<u64> {
        match self.service_id {
            Service::Id(n) => Some(n),
            Service::Wildcard => None,
        }
    }
}

impl Default for Eid {
    fn default() -> Self {
        Self::NULL
    }
}

impl fmt::Display for Eid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("dtn:none")
        } else {
            write!(f, "ipn:{}.{}", self.node_id, self.service_id)
        }
    }
}

impl FromStr for Eid {
    type Err = EidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "dtn:none" {
            return Ok(Self::NULL);
        }

        let rest = s.strip_prefix("ipn:").ok_or(EidError::MissingScheme)?;

        let mut parts = rest.split('.');
        let (Some(node_str), Some(service_str), None) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(EidError::InvalidComponents);
        };

        let node_id = node_str
            .parse::<u64>()
            .map_err(|_| EidError::InvalidNodeNumber(node_str.to_string()))?;

        let service_id = if service_str == "*" {
            Service::Wildcard
        } else {
            Service::Id(
                service_str
                    .parse::<u64>()
                    .map_err(|_| EidError::InvalidServiceNumber(service_str.to_string()))?,
            )
        };

        Ok(Self { node_id, service_id })
    }
}

impl TryFrom<&str> for Eid {
    type Error = EidError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_singleton() {
        let eid: Eid = "ipn:12.34".parse().unwrap();
        assert_eq!(eid, Eid::new(12, 34));
        assert_eq!(eid.to_string(), "ipn:12.34");
    }

    #[test]
    fn roundtrips_wildcard_service() {
        let eid: Eid = "ipn:12.*".parse().unwrap();
        assert_eq!(eid, Eid::with_wildcard_service(12));
        assert_eq!(eid.service_number(), None);
        assert_eq!(eid.to_string(), "ipn:12.*");
    }

    #[test]
    fn dtn_none_is_null() {
        let eid: Eid = "dtn:none".parse().unwrap();
        assert!(eid.is_null());
        assert_eq!(eid, Eid::NULL);
        assert_eq!(eid.to_string(), "dtn:none");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            "dtn://foo/bar".parse::<Eid>(),
            Err(EidError::MissingScheme)
        ));
    }

    #[test]
    fn rejects_extra_components() {
        assert!(matches!(
            "ipn:1.2.3".parse::<Eid>(),
            Err(EidError::InvalidComponents)
        ));
    }

    #[test]
    fn rejects_non_numeric_node() {
        assert!(matches!(
            "ipn:abc.1".parse::<Eid>(),
            Err(EidError::InvalidNodeNumber(_))
        ));
    }
}
