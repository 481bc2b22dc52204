//! Drives a raw byte stream through the TCPCLv3 contact header exchange and
//! hands back a framed `Message` transport ready for
//! [`crate::session::Session::new`]. No TLS upgrade exists at this protocol
//! version.

use crate::codec::MessageCodec;
use crate::config::Config;
use crate::contact::ContactHeader;
use crate::error::{Error, Result};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;

pub struct HandshakeOutcome<S> {
    pub framed: Framed<S, MessageCodec>,
    pub negotiated_keepalive: u16,
    pub peer: ContactHeader,
}

pub async fn perform<S>(mut stream: S, config: &Config) -> Result<HandshakeOutcome<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = ContactHeader::from_config(config)?;

    let mut out = BytesMut::new();
    ours.encode(&mut out);
    stream.write_all(&out).await?;

    let peer = read_contact_header(&mut stream).await?;

    if let Some(expected) = config.expected_remote_eid {
        if peer.local_eid != expected {
            return Err(Error::UnexpectedRemoteEid { expected, actual: peer.local_eid });
        }
    }

    let negotiated_keepalive = ours.negotiate_keepalive(&peer);
    let framed = Framed::new(stream, MessageCodec::new());

    Ok(HandshakeOutcome { framed, negotiated_keepalive, peer })
}

async fn read_contact_header<S: AsyncRead + Unpin>(stream: &mut S) -> Result<ContactHeader> {
    let mut buf = BytesMut::new();
    loop {
        if let Some(header) = ContactHeader::decode(&mut buf)? {
            return Ok(header);
        }
        let mut chunk = [0u8; 64];
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::other("peer closed before sending contact header")));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
