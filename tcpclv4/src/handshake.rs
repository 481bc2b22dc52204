//! Drives a raw byte stream through contact-header exchange, the optional
//! TLS upgrade, and SESSION_INIT negotiation, handing back a framed
//! `Message` transport ready for [`crate::session::Session::new`].

use crate::codec::{Message, MessageCodec, SessionInit};
use crate::config::Config;
use crate::contact::ContactHeader;
use crate::error::{Error, Result};
use crate::session::reject_unknown_session_extensions;
use crate::tls::TlsMaterial;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::Framed;

/// Which side of the TCP connection we are: the initiator does the TLS
/// client handshake on upgrade, the listener does the server handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Listener,
}

/// Object-safe union of the plain and TLS-wrapped stream types, so the rest
/// of the crate doesn't need to be generic over which one a given session
/// ended up with.
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}
pub type BoxedStream = Box<dyn AsyncStream>;

pub struct HandshakeOutcome {
    pub framed: Framed<BoxedStream, MessageCodec>,
    pub our_init: SessionInit,
    pub peer_init: SessionInit,
}

/// Runs the full handshake: contact header, TLS upgrade (if negotiated),
/// then SESSION_INIT. `stream` is consumed; `tls` may have no server config
/// if this side never accepts inbound TLS connections.
pub async fn perform<S>(mut stream: S, config: &Config, tls: &TlsMaterial, role: Role) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let our_contact = ContactHeader { can_tls: tls_capable(config) };

    let mut out = BytesMut::new();
    our_contact.encode(&mut out);
    stream.write_all(&out).await?;

    let peer_contact = read_contact_header(&mut stream).await?;
    let negotiate_tls = our_contact.negotiate_tls(&peer_contact);
    if config.tls.require_tls && !negotiate_tls {
        return Err(Error::TlsRequired);
    }

    let boxed: BoxedStream = if negotiate_tls {
        upgrade_tls(stream, tls, role).await?
    } else {
        Box::new(stream)
    };

    let mut framed = Framed::new(boxed, MessageCodec::new());

    let our_init = SessionInit {
        keepalive_interval: config.keepalive_interval,
        segment_mru: config.segment_mru,
        transfer_mru: config.transfer_mru,
        node_id: config.local_eid,
        extensions: Vec::new(),
    };
    framed
        .send(Message::SessionInit(our_init.clone()))
        .await
        .map_err(|_| Error::Io(std::io::Error::other("session init send failed")))?;

    let peer_init = match framed.next().await {
        Some(Ok(Message::SessionInit(init))) => init,
        Some(Ok(_)) => return Err(Error::UnexpectedHandshakeMessage("SESS_INIT")),
        Some(Err(e)) => return Err(e),
        None => return Err(Error::Io(std::io::Error::other("hangup during handshake"))),
    };
    reject_unknown_session_extensions(&peer_init)?;

    if let Some(expected) = config.expected_remote_eid {
        if peer_init.node_id != expected {
            return Err(Error::UnexpectedRemoteEid { expected, actual: peer_init.node_id });
        }
    }

    Ok(HandshakeOutcome { framed, our_init, peer_init })
}

fn tls_capable(config: &Config) -> bool {
    config.tls.require_tls || config.tls.server_cert.is_some() || config.tls.ca_bundle.is_some()
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

async fn upgrade_tls<S>(stream: S, tls: &TlsMaterial, role: Role) -> Result<BoxedStream>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    match role {
        Role::Initiator => {
            let connector = TlsConnector::from(tls.client_config.clone());
            let name = tls
                .server_name
                .clone()
                .ok_or_else(|| Error::Tls(crate::tls::TlsError::CertificateLoad("server_name required for TLS client upgrade".into())))?;
            let domain: ServerName<'static> = ServerName::try_from(name)
                .map_err(|_| Error::Tls(crate::tls::TlsError::CertificateLoad("invalid server_name".into())))?;
            let tls_stream = connector
                .connect(domain, stream)
                .await
                .map_err(|e| Error::Tls(crate::tls::TlsError::Io(e)))?;
            Ok(Box::new(tls_stream))
        }
        Role::Listener => {
            let server_config = tls
                .server_config
                .clone()
                .ok_or_else(|| Error::Tls(crate::tls::TlsError::CertificateLoad("no server certificate configured".into())))?;
            let acceptor = TlsAcceptor::from(server_config);
            let tls_stream = acceptor.accept(stream).await.map_err(|e| Error::Tls(crate::tls::TlsError::Io(e)))?;
            Ok(Box::new(tls_stream))
        }
    }
}
