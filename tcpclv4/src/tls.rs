//! TLS material for the post-CAN_TLS upgrade: a client config always built
//! (self-signed verification optionally relaxed for development), a server
//! config built only when a certificate/key pair is configured.

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls_pemfile::{certs, pkcs8_private_keys};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TlsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("{0}")]
    CertificateLoad(String),

    #[error("{0}")]
    PrivateKeyLoad(String),
}

pub struct TlsMaterial {
    pub server_config: Option<Arc<ServerConfig>>,
    pub client_config: Arc<ClientConfig>,
    pub server_name: Option<String>,
}

impl TlsMaterial {
    pub fn new(config: &crate::config::TlsConfig) -> Result<Self, TlsError> {
        Ok(Self {
            server_config: build_server_config(config)?,
            client_config: Arc::new(build_client_config(config)?),
            server_name: config.server_name.clone(),
        })
    }
}

fn build_server_config(config: &crate::config::TlsConfig) -> Result<Option<Arc<ServerConfig>>, TlsError> {
    match (&config.server_cert, &config.server_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            let server_config = ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(certs, key)
                .map_err(|e| {
                    TlsError::CertificateLoad(format!(
                        "server TLS configuration error for {}: {e}",
                        cert_path.display()
                    ))
                })?;
            Ok(Some(Arc::new(server_config)))
        }
        (Some(_), None) | (None, Some(_)) => Err(TlsError::CertificateLoad(
            "both server_cert and server_key must be provided together".to_string(),
        )),
        (None, None) => Ok(None),
    }
}

fn build_client_config(config: &crate::config::TlsConfig) -> Result<ClientConfig, TlsError> {
    let mut root_store = RootCertStore::empty();
    if let Some(ca_bundle) = &config.ca_bundle {
        load_ca_certs(&mut root_store, ca_bundle)?;
        debug!("loaded {} CA certificate(s)", root_store.len());
    }

    if config.accept_self_signed {
        warn!("TLS client accepting self-signed certificates (development only)");
        let mut client_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();
        client_config
            .dangerous()
            .set_certificate_verifier(Arc::new(AcceptAnyCert));
        return Ok(client_config);
    }

    if root_store.is_empty() {
        return Err(TlsError::CertificateLoad(
            "TLS CA store is empty and accept_self_signed is disabled".to_string(),
        ));
    }
    Ok(ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth())
}

fn read_file(path: &Path, label: &str) -> Result<Vec<u8>, TlsError> {
    let data = fs::read(path)
        .map_err(|e| TlsError::CertificateLoad(format!("cannot read {label} from {}: {e}", path.display())))?;
    if data.is_empty() {
        return Err(TlsError::CertificateLoad(format!("{label} file is empty: {}", path.display())));
    }
    Ok(data)
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let data = read_file(path, "certificate")?;
    certs(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateLoad(format!("cannot parse certificate from {}: {e}", path.display())))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let data = read_file(path, "private key")?;
    let mut keys = pkcs8_private_keys(&mut data.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::PrivateKeyLoad(format!("cannot parse private key from {}: {e}", path.display())))?;
    if keys.is_empty() {
        return Err(TlsError::PrivateKeyLoad(format!(
            "no PKCS8 private keys found in {}",
            path.display()
        )));
    }
    Ok(PrivateKeyDer::Pkcs8(keys.remove(0)))
}

fn load_ca_certs(store: &mut RootCertStore, path: &Path) -> Result<(), TlsError> {
    if !path.is_dir() {
        return Err(TlsError::CertificateLoad(format!(
            "CA bundle path must be a directory: {}",
            path.display()
        )));
    }
    let entries = fs::read_dir(path)
        .map_err(|e| TlsError::CertificateLoad(format!("cannot read CA bundle directory {}: {e}", path.display())))?;
    for entry in entries {
        let entry = entry.map_err(|e| TlsError::CertificateLoad(format!("{e}")))?;
        let file_path = entry.path();
        if file_path.is_dir() {
            continue;
        }
        let Ok(data) = fs::read(&file_path) else { continue };
        if data.is_empty() {
            continue;
        }
        let Ok(certs) = certs(&mut data.as_slice()).collect::<Result<Vec<_>, _>>() else {
            debug!("skipping non-certificate file {}", file_path.display());
            continue;
        };
        for cert in certs {
            store
                .add(cert)
                .map_err(|e| TlsError::CertificateLoad(format!("cannot trust CA from {}: {e}", file_path.display())))?;
        }
    }
    if store.is_empty() {
        return Err(TlsError::CertificateLoad(format!(
            "no certificates found in CA bundle directory: {}",
            path.display()
        )));
    }
    Ok(())
}

/// Accepts any server certificate. Only reachable via `accept_self_signed`.
#[derive(Debug)]
struct AcceptAnyCert;

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}
