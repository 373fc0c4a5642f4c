use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::crypto::{
    verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore,
    SignatureScheme,
};
use sha2::{Digest, Sha256};

use crate::{FbxError, Result};

/// SHA-256 fingerprint of a DER encoded certificate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = FbxError;

    /// Accepts `AB:CD:..`, `abcd..` and an optional `sha256:` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let s = s.strip_prefix("sha256:").unwrap_or(s);
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(&digits)
            .map_err(|e| FbxError::Tls(format!("bad fingerprint: {}", e)))?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            FbxError::Tls("fingerprint must be 32 bytes long".to_owned())
        })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> =
            self.0.iter().map(|b| format!("{:02X}", b)).collect();
        f.write_str(&parts.join(":"))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self)
    }
}

/// How the device certificate is checked on both channels.
///
/// The box presents a certificate issued by its vendor CA for a name that
/// rarely matches the address used to reach it, so plain verification only
/// works through a proper domain. Pinning the leaf fingerprint is the way to
/// talk to it on the LAN.
#[derive(Clone, Debug, Default)]
pub enum TlsMode {
    /// Regular chain and hostname verification.
    #[default]
    Verify,
    /// Accept only leaf certificates with one of these fingerprints.
    Pinned(Vec<Fingerprint>),
    /// Accept any certificate. Only for throwaway setups.
    AcceptInvalid,
}

impl TlsMode {
    /// Build the rustls configuration shared by the REST and WebSocket
    /// channels.
    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let algorithms = provider.signature_verification_algorithms;
        let builder = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| FbxError::Tls(e.to_string()))?;

        let pins = match self {
            TlsMode::Verify => {
                let config = builder
                    .with_root_certificates(native_roots())
                    .with_no_client_auth();
                return Ok(Arc::new(config));
            }
            TlsMode::Pinned(pins) if pins.is_empty() => {
                return Err(FbxError::Tls(
                    "pinned mode needs at least one fingerprint".to_owned(),
                ))
            }
            TlsMode::Pinned(pins) => Some(pins.clone()),
            TlsMode::AcceptInvalid => {
                log::warn!(
                    "certificate verification is disabled for this client"
                );
                None
            }
        };

        let verifier = FingerprintVerifier { pins, algorithms };
        let config = builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(verifier))
            .with_no_client_auth();
        Ok(Arc::new(config))
    }
}

/// Trust anchors of the operating system.
fn native_roots() -> RootCertStore {
    let loaded = rustls_native_certs::load_native_certs();
    for e in &loaded.errors {
        log::warn!("could not load a system certificate: {}", e);
    }
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
    log::debug!("{} system roots loaded, {} ignored", added, ignored);
    if added == 0 {
        log::warn!("no system roots found, verified connections will fail");
    }
    roots
}

#[derive(Debug)]
struct FingerprintVerifier {
    /// `None` accepts every certificate.
    pins: Option<Vec<Fingerprint>>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let Some(pins) = &self.pins else {
            return Ok(ServerCertVerified::assertion());
        };
        let presented = Fingerprint::of(end_entity.as_ref());
        if pins.contains(&presented) {
            Ok(ServerCertVerified::assertion())
        } else {
            log::warn!("rejecting certificate with fingerprint {}", presented);
            Err(rustls::Error::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
