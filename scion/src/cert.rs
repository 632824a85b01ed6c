//! Per-process transport certificates
//!
//! The server side of the session is a short-lived self-signed identity
//! generated fresh on every launch and never persisted. The client side is
//! trust material inherited from the host through the environment; its
//! absence downgrades the session to server-only TLS but is not fatal.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine as _;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::warn;

use crate::error::ServeError;

/// The freshly generated server key pair and certificate.
pub struct ServerIdentity {
    cert_pem: String,
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
}

impl ServerIdentity {
    /// Generate a new ECDSA P-256 self-signed certificate for the loopback
    /// names a host dials: `localhost`, `127.0.0.1` and `::1`.
    ///
    /// The certificate carries only CN and subject alternative names;
    /// stricter host certificate profiles are a compatibility risk to test
    /// against a real host, not extra fields to speculate about here.
    pub fn generate() -> Result<Self, ServeError> {
        let key = KeyPair::generate()?;
        let mut params = CertificateParams::new(vec![
            "localhost".to_string(),
            "127.0.0.1".to_string(),
            "::1".to_string(),
        ])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "localhost");
        params.distinguished_name = dn;
        let cert = params.self_signed(&key)?;
        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            key_der: key.serialize_der(),
        })
    }

    /// PEM form of the certificate, as a dialing host would trust it.
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub(crate) fn certificate_der(&self) -> CertificateDer<'static> {
        CertificateDer::from(self.cert_der.clone())
    }

    pub(crate) fn private_key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key_der.clone().into())
    }

    /// The certificate as it appears in the negotiation line: raw base64 of
    /// the DER bytes. The host's line parser cannot tolerate `=` padding
    /// characters, so the no-pad alphabet is mandatory here.
    pub fn negotiation_field(&self) -> String {
        STANDARD_NO_PAD.encode(&self.cert_der)
    }
}

impl std::fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerIdentity").finish_non_exhaustive()
    }
}

/// Client trust material inherited from the host.
#[derive(Debug, Clone)]
pub struct ClientTrust {
    der: CertificateDer<'static>,
}

impl ClientTrust {
    /// Read the client certificate from the given environment variable.
    ///
    /// `Ok(None)` means the variable is absent or empty: the plugin runs at
    /// reduced security without mutual authentication. A present but
    /// malformed value is a startup failure.
    pub fn from_env(var: &str) -> Result<Option<Self>, ServeError> {
        let pem = match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => value,
            _ => {
                warn!(var, "no client certificate inherited; mutual TLS disabled");
                return Ok(None);
            }
        };
        match Self::from_pem(pem) {
            Some(trust) => Ok(Some(trust)),
            None => Err(ServeError::InvalidClientCertificate {
                var: var.to_string(),
            }),
        }
    }

    /// Parse a PEM blob as client trust material. The first CERTIFICATE
    /// block is the host's identity; anything else in the blob is ignored.
    pub fn from_pem(pem: String) -> Option<Self> {
        let der = rustls_pemfile::certs(&mut pem.as_bytes()).next()?.ok()?;
        Some(Self { der })
    }

    /// The exact certificate the transport layer will accept from the host.
    pub(crate) fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_is_pem_encoded() {
        let identity = ServerIdentity::generate().unwrap();
        assert!(identity
            .certificate_pem()
            .starts_with("-----BEGIN CERTIFICATE-----"));
    }

    #[test]
    fn negotiation_field_has_no_padding() {
        let identity = ServerIdentity::generate().unwrap();
        let field = identity.negotiation_field();
        assert!(!field.is_empty());
        assert!(!field.contains('='));
        assert!(!field.contains('|'));
    }

    #[test]
    fn fresh_identities_differ() {
        let a = ServerIdentity::generate().unwrap();
        let b = ServerIdentity::generate().unwrap();
        assert_ne!(a.negotiation_field(), b.negotiation_field());
    }

    #[test]
    fn client_trust_requires_a_certificate_block() {
        assert!(ClientTrust::from_pem("not a cert".to_string()).is_none());
        let identity = ServerIdentity::generate().unwrap();
        let trust = ClientTrust::from_pem(identity.certificate_pem().to_string()).unwrap();
        assert_eq!(
            trust.certificate_der().as_ref(),
            identity.certificate_der().as_ref()
        );
    }
}
