//! Transport security assembly
//!
//! tonic's bundled server TLS config verifies client certificates through
//! webpki path validation, which refuses the self-signed identity a real
//! host presents. The session therefore runs on a hand-assembled rustls
//! configuration: the per-process server identity plus, when the host handed
//! over a client certificate, a verifier that accepts exactly that
//! certificate and nothing else.

use std::io;
use std::sync::Arc;

use rustls::client::danger::HandshakeSignatureValid;
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{
    CertificateError, DigitallySignedStruct, DistinguishedName, ServerConfig, SignatureScheme,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_stream::{Stream, StreamExt};
use tracing::warn;

use crate::cert::{ClientTrust, ServerIdentity};
use crate::error::ServeError;

/// Build the session's rustls configuration. With trust material present the
/// handshake demands the pinned host certificate; without it the session is
/// server-authenticated only.
pub(crate) fn server_config(
    identity: &ServerIdentity,
    trust: Option<&ClientTrust>,
) -> Result<ServerConfig, ServeError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let algorithms = provider.signature_verification_algorithms;
    let builder = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?;
    let builder = match trust {
        Some(trust) => builder.with_client_cert_verifier(Arc::new(PinnedHostVerifier {
            pinned: trust.certificate_der().clone(),
            algorithms,
        })),
        None => builder.with_no_client_auth(),
    };
    let mut config =
        builder.with_single_cert(vec![identity.certificate_der()], identity.private_key_der())?;
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

/// Wrap an accept stream in the TLS handshake.
///
/// A failed handshake is a connection-scoped fault: logged, dropped, and the
/// stream keeps accepting. Surfacing it as a stream error instead would tear
/// the whole server down on the first stray client.
pub(crate) fn secure<S, IO>(
    incoming: S,
    acceptor: TlsAcceptor,
) -> impl Stream<Item = io::Result<TlsStream<IO>>>
where
    S: Stream<Item = io::Result<IO>>,
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    incoming
        .then(move |conn| {
            let acceptor = acceptor.clone();
            async move { acceptor.accept(conn?).await }
        })
        .filter_map(|handshake| match handshake {
            Ok(stream) => Some(Ok(stream)),
            Err(err) => {
                warn!(%err, "connection dropped during tls negotiation");
                None
            }
        })
}

/// Accepts exactly the client certificate inherited from the host.
///
/// Hosts mint a fresh self-signed certificate per launch and hand it to the
/// plugin verbatim, so client identity here is byte equality with that
/// certificate, not chain building against a CA.
#[derive(Debug)]
struct PinnedHostVerifier {
    pinned: CertificateDer<'static>,
    algorithms: WebPkiSupportedAlgorithms,
}

impl ClientCertVerifier for PinnedHostVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        if end_entity.as_ref() == self.pinned.as_ref() {
            Ok(ClientCertVerified::assertion())
        } else {
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
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::{ClientTrust, ServerIdentity};

    #[test]
    fn pinned_verifier_accepts_only_the_inherited_certificate() {
        let host = ServerIdentity::generate().unwrap();
        let stranger = ServerIdentity::generate().unwrap();
        let trust = ClientTrust::from_pem(host.certificate_pem().to_string()).unwrap();

        let verifier = PinnedHostVerifier {
            pinned: trust.certificate_der().clone(),
            algorithms: rustls::crypto::ring::default_provider().signature_verification_algorithms,
        };

        let now = UnixTime::now();
        assert!(verifier
            .verify_client_cert(&host.certificate_der(), &[], now)
            .is_ok());
        assert!(verifier
            .verify_client_cert(&stranger.certificate_der(), &[], now)
            .is_err());
    }

    #[test]
    fn config_builds_with_and_without_trust() {
        let identity = ServerIdentity::generate().unwrap();
        let trust = ClientTrust::from_pem(identity.certificate_pem().to_string()).unwrap();
        assert!(server_config(&identity, None).is_ok());
        assert!(server_config(&identity, Some(&trust)).is_ok());
    }
}
