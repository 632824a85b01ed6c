//! Runtime error taxonomy

use thiserror::Error;

/// Fatal startup errors.
///
/// Everything here belongs to the StartupFailure class: it is reported as a
/// single line of free text on stdout (the host displays it verbatim) and
/// the process exits nonzero. Nothing is retried internally. Faults that
/// occur after the negotiation line was written are connection- or
/// call-scoped and never surface through this type.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The launch environment lacks the host's magic cookie, meaning the
    /// binary was executed directly rather than by its host.
    #[error(
        "this binary is a plugin and is not meant to be executed directly; \
         it must be launched by its host application"
    )]
    NotLaunchedByHost,

    /// Host and plugin share no protocol version.
    #[error(
        "no protocol version supported by both sides: host accepts {host:?}, \
         plugin supports {plugin:?}"
    )]
    NoCommonVersion { host: Vec<u32>, plugin: Vec<u32> },

    /// The inherited client certificate was present but unusable.
    #[error("client certificate in {var} is not a PEM certificate")]
    InvalidClientCertificate { var: String },

    /// Generating the per-process server identity failed.
    #[error("server certificate generation failed: {0}")]
    Certificate(#[from] rcgen::Error),

    /// The listening endpoint could not be bound.
    #[error("failed to bind {endpoint} listener: {source}")]
    Bind {
        endpoint: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Assembling the TLS session configuration failed.
    #[error("tls configuration failed: {0}")]
    Tls(#[from] rustls::Error),

    /// The transport layer failed while configuring or serving.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
