//! Listening endpoints for the secured transport

use std::net::SocketAddr;
use std::path::PathBuf;

use tokio::net::{TcpListener, UnixListener};
use tracing::debug;

use crate::config::TransportPreference;
use crate::error::ServeError;

/// A bound (or parsed) transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// Loopback TCP address.
    Tcp(SocketAddr),
}

impl Endpoint {
    /// The network tag used in the negotiation line.
    pub fn network(&self) -> &'static str {
        match self {
            Self::Unix(_) => "unix",
            Self::Tcp(_) => "tcp",
        }
    }

    /// The address field used in the negotiation line.
    pub fn address(&self) -> String {
        match self {
            Self::Unix(path) => path.display().to_string(),
            Self::Tcp(addr) => addr.to_string(),
        }
    }

    /// Reassemble an endpoint from its negotiation-line fields.
    pub fn from_fields(network: &str, address: &str) -> Option<Self> {
        match network {
            "unix" => Some(Self::Unix(PathBuf::from(address))),
            "tcp" => address.parse().ok().map(Self::Tcp),
            _ => None,
        }
    }
}

/// A listener the RPC server will accept on.
pub(crate) enum Listener {
    Unix(UnixListener),
    Tcp(TcpListener),
}

/// Bind a listener according to the configured preference.
///
/// `Auto` tries a unix socket first and falls back to loopback TCP; the
/// explicit preferences fail instead of falling back.
pub(crate) async fn bind(
    preference: TransportPreference,
) -> Result<(Endpoint, Listener), ServeError> {
    match preference {
        TransportPreference::UnixSocket => bind_unix(),
        TransportPreference::Tcp => bind_tcp().await,
        TransportPreference::Auto => match bind_unix() {
            Ok(bound) => Ok(bound),
            Err(err) => {
                debug!(%err, "unix socket unavailable, falling back to tcp");
                bind_tcp().await
            }
        },
    }
}

fn bind_unix() -> Result<(Endpoint, Listener), ServeError> {
    let path = socket_path();
    let listener = UnixListener::bind(&path).map_err(|source| ServeError::Bind {
        endpoint: "unix",
        source,
    })?;
    debug!(path = %path.display(), "bound unix listener");
    Ok((Endpoint::Unix(path), Listener::Unix(listener)))
}

async fn bind_tcp() -> Result<(Endpoint, Listener), ServeError> {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .map_err(|source| ServeError::Bind {
            endpoint: "tcp",
            source,
        })?;
    let addr = listener.local_addr().map_err(|source| ServeError::Bind {
        endpoint: "tcp",
        source,
    })?;
    debug!(%addr, "bound tcp listener");
    Ok((Endpoint::Tcp(addr), Listener::Tcp(listener)))
}

/// A collision-free socket path in the system temp directory. The path is
/// keyed by pid plus a monotonic counter so repeated binds in one process
/// (tests, mainly) do not collide.
fn socket_path() -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "plugin-{}-{}.sock",
        std::process::id(),
        n
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_fields_round_trip() {
        let tcp = Endpoint::Tcp("127.0.0.1:51820".parse().unwrap());
        assert_eq!(
            Endpoint::from_fields(tcp.network(), &tcp.address()),
            Some(tcp)
        );

        let unix = Endpoint::Unix(PathBuf::from("/tmp/plugin-1.sock"));
        assert_eq!(
            Endpoint::from_fields(unix.network(), &unix.address()),
            Some(unix)
        );
    }

    #[test]
    fn unknown_network_is_rejected() {
        assert_eq!(Endpoint::from_fields("carrier-pigeon", "coop"), None);
        assert_eq!(Endpoint::from_fields("tcp", "not-an-addr"), None);
    }

    #[tokio::test]
    async fn auto_binds_somewhere() {
        let (endpoint, _listener) = bind(TransportPreference::Auto).await.unwrap();
        match &endpoint {
            Endpoint::Unix(path) => assert!(path.to_string_lossy().ends_with(".sock")),
            Endpoint::Tcp(addr) => assert!(addr.ip().is_loopback()),
        }
        if let Endpoint::Unix(path) = endpoint {
            let _ = std::fs::remove_file(path);
        }
    }

    #[tokio::test]
    async fn tcp_binds_loopback_ephemeral() {
        let (endpoint, _listener) = bind(TransportPreference::Tcp).await.unwrap();
        match endpoint {
            Endpoint::Tcp(addr) => {
                assert!(addr.ip().is_loopback());
                assert_ne!(addr.port(), 0);
            }
            Endpoint::Unix(_) => panic!("asked for tcp, got unix"),
        }
    }
}
