//! Startup orchestration
//!
//! [`Server::bind`] performs the pre-flight and bind steps; [`serve`] wraps
//! them for the common case: emit the negotiation line on stdout and block
//! until the lifecycle supervisor terminates. The split exists so tests and
//! embedders can drive a bound transport without owning the process's
//! stdout or its exit.

use std::future::Future;
use std::io::Write as _;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::{TcpListenerStream, UnixListenerStream};
use tonic::transport::Server as TonicServer;
use tonic_health::ServingStatus;
use tracing::{error, info, warn};

use crate::cert::{ClientTrust, ServerIdentity};
use crate::config::ServeConfig;
use crate::control::ControllerService;
use crate::dispatch::{DispatchService, PluginHandler};
use crate::error::ServeError;
use crate::handshake::{
    negotiate_protocol_version, NegotiationRecord, RpcProtocol, CORE_PROTOCOL_VERSION,
};
use crate::lifecycle::Supervisor;
use crate::rpc::plugin::dispatch_server::DispatchServer;
use crate::rpc::plugin::grpc_controller_server::GrpcControllerServer;
use crate::tls;
use crate::transport::{self, Endpoint, Listener};

/// How long the transport may spend closing connections once the supervisor
/// is terminated. In-flight calls that outlive this window are cut; their
/// drain allowance was already spent by the supervisor's grace deadline.
const CLOSE_WINDOW: Duration = Duration::from_secs(1);

/// Serve a plugin the way a host expects.
///
/// On success this emits the negotiation line, blocks for the process
/// lifetime, and exits when the supervisor reaches terminated. On a startup
/// failure it writes one line of free diagnostic text to stdout — the only
/// channel the host surfaces — and exits nonzero. It never writes anything
/// else to stdout: any stray output there would corrupt the handshake.
pub async fn serve<H: PluginHandler>(config: ServeConfig, handler: H) -> ! {
    match Server::bind(config, handler).await {
        Ok(bound) => {
            {
                let mut stdout = std::io::stdout().lock();
                let wrote = writeln!(stdout, "{}", bound.negotiation())
                    .and_then(|()| stdout.flush());
                if wrote.is_err() {
                    // stdout gone means the launcher is gone
                    std::process::exit(1);
                }
            }
            match bound.serve().await {
                Ok(()) => std::process::exit(0),
                Err(err) => {
                    error!(%err, "transport failed");
                    std::process::exit(1);
                }
            }
        }
        Err(err) => {
            // Free text on stdout; the host displays it verbatim as the
            // whole user-facing diagnosis. Stderr is never read by the host.
            println!("{err}");
            let _ = std::io::stdout().flush();
            std::process::exit(1);
        }
    }
}

/// A bound, not-yet-serving plugin server.
pub struct Server<H> {
    config: ServeConfig,
    handler: Arc<H>,
    supervisor: Arc<Supervisor>,
    identity: ServerIdentity,
    client_trust: Option<ClientTrust>,
    record: NegotiationRecord,
    listener: Listener,
}

impl<H: PluginHandler> Server<H> {
    /// Run the pre-flight checks and bind the transport, in the order the
    /// handshake demands: cookie, version negotiation, trust material,
    /// server identity, listener.
    pub async fn bind(config: ServeConfig, handler: H) -> Result<Self, ServeError> {
        check_magic_cookie(&config)?;
        let advertised = std::env::var(&config.protocol_versions_var).ok();
        let protocol_version =
            negotiate_protocol_version(&config.protocol_versions, advertised.as_deref())?;
        let client_trust = ClientTrust::from_env(&config.client_cert_var)?;
        let identity = ServerIdentity::generate()?;
        let (endpoint, listener) = transport::bind(config.transport).await?;
        let supervisor = Supervisor::new(config.drain_grace());
        let record = NegotiationRecord {
            core_version: CORE_PROTOCOL_VERSION,
            protocol_version,
            endpoint,
            rpc_protocol: RpcProtocol::Grpc,
            server_certificate: Some(identity.negotiation_field()),
        };
        info!(
            endpoint = %record.endpoint.address(),
            protocol_version,
            mutual_tls = client_trust.is_some(),
            "plugin transport bound"
        );
        Ok(Self {
            config,
            handler: Arc::new(handler),
            supervisor,
            identity,
            client_trust,
            record,
            listener,
        })
    }

    /// The record the handshake line is rendered from. Immutable once bound.
    pub fn negotiation(&self) -> &NegotiationRecord {
        &self.record
    }

    /// Handle on the lifecycle supervisor, for embedders and tests.
    pub fn supervisor(&self) -> Arc<Supervisor> {
        Arc::clone(&self.supervisor)
    }

    /// PEM form of the server certificate, as a dialing host trusts it.
    pub fn server_certificate_pem(&self) -> &str {
        self.identity.certificate_pem()
    }

    /// Serve until the supervisor reaches terminated.
    ///
    /// Starts the drain driver and the orphan watch, installs transport
    /// security, and runs the three RPC surfaces (health, control plane,
    /// domain dispatch) on the bound listener. TLS-rejected connections are
    /// logged by the transport and dropped; they never stop the server.
    /// Once the supervisor terminates, connections get [`CLOSE_WINDOW`] to
    /// finish gracefully before the transport is stopped outright — a call
    /// that survived the drain grace must not keep the process alive.
    pub async fn serve(self) -> Result<(), ServeError> {
        self.supervisor.mark_serving();
        tokio::spawn(Arc::clone(&self.supervisor).run_drain());
        #[cfg(unix)]
        crate::lifecycle::spawn_orphan_watch(
            Arc::clone(&self.supervisor),
            self.config.orphan_poll(),
        );

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_service_status(self.config.service_name.as_str(), ServingStatus::Serving)
            .await;

        if self.client_trust.is_none() {
            warn!("no client trust material; serving without mutual authentication");
        }
        let tls_config = tls::server_config(&self.identity, self.client_trust.as_ref())?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let mut router = TonicServer::builder().add_service(health_service);
        if self.config.enable_controller {
            let controller = ControllerService::new(
                Arc::clone(&self.supervisor),
                health_reporter.clone(),
                self.config.service_name.clone(),
            );
            router = router.add_service(GrpcControllerServer::new(controller));
        }
        let router = router.add_service(DispatchServer::new(DispatchService::new(
            Arc::clone(&self.handler),
            Arc::clone(&self.supervisor),
        )));

        let endpoint = self.record.endpoint.clone();
        type ServeFuture = Pin<Box<dyn Future<Output = Result<(), tonic::transport::Error>> + Send>>;
        let mut graceful: ServeFuture = match self.listener {
            Listener::Tcp(listener) => {
                let supervisor = Arc::clone(&self.supervisor);
                Box::pin(router.serve_with_incoming_shutdown(
                    tls::secure(TcpListenerStream::new(listener), acceptor),
                    async move { supervisor.terminated().await },
                ))
            }
            Listener::Unix(listener) => {
                let supervisor = Arc::clone(&self.supervisor);
                Box::pin(router.serve_with_incoming_shutdown(
                    tls::secure(UnixListenerStream::new(listener), acceptor),
                    async move { supervisor.terminated().await },
                ))
            }
        };

        let hard_stop = {
            let supervisor = Arc::clone(&self.supervisor);
            async move {
                supervisor.terminated().await;
                tokio::time::sleep(CLOSE_WINDOW).await;
            }
        };
        let result = tokio::select! {
            result = &mut graceful => result,
            () = hard_stop => {
                warn!("in-flight work outlived termination, closing the transport");
                Ok(())
            }
        };
        if let Endpoint::Unix(path) = &endpoint {
            let _ = std::fs::remove_file(path);
        }
        result?;
        info!("transport stopped");
        Ok(())
    }
}

/// Verify the host's magic cookie. This is a user-experience check, not a
/// security measure: its only purpose is a readable diagnosis when someone
/// runs the plugin binary by hand. An empty configured value disables it.
fn check_magic_cookie(config: &ServeConfig) -> Result<(), ServeError> {
    if config.magic_cookie_value.is_empty() {
        return Ok(());
    }
    match std::env::var(&config.magic_cookie_key) {
        Ok(value) if value == config.magic_cookie_value => Ok(()),
        _ => Err(ServeError::NotLaunchedByHost),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_cookie_value_disables_the_check() {
        let config = ServeConfig::default();
        assert!(check_magic_cookie(&config).is_ok());
    }

    #[test]
    fn missing_or_wrong_cookie_is_a_startup_failure() {
        let config = ServeConfig::default()
            .with_magic_cookie("SCION_TEST_COOKIE_MISSING", "expected");
        assert!(matches!(
            check_magic_cookie(&config),
            Err(ServeError::NotLaunchedByHost)
        ));

        std::env::set_var("SCION_TEST_COOKIE_WRONG", "unexpected");
        let config = ServeConfig::default()
            .with_magic_cookie("SCION_TEST_COOKIE_WRONG", "expected");
        assert!(matches!(
            check_magic_cookie(&config),
            Err(ServeError::NotLaunchedByHost)
        ));
    }

    #[test]
    fn matching_cookie_passes() {
        std::env::set_var("SCION_TEST_COOKIE_OK", "expected");
        let config = ServeConfig::default().with_magic_cookie("SCION_TEST_COOKIE_OK", "expected");
        assert!(check_magic_cookie(&config).is_ok());
    }

    #[test]
    fn cookie_failure_text_is_self_contained() {
        // The host frames this text with a generic "not a valid negotiation
        // record" message, so the text itself must carry the diagnosis.
        let text = ServeError::NotLaunchedByHost.to_string();
        assert!(text.contains("plugin"));
        assert!(text.contains("host"));
    }
}
