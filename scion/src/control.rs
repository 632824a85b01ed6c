//! Control plane: the cooperative-shutdown surface
//!
//! Logically separate from domain dispatch. A shutdown request flips the
//! supervisor into draining and is acknowledged immediately — the drain
//! itself, and the eventual exit, happen asynchronously in the supervisor.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};
use tonic_health::server::HealthReporter;
use tonic_health::ServingStatus;
use tracing::info;

use crate::lifecycle::Supervisor;
use crate::rpc::plugin::grpc_controller_server::GrpcController;
use crate::rpc::plugin::Empty;

pub(crate) struct ControllerService {
    supervisor: Arc<Supervisor>,
    health: HealthReporter,
    service_name: String,
}

impl ControllerService {
    pub(crate) fn new(
        supervisor: Arc<Supervisor>,
        health: HealthReporter,
        service_name: String,
    ) -> Self {
        Self {
            supervisor,
            health,
            service_name,
        }
    }
}

#[async_trait]
impl GrpcController for ControllerService {
    async fn shutdown(&self, _request: Request<Empty>) -> Result<Response<Empty>, Status> {
        info!("host requested cooperative shutdown");
        let mut health = self.health.clone();
        health
            .set_service_status(self.service_name.as_str(), ServingStatus::NotServing)
            .await;
        self.supervisor.request_shutdown();
        // Ack now; never block the rpc on drain completion.
        Ok(Response::new(Empty {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use std::time::Duration;

    #[tokio::test]
    async fn shutdown_acks_immediately_and_starts_draining() {
        let supervisor = Supervisor::new(Duration::from_secs(5));
        supervisor.mark_serving();
        let (reporter, _service) = tonic_health::server::health_reporter();
        let controller = ControllerService::new(
            Arc::clone(&supervisor),
            reporter,
            "plugin".to_string(),
        );

        let _held = supervisor.begin_rpc().unwrap();
        controller.shutdown(Request::new(Empty {})).await.unwrap();

        // Acked while a call is still in flight; state is draining, not
        // terminated.
        assert_eq!(supervisor.state(), LifecycleState::Draining);
        assert_eq!(supervisor.inflight_count(), 1);
    }

    #[tokio::test]
    async fn repeated_shutdown_is_idempotent() {
        let supervisor = Supervisor::new(Duration::from_secs(5));
        supervisor.mark_serving();
        let (reporter, _service) = tonic_health::server::health_reporter();
        let controller = ControllerService::new(
            Arc::clone(&supervisor),
            reporter,
            "plugin".to_string(),
        );

        controller.shutdown(Request::new(Empty {})).await.unwrap();
        controller.shutdown(Request::new(Empty {})).await.unwrap();
        assert_eq!(supervisor.state(), LifecycleState::Draining);
    }
}
