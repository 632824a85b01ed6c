//! Domain RPC dispatch
//!
//! The transport hands domain calls through here: payload bytes are
//! translated at the attribute-value boundary by the codec, the plugin
//! author's handler runs, and the result goes back out msgpack-encoded.
//! Codec failures are scoped to the call that carried them.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

use scion_protocol::{decode, encode, CodecError, DynamicValue, TypeDescriptor, Value, WireFormat};

use crate::lifecycle::Supervisor;
use crate::rpc::plugin;

/// The argument and result types of one domain operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSchema {
    pub argument: TypeDescriptor,
    pub result: TypeDescriptor,
}

/// Business logic implemented by the plugin author.
///
/// Operations are schema-described: the runtime decodes the wire argument
/// against [`PluginHandler::schema`] before the handler ever sees it, and
/// encodes the handler's result the same way. Handlers should finish or
/// fail promptly — nothing short of process termination interrupts them —
/// and any side effect must go through a [`crate::CommitGate`] so an
/// uncatchable kill cannot leave it half-applied.
#[async_trait]
pub trait PluginHandler: Send + Sync + 'static {
    /// The schema for an operation, or `None` if the operation is unknown.
    fn schema(&self, operation: &str) -> Option<OperationSchema>;

    /// Execute one operation. The argument has already been validated
    /// against the operation's argument descriptor.
    async fn call(&self, operation: &str, argument: Value) -> Result<Value, Status>;
}

/// The `plugin.Dispatch` service: bridges the wire to a [`PluginHandler`].
pub(crate) struct DispatchService<H> {
    handler: Arc<H>,
    supervisor: Arc<Supervisor>,
}

impl<H> DispatchService<H> {
    pub(crate) fn new(handler: Arc<H>, supervisor: Arc<Supervisor>) -> Self {
        Self {
            handler,
            supervisor,
        }
    }
}

/// Pick whichever encoding the host used. Ingress is tolerant: msgpack is
/// preferred, JSON accepted.
fn decode_argument(
    wire: &plugin::DynamicValue,
    descriptor: &TypeDescriptor,
) -> Result<Value, CodecError> {
    let dynamic = if !wire.msgpack.is_empty() {
        DynamicValue::from_msgpack(wire.msgpack.clone())
    } else {
        DynamicValue::from_json(wire.json.clone())
    };
    decode(&dynamic, descriptor)
}

#[async_trait]
impl<H: PluginHandler> plugin::dispatch_server::Dispatch for DispatchService<H> {
    async fn schema(
        &self,
        request: Request<plugin::SchemaRequest>,
    ) -> Result<Response<plugin::SchemaResponse>, Status> {
        let _guard = self
            .supervisor
            .begin_rpc()
            .ok_or_else(|| Status::unavailable("plugin is shutting down"))?;
        let operation = request.into_inner().operation;
        let schema = self
            .handler
            .schema(&operation)
            .ok_or_else(|| Status::unimplemented(format!("unknown operation {operation:?}")))?;
        Ok(Response::new(plugin::SchemaResponse {
            argument_type: schema.argument.to_wire(),
            result_type: schema.result.to_wire(),
        }))
    }

    async fn call(
        &self,
        request: Request<plugin::CallRequest>,
    ) -> Result<Response<plugin::CallResponse>, Status> {
        let _guard = self
            .supervisor
            .begin_rpc()
            .ok_or_else(|| Status::unavailable("plugin is shutting down"))?;
        let req = request.into_inner();
        let schema = self
            .handler
            .schema(&req.operation)
            .ok_or_else(|| Status::unimplemented(format!("unknown operation {:?}", req.operation)))?;

        let argument = match &req.argument {
            Some(wire) => decode_argument(wire, &schema.argument)
                .map_err(|err| Status::invalid_argument(err.to_string()))?,
            None => Value::Null,
        };

        debug!(operation = %req.operation, "dispatching domain rpc");
        let result = self.handler.call(&req.operation, argument).await?;

        // Outbound convention is always the compact-binary encoding.
        let encoded = encode(&result, &schema.result, WireFormat::Msgpack).map_err(|err| {
            warn!(operation = %req.operation, %err, "result does not match its schema");
            Status::internal(err.to_string())
        })?;
        Ok(Response::new(plugin::CallResponse {
            result: Some(plugin::DynamicValue {
                msgpack: encoded.into_bytes(),
                json: Vec::new(),
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::plugin::dispatch_server::Dispatch as _;
    use std::time::Duration;

    struct Upcase;

    #[async_trait]
    impl PluginHandler for Upcase {
        fn schema(&self, operation: &str) -> Option<OperationSchema> {
            (operation == "upcase").then(|| OperationSchema {
                argument: TypeDescriptor::String,
                result: TypeDescriptor::String,
            })
        }

        async fn call(&self, _operation: &str, argument: Value) -> Result<Value, Status> {
            match argument {
                Value::String(s) => Ok(Value::String(s.to_uppercase())),
                other => Err(Status::invalid_argument(format!(
                    "expected string, got {}",
                    other.kind()
                ))),
            }
        }
    }

    fn service() -> DispatchService<Upcase> {
        let supervisor = Supervisor::new(Duration::from_secs(5));
        supervisor.mark_serving();
        DispatchService::new(Arc::new(Upcase), supervisor)
    }

    fn msgpack_argument(value: &Value, descriptor: &TypeDescriptor) -> plugin::DynamicValue {
        let wire = encode(value, descriptor, WireFormat::Msgpack).unwrap();
        plugin::DynamicValue {
            msgpack: wire.into_bytes(),
            json: Vec::new(),
        }
    }

    #[tokio::test]
    async fn dispatches_and_answers_in_msgpack() {
        let svc = service();
        let response = svc
            .call(Request::new(plugin::CallRequest {
                operation: "upcase".to_string(),
                argument: Some(msgpack_argument(
                    &Value::from("quiet"),
                    &TypeDescriptor::String,
                )),
            }))
            .await
            .unwrap()
            .into_inner();

        let wire = response.result.unwrap();
        assert!(wire.json.is_empty(), "egress must be compact-binary");
        let decoded = decode(
            &DynamicValue::from_msgpack(wire.msgpack),
            &TypeDescriptor::String,
        )
        .unwrap();
        assert_eq!(decoded, Value::from("QUIET"));
    }

    #[tokio::test]
    async fn accepts_json_on_ingress() {
        let svc = service();
        let response = svc
            .call(Request::new(plugin::CallRequest {
                operation: "upcase".to_string(),
                argument: Some(plugin::DynamicValue {
                    msgpack: Vec::new(),
                    json: br#""loud""#.to_vec(),
                }),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn unknown_operation_is_unimplemented() {
        let svc = service();
        let status = svc
            .call(Request::new(plugin::CallRequest {
                operation: "transmogrify".to_string(),
                argument: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unimplemented);
    }

    #[tokio::test]
    async fn shape_mismatch_is_invalid_argument() {
        let svc = service();
        let status = svc
            .call(Request::new(plugin::CallRequest {
                operation: "upcase".to_string(),
                argument: Some(plugin::DynamicValue {
                    msgpack: Vec::new(),
                    json: br#"{"not":"a string"}"#.to_vec(),
                }),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
        assert!(status.message().contains("type mismatch"), "{status}");
    }

    #[tokio::test]
    async fn refused_once_draining() {
        let supervisor = Supervisor::new(Duration::from_secs(5));
        supervisor.mark_serving();
        supervisor.request_shutdown();
        let svc = DispatchService::new(Arc::new(Upcase), supervisor);
        let status = svc
            .schema(Request::new(plugin::SchemaRequest {
                operation: "upcase".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
    }

    #[tokio::test]
    async fn schema_is_served_json_encoded() {
        let svc = service();
        let response = svc
            .schema(Request::new(plugin::SchemaRequest {
                operation: "upcase".to_string(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(
            TypeDescriptor::from_wire(&response.argument_type).unwrap(),
            TypeDescriptor::String
        );
        assert_eq!(response.argument_type, br#""string""#.to_vec());
    }
}
