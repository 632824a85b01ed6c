//! Scion
//!
//! The plugin-side runtime for host-launched plugin processes: perform the
//! startup handshake over stdout, serve the domain RPC surface over
//! mutually-authenticated gRPC, and wind down cooperatively when the host
//! asks (or abruptly when it disappears).
//!
//! A plugin binary is a handler plus one call:
//!
//! ```no_run
//! use async_trait::async_trait;
//! use scion::{OperationSchema, PluginHandler, ServeConfig, TypeDescriptor, Value};
//! use tonic::Status;
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl PluginHandler for Greeter {
//!     fn schema(&self, operation: &str) -> Option<OperationSchema> {
//!         (operation == "greet").then(|| OperationSchema {
//!             argument: TypeDescriptor::String,
//!             result: TypeDescriptor::String,
//!         })
//!     }
//!
//!     async fn call(&self, _operation: &str, argument: Value) -> Result<Value, Status> {
//!         match argument {
//!             Value::String(name) => Ok(Value::String(format!("hello, {name}"))),
//!             other => Err(Status::invalid_argument(other.kind().to_string())),
//!         }
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     scion::serve(ServeConfig::default(), Greeter).await
//! }
//! ```

#![forbid(unsafe_code)]

mod cert;
mod commit;
mod config;
mod control;
mod dispatch;
mod error;
mod handshake;
mod lifecycle;
pub mod rpc;
mod serve;
mod tls;
mod transport;

pub use cert::{ClientTrust, ServerIdentity};
pub use commit::{CommitGate, CommitGuard};
pub use config::{ServeConfig, TransportPreference};
pub use dispatch::{OperationSchema, PluginHandler};
pub use error::ServeError;
pub use handshake::{
    NegotiationParseError, NegotiationRecord, RpcProtocol, CORE_PROTOCOL_VERSION,
};
pub use lifecycle::{LifecycleState, RpcGuard, Supervisor};
pub use serve::{serve, Server};
pub use transport::Endpoint;

// The value model crosses the handler boundary; spare plugin binaries a
// second explicit dependency for it.
pub use scion_protocol::{
    AttributeType, CodecError, DynamicValue, TypeDescriptor, Value, WireFormat,
};
