//! Vendored gRPC bindings for the plugin wire protocol.
//!
//! `plugin.rs` is `tonic-build` output for `proto/plugin.proto`, committed
//! so building the crate does not require `protoc`. To regenerate after a
//! proto change, run `tonic_build::compile_protos("proto/plugin.proto")`
//! from a scratch build script and copy the emitted `plugin.rs` here.

#[allow(clippy::all)]
#[rustfmt::skip]
pub mod plugin;
