//! Scion Plugin Value Protocol
//!
//! This crate defines the schema-driven value codec spoken at the RPC
//! boundary between a Scion plugin and its host.
//!
//! # Protocol Overview
//!
//! Values cross the wire as a [`DynamicValue`]: an opaque byte buffer in one
//! of two encodings (human-legible JSON or compact msgpack) that is only
//! interpretable together with a [`TypeDescriptor`]. The encodings are
//! schema-free — a map and an object are wire-indistinguishable — so the
//! descriptor always travels out of band.
//!
//! Two asymmetries of the host contract are preserved deliberately:
//!
//! - Either encoding is accepted on ingress, but outbound values are
//!   conventionally msgpack.
//! - Type descriptors themselves are always serialized as JSON
//!   ([`TypeDescriptor::to_wire`]), independent of the value encoding.

mod codec;
mod descriptor;
mod error;
mod value;

pub use codec::{decode, encode, DynamicValue, WireFormat};
pub use descriptor::{AttributeType, TypeDescriptor};
pub use error::CodecError;
pub use value::Value;
