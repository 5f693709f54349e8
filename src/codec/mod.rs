//! Codec module - message bodies, envelopes and the schema registry.
//!
//! This module is the narrow interface to the schema layer:
//!
//! - [`TypeTag`], [`MessageBody`], [`TypedBody`], [`Body`] - tag-routed bodies
//! - [`MsgPackCodec`] - body serialization using `rmp-serde`
//! - [`MessageEnvelope`] - the message layout inside a packet payload
//! - [`SchemaRegistry`] - runtime registry of decodable body types
//!
//! # Example
//!
//! ```
//! use mtwire_client::codec::{encode_message, MessageBody, SchemaRegistry, TypeTag, TypedBody};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, Debug)]
//! struct Pong {
//!     ping_id: i64,
//! }
//!
//! impl MessageBody for Pong {
//!     fn type_tag(&self) -> TypeTag {
//!         Self::TYPE_TAG
//!     }
//! }
//!
//! impl TypedBody for Pong {
//!     const TYPE_TAG: TypeTag = TypeTag(0x347773c5);
//! }
//!
//! let schema = SchemaRegistry::new();
//! schema.register::<Pong>();
//!
//! let payload = encode_message(0, 4, &Pong { ping_id: 1 }).unwrap();
//! let envelope = schema.decode_envelope(&payload).unwrap();
//! assert_eq!(envelope.body.downcast_ref::<Pong>().unwrap().ping_id, 1);
//! ```

mod body;
mod envelope;
mod msgpack;
mod schema;

pub use body::{AsAny, Body, MessageBody, TypeTag, TypedBody};
pub use envelope::{
    encode_message, MessageEnvelope, MessageIdGenerator, RawEnvelope, ENVELOPE_HEADER_SIZE,
};
pub use msgpack::{MsgPackCodec, TYPE_TAG_SIZE};
pub use schema::{KnownTypes, SchemaRegistry};
