//! Schema registry: decoders for typed bodies, keyed by type tag.
//!
//! The registry is the decode side of the schema layer. Types are registered
//! at runtime; the set of known tags is published on a `watch` channel so
//! that interested components (the response handler) can follow updates.
//!
//! # Example
//!
//! ```ignore
//! let schema = SchemaRegistry::new();
//! schema.register::<Pong>();
//!
//! let envelope = schema.decode_envelope(packet.payload())?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use super::body::{Body, TypeTag, TypedBody};
use super::envelope::{MessageEnvelope, RawEnvelope};
use super::msgpack::MsgPackCodec;
use crate::error::{MtwireError, Result};

/// Decoder turning MsgPack body bytes into a type-erased body.
type DecodeFn = Arc<dyn Fn(&[u8]) -> Result<Body> + Send + Sync>;

/// Live set of body tags the schema can decode.
pub type KnownTypes = watch::Receiver<HashSet<TypeTag>>;

/// Registry mapping type tags to body decoders.
pub struct SchemaRegistry {
    decoders: RwLock<HashMap<TypeTag, DecodeFn>>,
    known: watch::Sender<HashSet<TypeTag>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (known, _) = watch::channel(HashSet::new());
        Self {
            decoders: RwLock::new(HashMap::new()),
            known,
        }
    }

    /// Register `T` under its type tag, replacing any previous decoder.
    pub fn register<T: TypedBody>(&self) {
        let decoder: DecodeFn =
            Arc::new(|bytes: &[u8]| MsgPackCodec::decode::<T>(bytes).map(Body::new));
        self.decoders.write().insert(T::TYPE_TAG, decoder);
        self.known.send_modify(|known| {
            known.insert(T::TYPE_TAG);
        });
        tracing::debug!(type_tag = %T::TYPE_TAG, "registered body type");
    }

    /// Remove a tag. Returns whether it was registered.
    pub fn unregister(&self, tag: TypeTag) -> bool {
        let removed = self.decoders.write().remove(&tag).is_some();
        if removed {
            self.known.send_modify(|known| {
                known.remove(&tag);
            });
        }
        removed
    }

    pub fn is_known(&self, tag: TypeTag) -> bool {
        self.decoders.read().contains_key(&tag)
    }

    /// Subscribe to the set of known tags.
    pub fn known_types(&self) -> KnownTypes {
        self.known.subscribe()
    }

    /// Decode the MsgPack bytes of a body with tag `tag`.
    pub fn decode_body(&self, tag: TypeTag, bytes: &[u8]) -> Result<Body> {
        let decoder = self
            .decoders
            .read()
            .get(&tag)
            .cloned()
            .ok_or(MtwireError::UnknownType(tag))?;
        decoder(bytes)
    }

    /// Decode a whole packet payload.
    pub fn decode_envelope(&self, payload: &[u8]) -> Result<MessageEnvelope> {
        let raw = RawEnvelope::parse(payload)?;
        let body = self.decode_body(raw.type_tag, raw.body)?;
        Ok(MessageEnvelope {
            auth_key_id: raw.auth_key_id,
            message_id: raw.message_id,
            body,
        })
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
