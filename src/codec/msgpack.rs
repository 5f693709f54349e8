//! MsgPack body codec using `rmp-serde`.
//!
//! Message bodies are serialized as a little-endian `u32` type tag followed
//! by the MessagePack encoding of the body struct. Structs are written with
//! `to_vec_named` so field order changes on either side stay compatible.
//!
//! # Example
//!
//! ```
//! use mtwire_client::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Ping {
//!     ping_id: i64,
//! }
//!
//! let encoded = MsgPackCodec::encode(&Ping { ping_id: 7 }).unwrap();
//! let decoded: Ping = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded.ping_id, 7);
//! ```

use super::body::{TypeTag, TypedBody};
use crate::error::{MtwireError, Result};

/// Size of the type tag in front of every body.
pub const TYPE_TAG_SIZE: usize = 4;

/// MessagePack codec for structured bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Encode a typed body with its tag in front.
    pub fn encode_body<T: TypedBody>(body: &T) -> Result<Vec<u8>> {
        let encoded = Self::encode(body)?;
        let mut buf = Vec::with_capacity(TYPE_TAG_SIZE + encoded.len());
        buf.extend_from_slice(&T::TYPE_TAG.0.to_le_bytes());
        buf.extend_from_slice(&encoded);
        Ok(buf)
    }

    /// Split a tagged body into its tag and MsgPack bytes.
    pub fn split_tag(bytes: &[u8]) -> Result<(TypeTag, &[u8])> {
        if bytes.len() < TYPE_TAG_SIZE {
            return Err(MtwireError::Decode(format!(
                "body of {} bytes has no type tag",
                bytes.len()
            )));
        }
        let tag = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok((TypeTag(tag), &bytes[TYPE_TAG_SIZE..]))
    }
}
