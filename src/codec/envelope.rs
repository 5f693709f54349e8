//! Message envelope carried in every packet payload.
//!
//! Implements the plain-text message layout:
//! ```text
//! ┌─────────────┬────────────┬─────────────┬──────────┬──────────┐
//! │ Auth key ID │ Message ID │ Body length │ Type tag │ Body     │
//! │ 8 bytes     │ 8 bytes    │ 4 bytes     │ 4 bytes  │ N bytes  │
//! │ int64 LE    │ int64 LE   │ uint32 LE   │ uint32 LE│ MsgPack  │
//! └─────────────┴────────────┴─────────────┴──────────┴──────────┘
//! ```
//!
//! `body length` covers the type tag and the body.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Buf;

use super::body::{Body, TypeTag, TypedBody};
use super::msgpack::MsgPackCodec;
use crate::error::{MtwireError, Result};

/// Bytes in front of the tagged body.
pub const ENVELOPE_HEADER_SIZE: usize = 20;

/// A decoded message.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub auth_key_id: i64,
    pub message_id: i64,
    pub body: Body,
}

impl MessageEnvelope {
    #[inline]
    pub fn type_tag(&self) -> TypeTag {
        self.body.type_tag()
    }
}

/// Envelope fields with the body still undecoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEnvelope<'a> {
    pub auth_key_id: i64,
    pub message_id: i64,
    pub type_tag: TypeTag,
    /// MsgPack body bytes after the tag.
    pub body: &'a [u8],
}

impl<'a> RawEnvelope<'a> {
    /// Parse the envelope header out of a packet payload.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        if payload.len() < ENVELOPE_HEADER_SIZE {
            return Err(MtwireError::Decode(format!(
                "payload of {} bytes is shorter than the envelope header",
                payload.len()
            )));
        }

        let (mut header, tagged) = payload.split_at(ENVELOPE_HEADER_SIZE);
        let auth_key_id = header.get_i64_le();
        let message_id = header.get_i64_le();
        let body_length = header.get_u32_le() as usize;

        if tagged.len() != body_length {
            return Err(MtwireError::Decode(format!(
                "body length {} does not match the {} bytes carried",
                body_length,
                tagged.len()
            )));
        }

        let (type_tag, body) = MsgPackCodec::split_tag(tagged)?;
        Ok(Self {
            auth_key_id,
            message_id,
            type_tag,
            body,
        })
    }
}

/// Serialize a typed body into an envelope payload.
pub fn encode_message<T: TypedBody>(auth_key_id: i64, message_id: i64, body: &T) -> Result<Vec<u8>> {
    let tagged = MsgPackCodec::encode_body(body)?;
    let body_length = u32::try_from(tagged.len()).map_err(|_| MtwireError::SizeExceeded {
        requested: tagged.len(),
        max: u32::MAX as usize,
    })?;

    let mut buf = Vec::with_capacity(ENVELOPE_HEADER_SIZE + tagged.len());
    buf.extend_from_slice(&auth_key_id.to_le_bytes());
    buf.extend_from_slice(&message_id.to_le_bytes());
    buf.extend_from_slice(&body_length.to_le_bytes());
    buf.extend_from_slice(&tagged);
    Ok(buf)
}

/// Generator of client message ids.
///
/// Ids approximate `unix_time * 2^32`, are divisible by 4 and strictly
/// increase for the generator's lifetime.
#[derive(Debug, Default)]
pub struct MessageIdGenerator {
    last: AtomicI64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let candidate =
            ((now.as_secs() as i64) << 32) | ((now.subsec_nanos() as i64) << 2 & 0xFFFF_FFFC);

        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let next = if candidate > last { candidate } else { last + 4 };
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
