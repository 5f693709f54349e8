//! Routes decoded messages to the requests waiting for them.
//!
//! Every decoded message resolves the oldest pending request expecting its
//! body's type tag. Messages nobody waits for (unsolicited pushes,
//! duplicates, answers to cancelled requests) are logged and dropped.

use crate::codec::{KnownTypes, MessageEnvelope, TypeTag};
use crate::error::MtwireError;

use super::request_manager::{RequestId, RequestManager};

/// What happened to a handled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message resolved this request.
    Resolved(RequestId),
    /// No request was waiting for this type; the message was dropped.
    Unmatched(TypeTag),
}

/// Bridges decoded messages to the [`RequestManager`].
pub struct ResponseHandler {
    requests: RequestManager,
    known_types: Option<KnownTypes>,
}

impl ResponseHandler {
    /// Create a handler subscribed to the schema's live set of known types.
    pub fn new(requests: RequestManager, known_types: KnownTypes) -> Self {
        Self {
            requests,
            known_types: Some(known_types),
        }
    }

    /// Deliver one decoded message.
    pub fn handle(&mut self, envelope: &MessageEnvelope) -> Delivery {
        let tag = envelope.type_tag();
        self.note_type(tag);

        match self.requests.deliver(envelope.body.clone()) {
            Some(id) => {
                tracing::trace!(request_id = id, type_tag = %tag, "response delivered");
                Delivery::Resolved(id)
            }
            None => {
                tracing::warn!(
                    message_id = envelope.message_id,
                    "{}",
                    MtwireError::UnmatchedResponse(tag)
                );
                Delivery::Unmatched(tag)
            }
        }
    }

    /// Drop the known-types subscription.
    pub fn dispose(&mut self) {
        self.known_types = None;
    }

    pub fn is_subscribed(&self) -> bool {
        self.known_types.is_some()
    }

    fn note_type(&mut self, tag: TypeTag) {
        let Some(known) = self.known_types.as_mut() else {
            return;
        };

        if known.has_changed().unwrap_or(false) {
            let count = known.borrow_and_update().len();
            tracing::debug!(count, "known response types updated");
        }

        if !known.borrow().contains(&tag) {
            tracing::debug!(type_tag = %tag, "response type not registered in schema");
        }
    }
}
