//! Registry of outstanding requests awaiting a typed response.
//!
//! Requests are matched first-in-first-out per expected type: a decoded
//! response resolves the oldest still-unresolved request expecting its tag,
//! and nothing else. Each request is resolved at most once.
//!
//! The caller holds a [`PendingRequest`]; awaiting it yields the body and
//! removes the entry. Dropping it before resolution cancels the request, so a
//! late response finds nothing to resolve.
//!
//! # Example
//!
//! ```ignore
//! let requests = RequestManager::new();
//! let pending = requests.register(Pong::TYPE_TAG);
//! // ... send the request ...
//! let body = pending.response().await?;
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::codec::{Body, TypeTag};
use crate::error::{MtwireError, Result};

/// Identifier assigned to a registered request.
pub type RequestId = u64;

/// Snapshot of a tracked request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: RequestId,
    pub expected_type: TypeTag,
}

struct Entry {
    id: RequestId,
    expected_type: TypeTag,
    response: Option<Body>,
    waiter: Option<oneshot::Sender<Body>>,
}

impl Entry {
    fn fill(&mut self, body: Body) {
        if let Some(waiter) = self.waiter.take() {
            // The receiver may already be gone; the entry is removed with it.
            let _ = waiter.send(body.clone());
        }
        self.response = Some(body);
    }
}

#[derive(Default)]
struct Inner {
    /// Registration order.
    entries: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Shared registry of pending requests. Clones share state.
#[derive(Clone, Default)]
pub struct RequestManager {
    inner: Arc<Inner>,
}

impl RequestManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new request expecting a body tagged `expected_type`.
    pub fn register(&self, expected_type: TypeTag) -> PendingRequest {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = oneshot::channel();

        self.inner.entries.lock().push(Entry {
            id,
            expected_type,
            response: None,
            waiter: Some(tx),
        });

        PendingRequest {
            id,
            expected_type,
            rx,
            manager: self.clone(),
        }
    }

    /// Oldest request expecting `tag` that has no response yet.
    pub fn first_unresolved_by_type(&self, tag: TypeTag) -> Option<RequestInfo> {
        self.inner
            .entries
            .lock()
            .iter()
            .find(|e| e.expected_type == tag && e.response.is_none())
            .map(|e| RequestInfo {
                id: e.id,
                expected_type: e.expected_type,
            })
    }

    /// Set the response of request `id`.
    ///
    /// # Errors
    ///
    /// - `UnknownRequest` if the request is no longer tracked
    /// - `AlreadyResolved` if it already holds a response
    pub fn resolve(&self, id: RequestId, body: Body) -> Result<()> {
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(MtwireError::UnknownRequest(id))?;

        if entry.response.is_some() {
            return Err(MtwireError::AlreadyResolved(id));
        }

        entry.fill(body);
        Ok(())
    }

    /// Resolve the oldest unresolved request expecting `body`'s tag.
    ///
    /// Lookup and resolution happen under one lock, so concurrent deliveries
    /// of the same type never pick the same request.
    pub fn deliver(&self, body: Body) -> Option<RequestId> {
        let tag = body.type_tag();
        let mut entries = self.inner.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.expected_type == tag && e.response.is_none())?;

        entry.fill(body);
        Some(entry.id)
    }

    /// Stop tracking request `id`. Returns whether it was tracked.
    pub fn cancel(&self, id: RequestId) -> bool {
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// Drop every tracked request; their callers see `ConnectionClosed`.
    pub fn cancel_all(&self) -> usize {
        let drained = std::mem::take(&mut *self.inner.entries.lock());
        drained.len()
    }

    /// Number of tracked requests, resolved or not.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tracked requests still waiting for a response.
    pub fn unresolved_count(&self) -> usize {
        self.inner
            .entries
            .lock()
            .iter()
            .filter(|e| e.response.is_none())
            .count()
    }
}

/// Caller-side handle of a registered request.
pub struct PendingRequest {
    id: RequestId,
    expected_type: TypeTag,
    rx: oneshot::Receiver<Body>,
    manager: RequestManager,
}

impl PendingRequest {
    #[inline]
    pub fn id(&self) -> RequestId {
        self.id
    }

    #[inline]
    pub fn expected_type(&self) -> TypeTag {
        self.expected_type
    }

    /// Wait for the response and stop tracking the request.
    ///
    /// Fails with `ConnectionClosed` if the request was dropped from the
    /// registry without a response.
    pub async fn response(mut self) -> Result<Body> {
        (&mut self.rx)
            .await
            .map_err(|_| MtwireError::ConnectionClosed)
    }

    /// Take the response if it already arrived.
    pub fn try_response(&mut self) -> Option<Body> {
        self.rx.try_recv().ok()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.manager.cancel(self.id);
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("id", &self.id)
            .field("expected_type", &self.expected_type)
            .finish()
    }
}
