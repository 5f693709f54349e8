//! Leased view over a fixed slice of the ocean.
//!
//! A [`Bucket`] owns its byte range exclusively while it is held. It carries
//! a cursor and a used-length so that partial fills can be tracked without
//! touching the capacity, which never changes.
//!
//! The invariant `cursor + used_length <= capacity` holds at all times; any
//! setter that would break it fails with [`MtwireError::InvalidRange`].
//!
//! Dropping a bucket releases it. Release clears the cursor and used-length,
//! zero-fills the whole range (it may have carried key material or decrypted
//! payload) and pushes the slot back onto its size class queue.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;

use super::arena::OceanShared;
use crate::error::{MtwireError, Result};

/// A slice of the backing region, moved between a free queue and a holder.
pub(crate) struct Slot {
    /// Exclusive view into the shared region (`len() == capacity`).
    pub(crate) data: BytesMut,
    /// Offset of `data` inside the backing region.
    pub(crate) base_offset: usize,
    /// Set while a caller holds the slot.
    pub(crate) taken: AtomicBool,
}

impl Slot {
    pub(crate) fn new(data: BytesMut, base_offset: usize) -> Self {
        Self {
            data,
            base_offset,
            taken: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.data.len()
    }
}

/// A caller-held lease over a sub-range of the ocean.
pub struct Bucket {
    slot: Option<Slot>,
    ocean: Arc<OceanShared>,
    base_offset: usize,
    capacity: usize,
    cursor: usize,
    used: usize,
}

impl Bucket {
    /// Wrap a slot popped from a free queue.
    pub(crate) fn lease(slot: Slot, ocean: Arc<OceanShared>) -> Self {
        let was_taken = slot.taken.swap(true, Ordering::AcqRel);
        debug_assert!(!was_taken, "free queue handed out a taken slot");

        Self {
            base_offset: slot.base_offset,
            capacity: slot.capacity(),
            slot: Some(slot),
            ocean,
            cursor: 0,
            used: 0,
        }
    }

    /// Offset of this bucket inside the ocean's backing region.
    #[inline]
    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Fixed capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Start of the logically valid bytes, relative to the bucket.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of logically valid bytes after the cursor.
    #[inline]
    pub fn used_length(&self) -> usize {
        self.used
    }

    /// Bytes still writable after the used range.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.cursor - self.used
    }

    /// Whether the bucket has been handed back to the ocean.
    #[inline]
    pub fn is_released(&self) -> bool {
        self.slot.is_none()
    }

    /// Move the cursor.
    ///
    /// Fails with `InvalidRange` if `offset + used_length > capacity`.
    pub fn set_cursor(&mut self, offset: usize) -> Result<()> {
        self.check_range(offset, self.used)?;
        self.cursor = offset;
        Ok(())
    }

    /// Change the used-length.
    ///
    /// Fails with `InvalidRange` if `cursor + length > capacity`.
    pub fn set_used_length(&mut self, length: usize) -> Result<()> {
        self.check_range(self.cursor, length)?;
        self.used = length;
        Ok(())
    }

    /// The logically valid bytes: `[cursor, cursor + used_length)`.
    pub fn used(&self) -> &[u8] {
        match &self.slot {
            Some(slot) => &slot.data[self.cursor..self.cursor + self.used],
            None => &[],
        }
    }

    /// Mutable access to the logically valid bytes.
    pub fn used_mut(&mut self) -> &mut [u8] {
        let (start, end) = (self.cursor, self.cursor + self.used);
        match &mut self.slot {
            Some(slot) => &mut slot.data[start..end],
            None => &mut [],
        }
    }

    /// The whole capacity, regardless of cursor and used-length.
    pub fn buffer(&self) -> &[u8] {
        match &self.slot {
            Some(slot) => &slot.data[..],
            None => &[],
        }
    }

    /// Mutable view of the whole capacity.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        match &mut self.slot {
            Some(slot) => &mut slot.data[..],
            None => &mut [],
        }
    }

    /// Copy `src` right after the used range and grow the used-length.
    pub fn extend_from_slice(&mut self, src: &[u8]) -> Result<()> {
        let end = self.cursor + self.used;
        let new_used = self.used + src.len();
        self.check_range(self.cursor, new_used)?;

        let slot = self.slot.as_mut().ok_or(MtwireError::InvalidRange {
            offset: end,
            length: src.len(),
            capacity: 0,
        })?;
        slot.data[end..end + src.len()].copy_from_slice(src);
        self.used = new_used;
        Ok(())
    }

    /// Hand the bucket back to the ocean.
    ///
    /// The first call clears the bucket and returns it to its size class;
    /// every later call is a no-op.
    pub fn release(&mut self) {
        let Some(mut slot) = self.slot.take() else {
            return;
        };

        self.cursor = 0;
        self.used = 0;

        if slot
            .taken
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!(
                base_offset = self.base_offset,
                "bucket released while already marked free"
            );
        }

        slot.data.fill(0);
        self.ocean.give_back(slot);
    }

    fn check_range(&self, offset: usize, length: usize) -> Result<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.capacity => Ok(()),
            _ => Err(MtwireError::InvalidRange {
                offset,
                length,
                capacity: self.capacity,
            }),
        }
    }
}

impl Drop for Bucket {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bucket")
            .field("base_offset", &self.base_offset)
            .field("capacity", &self.capacity)
            .field("cursor", &self.cursor)
            .field("used", &self.used)
            .field("released", &self.is_released())
            .finish()
    }
}
