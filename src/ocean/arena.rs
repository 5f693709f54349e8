//! The ocean: a fixed-capacity, size-classed bucket arena.
//!
//! One contiguous region is allocated up front and carved into buckets
//! according to an [`ArenaConfig`]. Every size class keeps its own FIFO free
//! queue guarded by a short `parking_lot` lock, paired with a fair tokio
//! semaphore whose permits mirror the number of free buckets. Waiting for one
//! class therefore never blocks takers of another class.
//!
//! # Example
//!
//! ```
//! use mtwire_client::ocean::{ArenaConfig, Ocean};
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> mtwire_client::error::Result<()> {
//! let ocean = Ocean::new(ArenaConfig::new().class(64, 2).class(1024, 1))?;
//! let cancel = CancellationToken::new();
//!
//! let bucket = ocean.take(100, &cancel).await?;
//! assert_eq!(bucket.capacity(), 1024);
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::bucket::{Bucket, Slot};
use super::config::ArenaConfig;
use crate::error::{MtwireError, Result};

/// Free buckets of one exact size.
struct SizeClassQueue {
    count: usize,
    free: Mutex<VecDeque<Slot>>,
    /// One permit per bucket sitting in `free`.
    available: Semaphore,
}

impl SizeClassQueue {
    fn pop(&self) -> Slot {
        self.free
            .lock()
            .pop_front()
            .expect("permit held for an empty size class")
    }
}

/// State shared between the ocean handle and every outstanding bucket.
pub(crate) struct OceanShared {
    classes: BTreeMap<usize, SizeClassQueue>,
    total_size: usize,
}

impl OceanShared {
    /// Push a cleared slot back onto its class and wake one waiter.
    pub(crate) fn give_back(&self, slot: Slot) {
        let Some(class) = self.classes.get(&slot.capacity()) else {
            tracing::error!(
                capacity = slot.capacity(),
                "returned bucket matches no size class"
            );
            return;
        };

        // Push before adding the permit so a woken taker always finds a slot.
        class.free.lock().push_back(slot);
        class.available.add_permits(1);
    }
}

/// Handle to a bucket arena. Clones share the same region.
#[derive(Clone)]
pub struct Ocean {
    shared: Arc<OceanShared>,
}

impl Ocean {
    /// Allocate the backing region and carve it into buckets.
    pub fn new(config: ArenaConfig) -> Result<Self> {
        config.validate()?;

        let total_size = config.total_size();
        let mut region = BytesMut::zeroed(total_size);
        let mut offset = 0;
        let mut classes = BTreeMap::new();

        for class in config.classes() {
            let mut free = VecDeque::with_capacity(class.count);
            for _ in 0..class.count {
                let data = region.split_to(class.bucket_size);
                free.push_back(Slot::new(data, offset));
                offset += class.bucket_size;
            }

            classes.insert(
                class.bucket_size,
                SizeClassQueue {
                    count: class.count,
                    free: Mutex::new(free),
                    available: Semaphore::new(class.count),
                },
            );
        }

        tracing::debug!(
            total_size,
            classes = classes.len(),
            "ocean allocated"
        );

        Ok(Self {
            shared: Arc::new(OceanShared {
                classes,
                total_size,
            }),
        })
    }

    /// Lease a bucket of at least `minimal_size` bytes.
    ///
    /// Picks the smallest configured class that fits. Fails right away with
    /// `SizeExceeded` when no class is large enough. Otherwise waits until a
    /// bucket of that class is free, or fails with `Cancelled` once `cancel`
    /// fires; a cancelled call never consumes a bucket.
    pub async fn take(&self, minimal_size: usize, cancel: &CancellationToken) -> Result<Bucket> {
        let (_, class) = self.class_for(minimal_size)?;

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MtwireError::Cancelled),
            permit = class.available.acquire() => permit.map_err(|_| MtwireError::Cancelled)?,
        };
        permit.forget();

        Ok(Bucket::lease(class.pop(), self.shared.clone()))
    }

    /// Lease a bucket without waiting.
    ///
    /// Returns `Ok(None)` when the matching class has no free bucket right now.
    pub fn try_take(&self, minimal_size: usize) -> Result<Option<Bucket>> {
        let (_, class) = self.class_for(minimal_size)?;

        match class.available.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(Some(Bucket::lease(class.pop(), self.shared.clone())))
            }
            Err(_) => Ok(None),
        }
    }

    /// Bucket size `take(minimal_size)` would hand out.
    pub fn class_size_for(&self, minimal_size: usize) -> Result<usize> {
        self.class_for(minimal_size).map(|(size, _)| size)
    }

    /// Smallest configured bucket size.
    pub fn min_bucket_size(&self) -> usize {
        self.shared.classes.keys().next().copied().unwrap_or(0)
    }

    /// Largest configured bucket size.
    pub fn max_bucket_size(&self) -> usize {
        self.shared.classes.keys().next_back().copied().unwrap_or(0)
    }

    /// Size of the backing region in bytes.
    pub fn total_size(&self) -> usize {
        self.shared.total_size
    }

    /// Buckets of exactly `bucket_size` currently free, or `None` for an
    /// unknown size.
    pub fn free_count(&self, bucket_size: usize) -> Option<usize> {
        self.shared
            .classes
            .get(&bucket_size)
            .map(|class| class.free.lock().len())
    }

    /// Configured `(bucket_size, count)` pairs, smallest first.
    pub fn classes(&self) -> Vec<(usize, usize)> {
        self.shared
            .classes
            .iter()
            .map(|(size, class)| (*size, class.count))
            .collect()
    }

    fn class_for(&self, minimal_size: usize) -> Result<(usize, &SizeClassQueue)> {
        self.shared
            .classes
            .range(minimal_size..)
            .next()
            .map(|(size, class)| (*size, class))
            .ok_or(MtwireError::SizeExceeded {
                requested: minimal_size,
                max: self.max_bucket_size(),
            })
    }
}

impl std::fmt::Debug for Ocean {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ocean")
            .field("total_size", &self.shared.total_size)
            .field("classes", &self.classes())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn three_classes() -> Ocean {
        Ocean::new(ArenaConfig::new().class(256, 2).class(64, 4).class(1024, 1)).unwrap()
    }

    #[test]
    fn test_construction_stats() {
        let ocean = three_classes();

        assert_eq!(ocean.total_size(), 256 * 2 + 64 * 4 + 1024);
        assert_eq!(ocean.min_bucket_size(), 64);
        assert_eq!(ocean.max_bucket_size(), 1024);
        assert_eq!(ocean.classes(), vec![(64, 4), (256, 2), (1024, 1)]);
        assert_eq!(ocean.free_count(64), Some(4));
        assert_eq!(ocean.free_count(100), None);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Ocean::new(ArenaConfig::new().class(64, 1).class(64, 1));
        assert!(matches!(result, Err(MtwireError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_take_picks_tightest_class() {
        let ocean = three_classes();
        let cancel = CancellationToken::new();

        for (requested, expected) in [(0, 64), (1, 64), (64, 64), (65, 256), (256, 256), (257, 1024), (1024, 1024)] {
            let bucket = ocean.take(requested, &cancel).await.unwrap();
            assert_eq!(bucket.capacity(), expected, "request of {requested} bytes");
            assert!(bucket.capacity() >= requested);
        }
    }

    #[tokio::test]
    async fn test_take_oversized_fails_immediately() {
        let ocean = three_classes();
        let cancel = CancellationToken::new();

        // Hold every bucket: a suspending implementation would hang here.
        let _held: Vec<_> = (0..4).map(|_| ocean.try_take(64).unwrap().unwrap()).collect();

        let result = tokio::time::timeout(Duration::from_secs(1), ocean.take(1025, &cancel)).await;
        assert!(matches!(
            result,
            Ok(Err(MtwireError::SizeExceeded {
                requested: 1025,
                max: 1024
            }))
        ));
    }

    #[test]
    fn test_try_take_exhaustion() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 2)).unwrap();

        let a = ocean.try_take(10).unwrap();
        let b = ocean.try_take(10).unwrap();
        assert!(a.is_some() && b.is_some());
        assert!(ocean.try_take(10).unwrap().is_none());

        drop(a);
        assert!(ocean.try_take(10).unwrap().is_some());
    }

    #[test]
    fn test_held_buckets_are_disjoint() {
        let ocean = three_classes();

        let mut held = Vec::new();
        for size in [64, 64, 64, 64, 256, 256, 1024] {
            held.push(ocean.try_take(size).unwrap().unwrap());
        }

        let mut ranges: Vec<(usize, usize)> = held
            .iter()
            .map(|b| (b.base_offset(), b.base_offset() + b.capacity()))
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "overlap between {:?}", pair);
        }
        assert_eq!(ranges.last().unwrap().1, ocean.total_size());

        // Backing memory is one region: pointers follow the offsets.
        let base = held
            .iter()
            .min_by_key(|b| b.base_offset())
            .map(|b| b.buffer().as_ptr() as usize)
            .unwrap();
        for bucket in &held {
            assert_eq!(bucket.buffer().as_ptr() as usize - base, bucket.base_offset());
        }
    }

    #[tokio::test]
    async fn test_take_waits_for_release() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 2)).unwrap();
        let cancel = CancellationToken::new();

        let first = ocean.take(32, &cancel).await.unwrap();
        let second = ocean.take(32, &cancel).await.unwrap();
        assert_eq!(first.capacity(), 64);
        assert_eq!(second.capacity(), 64);

        let waiter = {
            let ocean = ocean.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ocean.take(32, &cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        let first_offset = first.base_offset();
        drop(first);

        let third = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(third.base_offset(), first_offset);
        drop(second);
    }

    #[tokio::test]
    async fn test_cancelled_take_consumes_nothing() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 1)).unwrap();
        let held = ocean.try_take(64).unwrap().unwrap();
        let cancel = CancellationToken::new();

        let waiter = {
            let ocean = ocean.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ocean.take(64, &cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        cancel.cancel();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(MtwireError::Cancelled)));
        assert_eq!(ocean.free_count(64), Some(0));

        drop(held);
        assert_eq!(ocean.free_count(64), Some(1));
        assert!(ocean.try_take(64).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_already_cancelled_token_wins() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 1)).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = ocean.take(1, &cancel).await;
        assert!(matches!(result, Err(MtwireError::Cancelled)));
        assert_eq!(ocean.free_count(64), Some(1));
    }

    #[tokio::test]
    async fn test_classes_do_not_block_each_other() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 1).class(128, 1)).unwrap();
        let cancel = CancellationToken::new();
        let _small = ocean.take(64, &cancel).await.unwrap();

        let blocked = {
            let ocean = ocean.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ocean.take(64, &cancel).await })
        };

        let large = tokio::time::timeout(Duration::from_secs(1), ocean.take(100, &cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(large.capacity(), 128);

        cancel.cancel();
        assert!(matches!(blocked.await.unwrap(), Err(MtwireError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_takers_never_share_buckets() {
        let ocean = Ocean::new(ArenaConfig::new().class(64, 3)).unwrap();
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        for task_id in 0..16u8 {
            let ocean = ocean.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let mut bucket = ocean.take(64, &cancel).await.unwrap();
                    assert!(bucket.buffer().iter().all(|&b| b == 0));
                    bucket.extend_from_slice(&[task_id; 64]).unwrap();
                    tokio::task::yield_now().await;
                    assert!(bucket.used().iter().all(|&b| b == task_id));
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(ocean.free_count(64), Some(3));
    }
}
