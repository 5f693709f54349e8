//! Size-class configuration for the [`Ocean`](super::Ocean).
//!
//! An arena is described by an ordered list of `(bucket_size, count)` pairs.
//! Every pair becomes one size class; the backing region is the sum of all
//! `bucket_size * count` products and never changes afterwards.
//!
//! # Example
//!
//! ```
//! use mtwire_client::ocean::ArenaConfig;
//!
//! let config = ArenaConfig::new().class(1024, 64).class(64 * 1024, 8);
//! assert_eq!(config.total_size(), 1024 * 64 + 64 * 1024 * 8);
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashSet;

use serde::Deserialize;

use crate::error::{MtwireError, Result};

/// One group of interchangeable buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SizeClass {
    /// Capacity of every bucket in the class, in bytes.
    pub bucket_size: usize,
    /// Number of buckets carved out for the class.
    pub count: usize,
}

impl SizeClass {
    pub fn new(bucket_size: usize, count: usize) -> Self {
        Self { bucket_size, count }
    }

    /// Bytes of backing memory the class occupies.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.bucket_size * self.count
    }
}

/// Ordered set of size classes an [`Ocean`](super::Ocean) is built from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ArenaConfig {
    classes: Vec<SizeClass>,
}

impl ArenaConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
        }
    }

    /// Append a size class.
    pub fn class(mut self, bucket_size: usize, count: usize) -> Self {
        self.classes.push(SizeClass::new(bucket_size, count));
        self
    }

    /// Configured classes in declaration order.
    pub fn classes(&self) -> &[SizeClass] {
        &self.classes
    }

    /// Sum of `bucket_size * count` over all classes.
    pub fn total_size(&self) -> usize {
        self.classes.iter().map(SizeClass::total_size).sum()
    }

    /// Check that the configuration describes a usable arena.
    ///
    /// Requires at least one class, positive sizes and counts, and distinct
    /// bucket sizes.
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(MtwireError::InvalidConfig(
                "arena needs at least one size class".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(self.classes.len());
        for class in &self.classes {
            if class.bucket_size == 0 {
                return Err(MtwireError::InvalidConfig(
                    "bucket size must be positive".to_string(),
                ));
            }
            if class.count == 0 {
                return Err(MtwireError::InvalidConfig(format!(
                    "size class {} has no buckets",
                    class.bucket_size
                )));
            }
            if !seen.insert(class.bucket_size) {
                return Err(MtwireError::InvalidConfig(format!(
                    "duplicate size class {}",
                    class.bucket_size
                )));
            }
        }

        self.classes
            .iter()
            .try_fold(0usize, |acc, c| {
                c.bucket_size
                    .checked_mul(c.count)
                    .and_then(|size| acc.checked_add(size))
            })
            .ok_or_else(|| MtwireError::InvalidConfig("arena size overflows usize".to_string()))?;

        Ok(())
    }
}

impl Default for ArenaConfig {
    /// Small buckets for service messages, a few large ones for file parts.
    fn default() -> Self {
        Self::new()
            .class(1024, 128)
            .class(16 * 1024, 32)
            .class(128 * 1024, 8)
            .class(1024 * 1024, 2)
    }
}
