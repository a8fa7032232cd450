//! Double-ended index queue over a strided range.
//!
//! Holds the indices `begin, begin+stride, …` (`len` of them) as two 32-bit
//! cursors packed into one atomic word:
//!
//! ```text
//!   63                 32 31                  0
//!  ┌──────────────────────┬─────────────────────┐
//!  │  right (exclusive)   │   left (inclusive)  │
//!  └──────────────────────┴─────────────────────┘
//! ```
//!
//! `pop_left` advances `left`, `pop_right` retreats `right`; both are a
//! single CAS on the word, so a spawner draining one end and a direct
//! executor claiming the other never hand out the same index.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

use crate::error::{ErrorKind, Result, TaskError};

#[inline(always)]
fn pack(left: u32, right: u32) -> u64 {
    (u64::from(right) << 32) | u64::from(left)
}

#[inline(always)]
fn unpack(word: u64) -> (u32, u32) {
    (word as u32, (word >> 32) as u32)
}

pub struct IndexQueue {
    begin: usize,
    stride: usize,
    cursors: CachePadded<AtomicU64>,
}

impl IndexQueue {
    /// Queue over `len` indices starting at `begin`, `stride` apart.
    ///
    /// Fails with `BadParameter` when `len` does not fit the 32-bit cursors.
    pub fn new(begin: usize, len: usize, stride: usize) -> Result<Self> {
        let len = u32::try_from(len).map_err(|_| {
            TaskError::new(
                ErrorKind::BadParameter,
                format!("index queue length {len} exceeds {}", u32::MAX),
            )
            .with_function("IndexQueue::new")
        })?;
        Ok(Self {
            begin,
            stride: stride.max(1),
            cursors: CachePadded::new(AtomicU64::new(pack(0, len))),
        })
    }

    #[inline]
    fn index(&self, k: u32) -> usize {
        self.begin + (k as usize) * self.stride
    }

    /// Claim the lowest remaining index.
    pub fn pop_left(&self) -> Option<usize> {
        let mut word = self.cursors.load(Ordering::Acquire);
        loop {
            let (left, right) = unpack(word);
            if left >= right {
                return None;
            }
            match self.cursors.compare_exchange_weak(
                word,
                pack(left + 1, right),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(self.index(left)),
                Err(actual) => word = actual,
            }
        }
    }

    /// Claim the highest remaining index.
    pub fn pop_right(&self) -> Option<usize> {
        let mut word = self.cursors.load(Ordering::Acquire);
        loop {
            let (left, right) = unpack(word);
            if left >= right {
                return None;
            }
            match self.cursors.compare_exchange_weak(
                word,
                pack(left, right - 1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(self.index(right - 1)),
                Err(actual) => word = actual,
            }
        }
    }

    /// Indices not yet claimed.
    pub fn len(&self) -> usize {
        let (left, right) = unpack(self.cursors.load(Ordering::Acquire));
        right.saturating_sub(left) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for IndexQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (left, right) = unpack(self.cursors.load(Ordering::Acquire));
        f.debug_struct("IndexQueue")
            .field("begin", &self.begin)
            .field("stride", &self.stride)
            .field("left", &left)
            .field("right", &right)
            .finish()
    }
}
