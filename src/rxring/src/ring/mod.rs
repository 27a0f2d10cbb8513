/*
Copyright 2026  The rxring Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! Index Rings Shared With the Device
//!
//! Each ring is a fixed array of entries followed by two index words:
//!
//! ```text
//! base                                           hp_addr   tp_addr
//! ┌────────┬────────┬────────┬─────┬────────────┬─────────┬─────────┐
//! │entry[0]│entry[1]│entry[2]│ ... │entry[n - 1]│ hp: u32 │ tp: u32 │
//! └────────┴────────┴────────┴─────┴────────────┴─────────┴─────────┘
//! ```
//!
//! The producer owns `hp` (head pointer) and the consumer owns `tp` (tail
//! pointer). Neither side ever writes the other's index. One slot is always
//! kept empty so that `hp == tp` unambiguously means "empty":
//!
//! ```text
//!   empty:  hp == tp
//!   full:   (hp + 1) % n == tp
//!   avail:  (tp - hp - 1) % n   (producer view)
//!   ready:  (hp - tp) % n       (consumer view)
//! ```
//!
//! # Access Windows
//!
//! Both sides work in access windows. [`RingProducer::begin`] snapshots the
//! peer's tail, entries are pushed against a shadow head, and
//! [`ProducerAccess::commit`] publishes the shadow head with a single release
//! store. Dropping a window without committing publishes nothing. The
//! consumer side mirrors this with [`RingConsumer::begin`] and
//! [`ConsumerAccess::commit`].
//!
//! Software is the producer of the refill ring ([`SrcRing`]) and the consumer
//! of the completion ring ([`DstRing`]). The opposite halves are public so a
//! device can be emulated in software.

mod entry;
mod index;

pub use entry::*;
pub use index::*;
use thiserror::Error;

/// Refill ring, software side.
pub type SrcRing<M> = RingProducer<M, RefillEntry>;

/// Completion ring, software side.
pub type DstRing<M> = RingConsumer<M, CompletionEntry>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingError {
    #[error("Ring index not accessible, device not ready")]
    NotReady,
    #[error("Ring is full")]
    Full,
    #[error("Peer published an out of range index {0}")]
    InvalidState(u32),
    #[error("Invalid ring layout")]
    InvalidLayout,
    #[error("Backend memory error")]
    MemError,
}

/// Every entry type occupies this many bytes in the ring.
pub const ENTRY_SIZE: usize = 16;

/// Smallest ring the layout accepts.
pub const MIN_RING_ENTRIES: u32 = 2;

/// Largest ring the layout accepts.
pub const MAX_RING_ENTRIES: u32 = 1 << 15;

const INDEX_SIZE: usize = core::mem::size_of::<u32>();

/// Placement of a ring in device-visible memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingLayout {
    /// First entry.
    pub entries_addr: u64,
    /// Number of entries, a power of two.
    pub num_entries: u32,
    /// Head pointer word, written by the producer.
    pub hp_addr: u64,
    /// Tail pointer word, written by the consumer.
    pub tp_addr: u64,
}

impl RingLayout {
    /// Compute a layout from a base address.
    ///
    /// # Safety
    /// - `base` must be valid for `RingLayout::query_size(num_entries)` bytes.
    /// - Memory must remain valid for the lifetime of every ring built on it.
    pub const unsafe fn from_base(base: u64, num_entries: u32) -> Result<Self, RingError> {
        if !base.is_multiple_of(ENTRY_SIZE as u64) {
            return Err(RingError::InvalidLayout);
        }

        if num_entries < MIN_RING_ENTRIES
            || num_entries > MAX_RING_ENTRIES
            || !num_entries.is_power_of_two()
        {
            return Err(RingError::InvalidLayout);
        }

        let hp_offset = num_entries as usize * ENTRY_SIZE;
        let tp_offset = hp_offset + INDEX_SIZE;

        Ok(Self {
            entries_addr: base,
            num_entries,
            hp_addr: base + hp_offset as u64,
            tp_addr: base + tp_offset as u64,
        })
    }

    /// Bytes needed for a ring with `num_entries` entries.
    pub const fn query_size(num_entries: u32) -> usize {
        num_entries as usize * ENTRY_SIZE + 2 * INDEX_SIZE
    }

    /// Address of the entry at `idx`.
    #[inline]
    pub fn entry_addr(&self, idx: u32) -> u64 {
        self.entries_addr + (idx & self.mask()) as u64 * ENTRY_SIZE as u64
    }

    /// Number of usable slots, one less than the number of entries.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.num_entries - 1
    }

    #[inline]
    pub(crate) fn mask(&self) -> u32 {
        self.num_entries - 1
    }
}

const _: () = {
    const fn verify_layout(num_entries: u32) {
        let base = 0x1000u64;

        // Safety: only the layout arithmetic is exercised
        let layout = match unsafe { RingLayout::from_base(base, num_entries) } {
            Ok(l) => l,
            Err(_) => panic!("from_base failed"),
        };

        let entries_end = base + (num_entries as usize * ENTRY_SIZE) as u64;
        assert!(layout.hp_addr >= entries_end);
        assert!(layout.hp_addr.is_multiple_of(INDEX_SIZE as u64));
        assert!(layout.tp_addr == layout.hp_addr + INDEX_SIZE as u64);
        assert!(base + RingLayout::query_size(num_entries) as u64 == layout.tp_addr + 4);
    }

    verify_layout(2);
    verify_layout(8);
    verify_layout(64);
    verify_layout(512);
    verify_layout(4096);
};
