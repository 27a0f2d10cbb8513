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

//! Receive buffer allocation over a device-visible region.
//!
//! [`BufferArena`] carves a region that the device can already address into
//! slots of `N` bytes and tracks them in a flat bitmap (`FixedBitSet`).
//! Handing out an address from the region is what "mapping a buffer for the
//! device" means here: the address in an [`Allocation`] is the one written
//! into the refill ring.
//!
//! # Search
//!
//! Allocation is a linear search for a run of zero bits, done word-at-a-time
//! by `FixedBitSet::zeroes()`. Receive buffers are almost always a single
//! slot, so the run length is usually one.
//!
//! The most recently freed run is cached in `last_free` and handed out first.
//! Buffers reaped from the completion ring are therefore reposted to the
//! refill ring in LIFO order, which keeps recently touched lines warm.

use alloc::rc::Rc;
use alloc::sync::Arc;

use atomic_refcell::AtomicRefCell;
use fixedbitset::FixedBitSet;
use thiserror::Error;

#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum AllocError {
    #[error("Invalid region addr {0:#x}")]
    InvalidAlign(u64),
    #[error("Invalid free addr {0:#x} and size {1}")]
    InvalidFree(u64, usize),
    #[error("Invalid argument")]
    InvalidArg,
    #[error("Empty region")]
    EmptyRegion,
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Overflow")]
    Overflow,
    #[error("Allocator busy")]
    Busy,
}

/// A device-visible buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    /// Device address of the first byte
    pub addr: u64,
    /// Length in bytes, rounded up to the slot size
    pub len: usize,
}

/// Source of device-visible receive buffers.
pub trait BufferProvider {
    /// Allocate at least `len` bytes.
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError>;

    /// Free a previously allocated block.
    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError>;
}

impl<P: BufferProvider + ?Sized> BufferProvider for Arc<P> {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        (**self).alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        (**self).dealloc(alloc)
    }
}

impl<P: BufferProvider + ?Sized> BufferProvider for Rc<P> {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        (**self).alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        (**self).dealloc(alloc)
    }
}

/// Fixed-slot bitmap allocator.
#[derive(Debug, Clone)]
pub struct BufferArena<const N: usize> {
    base_addr: u64,
    used: FixedBitSet,
    last_free: Option<Allocation>,
}

impl<const N: usize> BufferArena<N> {
    /// Create an arena over `[base_addr, base_addr + region_len)`.
    ///
    /// The region is rounded down to a multiple of `N`; `base_addr` must be
    /// `N`-aligned.
    pub fn new(base_addr: u64, region_len: usize) -> Result<Self, AllocError> {
        if N == 0 {
            return Err(AllocError::InvalidArg);
        }

        if base_addr % (N as u64) != 0 {
            return Err(AllocError::InvalidAlign(base_addr));
        }

        let num_slots = region_len / N;
        if num_slots == 0 {
            return Err(AllocError::EmptyRegion);
        }

        base_addr
            .checked_add((num_slots * N) as u64)
            .ok_or(AllocError::Overflow)?;

        Ok(Self {
            base_addr,
            used: FixedBitSet::with_capacity(num_slots),
            last_free: None,
        })
    }

    #[inline]
    fn addr_of(&self, slot: usize) -> u64 {
        self.base_addr + (slot * N) as u64
    }

    /// Validate `alloc` and return its slot range.
    fn slots_of(&self, alloc: Allocation) -> Result<core::ops::Range<usize>, AllocError> {
        let Allocation { addr, len } = alloc;
        let bad = AllocError::InvalidFree(addr, len);

        if len == 0 || len % N != 0 || addr < self.base_addr {
            return Err(bad);
        }

        let off = (addr - self.base_addr) as usize;
        if off % N != 0 {
            return Err(bad);
        }

        let start = off / N;
        let end = start + len / N;
        if end > self.used.len() {
            return Err(bad);
        }

        Ok(start..end)
    }

    /// Find the first run of `slots` free slots.
    fn find_run(&mut self, slots: usize) -> Option<usize> {
        if let Some(run) = self.last_free
            && run.len >= slots * N
        {
            self.last_free = None;
            return Some(((run.addr - self.base_addr) as usize) / N);
        }

        let total = self.used.len();
        self.used.zeroes().find(|&start| {
            start + slots <= total && self.used.count_zeroes(start..start + slots) == slots
        })
    }

    /// Allocate at least `len` bytes.
    pub fn alloc(&mut self, len: usize) -> Result<Allocation, AllocError> {
        if len == 0 {
            return Err(AllocError::InvalidArg);
        }

        let slots = len.div_ceil(N);
        if slots > self.used.len() {
            return Err(AllocError::OutOfMemory);
        }

        let start = self.find_run(slots).ok_or(AllocError::OutOfMemory)?;
        self.used.insert_range(start..start + slots);

        let alloc = Allocation {
            addr: self.addr_of(start),
            len: slots * N,
        };

        // the cached run may overlap what we just handed out
        if let Some(run) = self.last_free
            && alloc.addr < run.addr + run.len as u64
            && run.addr < alloc.addr + alloc.len as u64
        {
            self.last_free = None;
        }

        Ok(alloc)
    }

    /// Free a previously allocated block. Double frees are rejected.
    pub fn dealloc(&mut self, alloc: Allocation) -> Result<(), AllocError> {
        let range = self.slots_of(alloc)?;

        if !self.used.contains_all_in_range(range.clone()) {
            return Err(AllocError::InvalidFree(alloc.addr, alloc.len));
        }

        self.used.remove_range(range);
        self.last_free = Some(alloc);
        Ok(())
    }

    /// Number of free bytes.
    pub fn free_bytes(&self) -> usize {
        self.used.count_zeroes(..) * N
    }

    /// Number of free slots.
    pub fn free_slots(&self) -> usize {
        self.used.count_zeroes(..)
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.used.len() * N
    }

    /// Address range covered by the arena.
    pub fn range(&self) -> core::ops::Range<u64> {
        self.base_addr..self.base_addr + self.capacity() as u64
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.range().contains(&addr)
    }

    pub const fn slot_size() -> usize {
        N
    }
}

/// A [`BufferArena`] usable through a shared reference.
#[derive(Debug)]
pub struct SharedArena<const N: usize = 2048> {
    inner: AtomicRefCell<BufferArena<N>>,
}

impl<const N: usize> SharedArena<N> {
    pub fn new(base_addr: u64, region_len: usize) -> Result<Self, AllocError> {
        Ok(Self {
            inner: BufferArena::new(base_addr, region_len)?.into(),
        })
    }

    pub fn free_bytes(&self) -> usize {
        self.inner.borrow().free_bytes()
    }

    pub fn free_slots(&self) -> usize {
        self.inner.borrow().free_slots()
    }

    pub fn capacity(&self) -> usize {
        self.inner.borrow().capacity()
    }
}

impl<const N: usize> BufferProvider for SharedArena<N> {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| AllocError::Busy)?
            .alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        self.inner
            .try_borrow_mut()
            .map_err(|_| AllocError::Busy)?
            .dealloc(alloc)
    }
}
