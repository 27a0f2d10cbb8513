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

use core::marker::PhantomData;

use bytemuck::Pod;

use super::{ENTRY_SIZE, RingError, RingLayout};
use crate::access::MemOps;

/// Producer half of an index ring.
///
/// Writes entries and owns the head pointer.
#[derive(Debug)]
pub struct RingProducer<M, E> {
    mem: M,
    layout: RingLayout,
    /// Last head we published.
    head: u32,
    marker: PhantomData<E>,
}

impl<M: MemOps, E: Pod> RingProducer<M, E> {
    /// Create the producer half and publish an initial head of 0.
    pub fn new(layout: RingLayout, mem: M) -> Result<Self, RingError> {
        debug_assert!(core::mem::size_of::<E>() <= ENTRY_SIZE);

        mem.store_release(layout.hp_addr, 0)
            .map_err(|_| RingError::NotReady)?;

        Ok(Self {
            mem,
            layout,
            head: 0,
            marker: PhantomData,
        })
    }

    /// Open an access window.
    ///
    /// Snapshots the consumer's tail. Fails with [`RingError::NotReady`] if
    /// the tail cannot be read.
    pub fn begin(&mut self) -> Result<ProducerAccess<'_, M, E>, RingError> {
        let tail = self
            .mem
            .load_acquire(self.layout.tp_addr)
            .map_err(|_| RingError::NotReady)?;

        if tail >= self.layout.num_entries {
            return Err(RingError::InvalidState(tail));
        }

        let head = self.head;
        Ok(ProducerAccess {
            ring: self,
            tail,
            head,
            pushed: 0,
        })
    }

    /// Free slots as of the last known tail. Reads device memory.
    pub fn num_avail(&self) -> Result<u32, RingError> {
        let tail = self
            .mem
            .load_acquire(self.layout.tp_addr)
            .map_err(|_| RingError::NotReady)?;
        Ok(tail.wrapping_sub(self.head).wrapping_sub(1) & self.layout.mask())
    }

    /// Last published head.
    #[inline]
    pub fn head(&self) -> u32 {
        self.head
    }

    #[inline]
    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// Get memory accessor reference
    #[inline]
    pub fn mem(&self) -> &M {
        &self.mem
    }
}

/// An open producer window. See [`RingProducer::begin`].
#[derive(Debug)]
pub struct ProducerAccess<'a, M, E> {
    ring: &'a mut RingProducer<M, E>,
    tail: u32,
    head: u32,
    pushed: u32,
}

impl<M: MemOps, E: Pod> ProducerAccess<'_, M, E> {
    /// Free slots left in this window.
    #[inline]
    pub fn num_avail(&self) -> u32 {
        self.tail.wrapping_sub(self.head).wrapping_sub(1) & self.ring.layout.mask()
    }

    /// Entries pushed so far in this window.
    #[inline]
    pub fn pushed(&self) -> u32 {
        self.pushed
    }

    /// Write `entry` at the shadow head. Not visible to the consumer until
    /// [`commit`](Self::commit).
    pub fn push(&mut self, entry: E) -> Result<(), RingError> {
        if self.num_avail() == 0 {
            return Err(RingError::Full);
        }

        let addr = self.ring.layout.entry_addr(self.head);
        self.ring
            .mem
            .write_val(addr, entry)
            .map_err(|_| RingError::MemError)?;

        self.head = (self.head + 1) & self.ring.layout.mask();
        self.pushed += 1;
        Ok(())
    }

    /// Publish every pushed entry with one release store of the head.
    ///
    /// Returns the number of entries published.
    pub fn commit(self) -> Result<u32, RingError> {
        if self.pushed == 0 {
            return Ok(0);
        }

        self.ring
            .mem
            .store_release(self.ring.layout.hp_addr, self.head)
            .map_err(|_| RingError::NotReady)?;
        self.ring.head = self.head;

        Ok(self.pushed)
    }
}

/// Consumer half of an index ring.
///
/// Reads entries and owns the tail pointer.
#[derive(Debug)]
pub struct RingConsumer<M, E> {
    mem: M,
    layout: RingLayout,
    /// Tail after the last committed window.
    tail: u32,
    /// Tail last stored to device memory.
    published: u32,
    marker: PhantomData<E>,
}

impl<M: MemOps, E: Pod> RingConsumer<M, E> {
    /// Create the consumer half and publish an initial tail of 0.
    pub fn new(layout: RingLayout, mem: M) -> Result<Self, RingError> {
        debug_assert!(core::mem::size_of::<E>() <= ENTRY_SIZE);

        mem.store_release(layout.tp_addr, 0)
            .map_err(|_| RingError::NotReady)?;

        Ok(Self {
            mem,
            layout,
            tail: 0,
            published: 0,
            marker: PhantomData,
        })
    }

    /// Open an access window.
    ///
    /// Snapshots the producer's head. Fails with [`RingError::NotReady`] if
    /// the head cannot be read.
    pub fn begin(&mut self) -> Result<ConsumerAccess<'_, M, E>, RingError> {
        let head = self
            .mem
            .load_acquire(self.layout.hp_addr)
            .map_err(|_| RingError::NotReady)?;

        if head >= self.layout.num_entries {
            return Err(RingError::InvalidState(head));
        }

        let tail = self.tail;
        Ok(ConsumerAccess {
            ring: self,
            head,
            tail,
            popped: 0,
        })
    }

    /// Tail after the last committed window. Can run ahead of the tail the
    /// device sees if a commit failed to store it.
    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail
    }

    #[inline]
    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// Get memory accessor reference
    #[inline]
    pub fn mem(&self) -> &M {
        &self.mem
    }
}

/// An open consumer window. See [`RingConsumer::begin`].
#[derive(Debug)]
pub struct ConsumerAccess<'a, M, E> {
    ring: &'a mut RingConsumer<M, E>,
    head: u32,
    tail: u32,
    popped: u32,
}

impl<M: MemOps, E: Pod> ConsumerAccess<'_, M, E> {
    /// Entries ready in this window.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.head.wrapping_sub(self.tail) & self.ring.layout.mask()
    }

    /// Entries taken so far in this window.
    #[inline]
    pub fn popped(&self) -> u32 {
        self.popped
    }

    /// Read the entry at the shadow tail, or `None` when the window is drained.
    pub fn pop(&mut self) -> Result<Option<E>, RingError> {
        if self.pending() == 0 {
            return Ok(None);
        }

        let addr = self.ring.layout.entry_addr(self.tail);
        let entry = self
            .ring
            .mem
            .read_val::<E>(addr)
            .map_err(|_| RingError::MemError)?;

        self.tail = (self.tail + 1) & self.ring.layout.mask();
        self.popped += 1;
        Ok(Some(entry))
    }

    /// Hand every popped slot back to the producer.
    ///
    /// Returns the number of slots released. Popped entries stay consumed
    /// even when the tail store fails: the next window starts after them and
    /// its commit stores the tail again.
    pub fn commit(self) -> Result<u32, RingError> {
        self.ring.tail = self.tail;
        if self.tail == self.ring.published {
            return Ok(self.popped);
        }

        self.ring
            .mem
            .store_release(self.ring.layout.tp_addr, self.tail)
            .map_err(|_| RingError::NotReady)?;
        self.ring.published = self.tail;

        Ok(self.popped)
    }
}
