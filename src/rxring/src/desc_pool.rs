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

//! Receive Descriptor Pool
//!
//! A descriptor tracks ownership of one receive buffer. Each descriptor is
//! either on the pool's free list or in flight (posted to the device), and
//! `free_count() + inflight_count() == capacity()` holds whenever the pool
//! lock is released.
//!
//! ```text
//!             pop_free + mark_inflight
//!   ┌──────┐  (same critical section)   ┌──────────┐
//!   │ Free │ ─────────────────────────> │ InFlight │
//!   └──────┘ <───────────────────────── └──────────┘
//!                     complete(cookie)
//! ```
//!
//! # Free List
//!
//! The free list is singly linked through `RxDesc::next`. Descriptor records
//! are created lazily: the list holds recycled descriptors, and once it is
//! empty a fresh record is created as long as fewer than `capacity` exist.
//! Recycled descriptors are always preferred over fresh ones.
//!
//! # Cookies
//!
//! The device only ever sees a [`Cookie`]: the pool id in the upper bits and
//! the descriptor index in the lower [`COOKIE_INDEX_BITS`] bits. Completions
//! are resolved back to descriptors through the cookie, so a cookie from
//! another pool or for a descriptor that is not in flight is rejected.

use alloc::vec::Vec;

use spin::{Mutex, MutexGuard};
use thiserror::Error;

use crate::buffer::Allocation;

/// Bits of a cookie holding the descriptor index.
pub const COOKIE_INDEX_BITS: u32 = 18;

const COOKIE_INDEX_MASK: u32 = (1 << COOKIE_INDEX_BITS) - 1;

/// Largest number of descriptors one pool can hold.
pub const MAX_POOL_SIZE: u32 = 1 << COOKIE_INDEX_BITS;

/// Largest pool id that fits in a cookie.
pub const MAX_POOL_ID: u32 = (1 << (32 - COOKIE_INDEX_BITS)) - 1;

/// Pool-unique handle for a descriptor, as written into the refill ring.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cookie(pub u32);

impl Cookie {
    #[inline]
    pub const fn new(pool_id: u32, index: u32) -> Self {
        Self((pool_id << COOKIE_INDEX_BITS) | (index & COOKIE_INDEX_MASK))
    }

    #[inline]
    pub const fn pool_id(self) -> u32 {
        self.0 >> COOKIE_INDEX_BITS
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0 & COOKIE_INDEX_MASK
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid pool size {0}")]
    InvalidSize(u32),
    #[error("Invalid pool id {0}")]
    InvalidPoolId(u32),
    #[error("Cookie {0:#x} belongs to another pool")]
    ForeignCookie(u32),
    #[error("Cookie {0:#x} is out of range")]
    BadCookie(u32),
    #[error("Descriptor {0} is not in flight")]
    NotInFlight(u32),
    #[error("Descriptor {0} was not taken from the free list")]
    NotHeld(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DescState {
    Free,
    /// Popped from the free list, pending post or return. Only exists while
    /// the pool lock is held.
    Held,
    InFlight(Allocation),
}

#[derive(Debug, Clone, Copy)]
struct RxDesc {
    next: Option<u32>,
    state: DescState,
}

/// The pool's state, reachable only through [`DescPool::lock`].
#[derive(Debug)]
pub struct DescPoolInner {
    pool_id: u32,
    capacity: u32,
    descs: Vec<RxDesc>,
    free_head: Option<u32>,
    free_len: u32,
    inflight: u32,
}

impl DescPoolInner {
    /// Take a descriptor off the free list, recycled first, then fresh.
    ///
    /// The descriptor must be handed to [`mark_inflight`](Self::mark_inflight)
    /// or [`push_free`](Self::push_free) before the lock is released.
    pub(crate) fn pop_free(&mut self) -> Option<u32> {
        if let Some(idx) = self.free_head {
            let desc = &mut self.descs[idx as usize];
            self.free_head = desc.next.take();
            desc.state = DescState::Held;
            self.free_len -= 1;
            return Some(idx);
        }

        if (self.descs.len() as u32) < self.capacity {
            let idx = self.descs.len() as u32;
            self.descs.push(RxDesc {
                next: None,
                state: DescState::Held,
            });
            return Some(idx);
        }

        None
    }

    /// Return a held descriptor to the head of the free list.
    pub(crate) fn push_free(&mut self, idx: u32) -> Result<(), PoolError> {
        let desc = self
            .descs
            .get_mut(idx as usize)
            .ok_or(PoolError::NotHeld(idx))?;

        if desc.state != DescState::Held {
            return Err(PoolError::NotHeld(idx));
        }

        desc.state = DescState::Free;
        desc.next = self.free_head;
        self.free_head = Some(idx);
        self.free_len += 1;
        Ok(())
    }

    /// Attach `buf` to a held descriptor and move it in flight.
    pub(crate) fn mark_inflight(&mut self, idx: u32, buf: Allocation) -> Result<(), PoolError> {
        let desc = self
            .descs
            .get_mut(idx as usize)
            .ok_or(PoolError::NotHeld(idx))?;

        if desc.state != DescState::Held {
            return Err(PoolError::NotHeld(idx));
        }

        desc.state = DescState::InFlight(buf);
        self.inflight += 1;
        Ok(())
    }

    /// Resolve a completed cookie: detach its buffer and free the descriptor.
    pub fn complete(&mut self, cookie: Cookie) -> Result<Allocation, PoolError> {
        if cookie.pool_id() != self.pool_id {
            return Err(PoolError::ForeignCookie(cookie.0));
        }

        let idx = cookie.index();
        let desc = self
            .descs
            .get_mut(idx as usize)
            .ok_or(PoolError::BadCookie(cookie.0))?;

        let DescState::InFlight(buf) = desc.state else {
            return Err(PoolError::NotInFlight(idx));
        };

        desc.state = DescState::Free;
        desc.next = self.free_head;
        self.free_head = Some(idx);
        self.free_len += 1;
        self.inflight -= 1;
        Ok(buf)
    }

    /// Free every in-flight descriptor, returning the buffers they held.
    pub fn drain_inflight(&mut self) -> Vec<Allocation> {
        let mut bufs = Vec::with_capacity(self.inflight as usize);

        for idx in 0..self.descs.len() as u32 {
            let desc = &mut self.descs[idx as usize];
            if let DescState::InFlight(buf) = desc.state {
                bufs.push(buf);
                desc.state = DescState::Free;
                desc.next = self.free_head;
                self.free_head = Some(idx);
                self.free_len += 1;
            }
        }

        self.inflight = 0;
        bufs
    }

    /// Cookie for descriptor `idx` in this pool.
    #[inline]
    pub fn cookie(&self, idx: u32) -> Cookie {
        Cookie::new(self.pool_id, idx)
    }

    /// Descriptors on the free list, including ones not yet created.
    #[inline]
    pub fn free_count(&self) -> u32 {
        self.free_len + (self.capacity - self.descs.len() as u32)
    }

    #[inline]
    pub fn inflight_count(&self) -> u32 {
        self.inflight
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    pub fn pool_id(&self) -> u32 {
        self.pool_id
    }
}

/// A fixed-capacity, lock-guarded descriptor pool.
#[derive(Debug)]
pub struct DescPool {
    inner: Mutex<DescPoolInner>,
}

impl DescPool {
    /// Create a pool of `capacity` descriptors tagged with `pool_id`.
    pub fn new(pool_id: u32, capacity: u32) -> Result<Self, PoolError> {
        if capacity == 0 || capacity > MAX_POOL_SIZE {
            return Err(PoolError::InvalidSize(capacity));
        }

        if pool_id > MAX_POOL_ID {
            return Err(PoolError::InvalidPoolId(pool_id));
        }

        Ok(Self {
            inner: Mutex::new(DescPoolInner {
                pool_id,
                capacity,
                descs: Vec::with_capacity(capacity as usize),
                free_head: None,
                free_len: 0,
                inflight: 0,
            }),
        })
    }

    /// Enter the pool's critical section.
    ///
    /// Only completion and inspection are available outside the crate. A
    /// descriptor taken with `pop_free` stays held until it is posted or
    /// returned under the same guard, otherwise it is lost to the pool.
    pub fn lock(&self) -> MutexGuard<'_, DescPoolInner> {
        self.inner.lock()
    }

    pub fn free_count(&self) -> u32 {
        self.lock().free_count()
    }

    pub fn inflight_count(&self) -> u32 {
        self.lock().inflight_count()
    }

    pub fn capacity(&self) -> u32 {
        self.lock().capacity()
    }

    pub fn pool_id(&self) -> u32 {
        self.lock().pool_id()
    }
}
