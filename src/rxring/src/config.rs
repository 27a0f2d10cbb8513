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

use core::cmp::{max, min};

#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::desc_pool::{MAX_POOL_ID, MAX_POOL_SIZE};

/// The complete set of configuration needed to create an [`RxQueue`](crate::RxQueue).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxQueueConfig {
    /// Entries in each ring. Always a power of two.
    ring_size: u32,
    /// Descriptors in the pool. Never less than the refill ring capacity.
    pool_size: u32,
    /// Bytes per receive buffer.
    buffer_size: u32,
    /// Extra attempts after a failed buffer allocation before a replenish
    /// pass gives up.
    alloc_retries: u32,
    /// Tag carried in every cookie handed to the device.
    pool_id: u32,
}

impl RxQueueConfig {
    /// The default number of ring entries
    pub const DEFAULT_RING_SIZE: u32 = 512;
    /// The minimum number of ring entries
    pub const MIN_RING_SIZE: u32 = 2;
    /// The maximum number of ring entries
    pub const MAX_RING_SIZE: u32 = 4096;
    /// The default receive buffer size in bytes
    pub const DEFAULT_BUFFER_SIZE: u32 = 2048;
    /// The minimum receive buffer size in bytes
    pub const MIN_BUFFER_SIZE: u32 = 256;
    /// The maximum receive buffer size in bytes
    pub const MAX_BUFFER_SIZE: u32 = 64 * 1024;
    /// The default number of allocation retries
    pub const DEFAULT_ALLOC_RETRIES: u32 = 3;
    /// The maximum number of allocation retries
    pub const MAX_ALLOC_RETRIES: u32 = 16;

    /// Create a configuration. Zero for any value selects its default.
    pub fn new(ring_size: u32, pool_size: u32, buffer_size: u32, alloc_retries: u32) -> Self {
        let mut cfg = Self::default();
        cfg.set_ring_size(ring_size);
        cfg.set_pool_size(pool_size);
        cfg.set_buffer_size(buffer_size);
        cfg.set_alloc_retries(alloc_retries);
        cfg
    }

    /// Set the number of ring entries. 0 selects `DEFAULT_RING_SIZE`. Other
    /// values are rounded up to a power of two and clamped to
    /// `MIN_RING_SIZE..=MAX_RING_SIZE`. The pool grows if it would no longer
    /// cover the ring.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level= "Trace"))]
    pub fn set_ring_size(&mut self, ring_size: u32) {
        self.ring_size = match ring_size {
            0 => Self::DEFAULT_RING_SIZE,
            1.. => min(
                Self::MAX_RING_SIZE,
                max(
                    ring_size
                        .checked_next_power_of_two()
                        .unwrap_or(Self::MAX_RING_SIZE),
                    Self::MIN_RING_SIZE,
                ),
            ),
        };
        self.pool_size = max(self.pool_size, self.ring_size - 1);
    }

    /// Get the number of ring entries
    pub fn get_ring_size(&self) -> u32 {
        self.ring_size
    }

    /// Set the number of descriptors. 0 selects one descriptor per usable
    /// ring slot. The value is clamped so every ring slot can be backed by a
    /// descriptor.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level= "Trace"))]
    pub fn set_pool_size(&mut self, pool_size: u32) {
        let floor = self.ring_size - 1;
        self.pool_size = match pool_size {
            0 => floor,
            1.. => min(MAX_POOL_SIZE, max(pool_size, floor)),
        };
    }

    /// Get the number of descriptors
    pub fn get_pool_size(&self) -> u32 {
        self.pool_size
    }

    /// Set the receive buffer size. 0 selects `DEFAULT_BUFFER_SIZE`, other
    /// values are clamped to `MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE`.
    #[cfg_attr(feature = "tracing", instrument(skip_all, parent = Span::current(), level= "Trace"))]
    pub fn set_buffer_size(&mut self, buffer_size: u32) {
        self.buffer_size = match buffer_size {
            0 => Self::DEFAULT_BUFFER_SIZE,
            1.. => min(
                Self::MAX_BUFFER_SIZE,
                max(buffer_size, Self::MIN_BUFFER_SIZE),
            ),
        };
    }

    /// Get the receive buffer size
    pub fn get_buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Set the number of allocation retries, capped at `MAX_ALLOC_RETRIES`.
    /// Unlike the other settings, 0 is honoured and means "no retry".
    pub fn set_alloc_retries(&mut self, alloc_retries: u32) {
        self.alloc_retries = min(alloc_retries, Self::MAX_ALLOC_RETRIES);
    }

    /// Get the number of allocation retries
    pub fn get_alloc_retries(&self) -> u32 {
        self.alloc_retries
    }

    /// Set the pool id carried in cookies, capped at the largest id a cookie
    /// can hold.
    pub fn set_pool_id(&mut self, pool_id: u32) {
        self.pool_id = min(pool_id, MAX_POOL_ID);
    }

    /// Get the pool id
    pub fn get_pool_id(&self) -> u32 {
        self.pool_id
    }
}

impl Default for RxQueueConfig {
    fn default() -> Self {
        Self {
            ring_size: Self::DEFAULT_RING_SIZE,
            pool_size: Self::DEFAULT_RING_SIZE - 1,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            alloc_retries: Self::DEFAULT_ALLOC_RETRIES,
            pool_id: 0,
        }
    }
}
