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

#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::panic))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::expect_used))]
#![cfg_attr(not(any(test, debug_assertions)), warn(clippy::unwrap_used))]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! Receive buffer management for a host/device datapath.
//!
//! A fixed pool of receive descriptors is decoupled from a device-visible
//! refill ring. Software posts `(cookie, buffer)` pairs to the refill ring,
//! the device fills the buffers and reports them on a completion ring, and
//! software reaps the completions and replenishes the refill ring. Buffer
//! ownership moves between the two sides without copying.
//!
//! The crate is layered:
//!
//! - [`access`]: the [`MemOps`] trait through which all device-visible memory
//!   is touched.
//! - [`ring`]: single-producer/single-consumer index rings
//!   ([`SrcRing`], [`DstRing`]) and their entry formats.
//! - [`buffer`]: a bitmap allocator for device-visible receive buffers.
//! - [`desc_pool`]: the descriptor pool and its free list.
//! - [`replenish`]: the refill algorithm.
//! - [`rx`]: the budgeted reap loop tying everything together.

extern crate alloc;

pub mod access;
pub mod buffer;
pub mod config;
pub mod desc_pool;
pub mod replenish;
pub mod ring;
pub mod rx;

pub use access::MemOps;
pub use buffer::{AllocError, Allocation, BufferArena, BufferProvider, SharedArena};
pub use config::RxQueueConfig;
pub use desc_pool::{Cookie, DescPool, PoolError};
pub use replenish::{Doorbell, QueueStats, ReplenishError, ReplenishReport, Replenisher};
pub use ring::{
    CompletionEntry, CompletionFlags, DstRing, RefillEntry, RingError, RingLayout, SrcRing,
};
pub use rx::{PollReport, RxError, RxFrame, RxQueue};

#[cfg(test)]
pub(crate) mod testing;
