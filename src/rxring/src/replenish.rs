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

//! Refill Ring Replenishment
//!
//! [`Replenisher::replenish`] moves free descriptors onto the refill ring,
//! attaching a freshly allocated buffer to each. A pass runs entirely inside
//! the pool's critical section:
//!
//! ```text
//!   lock pool
//!   ├─ gather up to `requested` free descriptors
//!   ├─ begin ring access ───────────── fails: return descriptors, RingAccess
//!   ├─ to_post = min(requested, gathered, ring space)
//!   ├─ for each: alloc (bounded retry) ─ exhausted: stop, short count
//!   │            push RefillEntry
//!   ├─ commit ──────────────────────── fails: unwind, RingAccess
//!   ├─ mark posted descriptors in flight
//!   └─ return unposted descriptors to the free list
//!   unlock pool
//!   ring doorbell if anything was posted
//! ```
//!
//! Nothing becomes visible to the device before the commit, so an aborted
//! pass leaves no trace in the ring and every descriptor is back on the free
//! list.

use alloc::sync::Arc;

use smallvec::SmallVec;
use thiserror::Error;
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::MemOps;
use crate::buffer::{AllocError, Allocation, BufferProvider};
use crate::desc_pool::{DescPool, PoolError};
use crate::ring::{RefillEntry, RingError, SrcRing};

/// Descriptors handled per pass without spilling to the heap.
const INLINE_BATCH: usize = 64;

/// A trait for telling the device that new buffers were posted.
pub trait Doorbell {
    fn ring(&self, stats: QueueStats);
}

impl<F: Fn(QueueStats)> Doorbell for F {
    fn ring(&self, stats: QueueStats) {
        self(stats)
    }
}

/// Snapshot of the queue, handed to the [`Doorbell`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Descriptors on the free list.
    pub free: u32,
    /// Descriptors posted to the device and not yet completed.
    pub inflight: u32,
    /// Free refill ring slots.
    pub ring_space: u32,
}

/// Outcome of one replenish pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplenishReport {
    /// Descriptors the caller asked for.
    pub requested: u32,
    /// Descriptors posted to the refill ring.
    pub posted: u32,
    /// Free ring slots seen when the pass began.
    pub ring_space: u32,
    /// Descriptors whose buffer allocation failed after every retry.
    pub alloc_failures: u32,
    /// Fewer descriptors were posted than requested.
    pub short: bool,
}

impl ReplenishReport {
    pub fn is_short(&self) -> bool {
        self.short
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplenishError {
    #[error("Refill ring not accessible: {0}")]
    RingAccess(RingError),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Posts receive buffers from a descriptor pool to a refill ring.
pub struct Replenisher<M, P, D> {
    pool: Arc<DescPool>,
    provider: P,
    ring: SrcRing<M>,
    doorbell: D,
    buffer_size: usize,
    alloc_retries: u32,
}

impl<M, P, D> Replenisher<M, P, D>
where
    M: MemOps,
    P: BufferProvider,
    D: Doorbell,
{
    /// Create a replenisher.
    ///
    /// # Arguments
    ///
    /// * `pool` - Descriptor pool, shared with whoever reaps completions
    /// * `provider` - Source of device-visible buffers
    /// * `ring` - Software side of the refill ring
    /// * `doorbell` - Rung after every pass that posted something
    /// * `buffer_size` - Bytes requested for each buffer
    /// * `alloc_retries` - Extra allocation attempts per descriptor
    pub fn new(
        pool: Arc<DescPool>,
        provider: P,
        ring: SrcRing<M>,
        doorbell: D,
        buffer_size: usize,
        alloc_retries: u32,
    ) -> Self {
        Self {
            pool,
            provider,
            ring,
            doorbell,
            buffer_size,
            alloc_retries,
        }
    }

    /// Post up to `requested` buffers to the refill ring.
    ///
    /// A short count is not an error: it happens when the free list, the ring
    /// or the allocator runs out, and `ReplenishReport` tells which.
    ///
    /// # Errors
    ///
    /// - [`ReplenishError::RingAccess`] - The ring could not be accessed or
    ///   published. Every gathered descriptor is back on the free list and
    ///   every allocated buffer was released; retry later.
    /// - [`ReplenishError::Pool`] - The pool rejected a state transition.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn replenish(&mut self, requested: u32) -> Result<ReplenishReport, ReplenishError> {
        let mut report = ReplenishReport {
            requested,
            ..Default::default()
        };

        if requested == 0 {
            return Ok(report);
        }

        let buf_len = u32::try_from(self.buffer_size).unwrap_or(u32::MAX);

        let stats = {
            let mut pool = self.pool.lock();

            let mut held: SmallVec<[u32; INLINE_BATCH]> = SmallVec::new();
            while (held.len() as u32) < requested {
                let Some(idx) = pool.pop_free() else {
                    break;
                };
                held.push(idx);
            }

            let mut acc = match self.ring.begin() {
                Ok(acc) => acc,
                Err(e) => {
                    log::warn!("refill ring not accessible, deferring refill: {e}");
                    for idx in held {
                        pool.push_free(idx)?;
                    }
                    return Err(ReplenishError::RingAccess(e));
                }
            };

            report.ring_space = acc.num_avail();
            let to_post = requested.min(held.len() as u32).min(report.ring_space);

            let mut posted: SmallVec<[Allocation; INLINE_BATCH]> = SmallVec::new();
            let mut push_err = None;

            for &idx in held.iter().take(to_post as usize) {
                let buf = match alloc_with_retry(&self.provider, self.buffer_size, self.alloc_retries)
                {
                    Ok(buf) => buf,
                    Err(e) => {
                        log::warn!(
                            "receive buffer allocation failed after {} attempts: {e}",
                            self.alloc_retries + 1
                        );
                        report.alloc_failures += 1;
                        break;
                    }
                };

                let entry = RefillEntry::new(buf.addr, pool.cookie(idx).0, buf_len);
                if let Err(e) = acc.push(entry) {
                    release(&self.provider, buf);
                    push_err = Some(e);
                    break;
                }

                posted.push(buf);
            }

            let published = match push_err {
                Some(e) => Err(e),
                None => acc.commit(),
            };

            if let Err(e) = published {
                log::warn!("refill ring publish failed, unwinding {} buffers: {e}", posted.len());
                for buf in posted {
                    release(&self.provider, buf);
                }
                for idx in held {
                    pool.push_free(idx)?;
                }
                return Err(ReplenishError::RingAccess(e));
            }

            for (&idx, &buf) in held.iter().zip(posted.iter()) {
                pool.mark_inflight(idx, buf)?;
            }
            for &idx in &held[posted.len()..] {
                pool.push_free(idx)?;
            }

            report.posted = posted.len() as u32;
            report.short = report.posted < requested;

            QueueStats {
                free: pool.free_count(),
                inflight: pool.inflight_count(),
                ring_space: report.ring_space - report.posted,
            }
        };

        log::trace!(
            "replenish: requested={} posted={} ring_space={} alloc_failures={}",
            report.requested,
            report.posted,
            report.ring_space,
            report.alloc_failures
        );

        if report.posted > 0 {
            self.doorbell.ring(stats);
        }

        Ok(report)
    }

    /// Current queue occupancy. Ring space reads as 0 while the ring is not
    /// accessible.
    pub fn stats(&self) -> QueueStats {
        let pool = self.pool.lock();
        QueueStats {
            free: pool.free_count(),
            inflight: pool.inflight_count(),
            ring_space: self.ring.num_avail().unwrap_or(0),
        }
    }

    pub fn pool(&self) -> &Arc<DescPool> {
        &self.pool
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn ring(&self) -> &SrcRing<M> {
        &self.ring
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

fn release<P: BufferProvider>(provider: &P, buf: Allocation) {
    if let Err(e) = provider.dealloc(buf) {
        log::error!("failed to release receive buffer {:#x}: {e}", buf.addr);
    }
}

/// Allocate `len` bytes, trying `1 + retries` times in total.
fn alloc_with_retry<P: BufferProvider>(
    provider: &P,
    len: usize,
    retries: u32,
) -> Result<Allocation, AllocError> {
    let mut attempt = 0;
    loop {
        match provider.alloc(len) {
            Ok(buf) => return Ok(buf),
            Err(e) if attempt >= retries => return Err(e),
            Err(e) => log::debug!("buffer allocation attempt {} failed: {e}", attempt + 1),
        }
        attempt += 1;
    }
}
