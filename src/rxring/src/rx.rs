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

//! Receive Queue
//!
//! [`RxQueue`] owns both software ring halves of one receive queue and keeps
//! the refill ring topped up as completions are reaped:
//!
//! ```text
//!              ┌──────────── refill ring (SrcRing) ────────────┐
//!   DescPool ──┤ replenish                             device  │
//!       ▲      └───────────────────────────────────────────────┘
//!       │      ┌────────── completion ring (DstRing) ──────────┐
//!       └──────┤ poll                                  device  │
//!              └───────────────────────────────────────────────┘
//! ```
//!
//! # Frames
//!
//! A frame spans one or more buffers. The device marks the first buffer with
//! `FIRST` and the last with `LAST`; a single-buffer frame carries both.
//! Buffers with neither flag continue the frame in progress. A continuation
//! that arrives with no frame in progress is dropped, as is a whole frame in
//! progress when a new `FIRST` arrives before its `LAST`.
//!
//! Frame bytes are copied out of device memory, so every reaped buffer goes
//! straight back to the allocator whether its frame was delivered or not.

use alloc::sync::Arc;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
#[cfg(feature = "tracing")]
use tracing::{Span, instrument};

use crate::access::MemOps;
use crate::buffer::{AllocError, Allocation, BufferProvider};
use crate::config::RxQueueConfig;
use crate::desc_pool::{Cookie, DescPool, PoolError};
use crate::replenish::{Doorbell, QueueStats, ReplenishError, ReplenishReport, Replenisher};
use crate::ring::{CompletionEntry, CompletionFlags, DstRing, RingError, RingLayout, SrcRing};

/// Frames longer than this many buffers are dropped.
pub const MAX_FRAME_BUFFERS: u32 = 64;

/// Errors that can occur while running a receive queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    #[error("Ring error: {0}")]
    Ring(#[from] RingError),
    #[error("Replenish error: {0}")]
    Replenish(#[from] ReplenishError),
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("Allocation error: {0}")]
    Alloc(#[from] AllocError),
    #[error("Ring layout has {0} entries, queue is configured for {1}")]
    RingSizeMismatch(u32, u32),
}

/// A received frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub data: Bytes,
    /// Every buffer of the frame passed the device's checksum check.
    pub checksum_ok: bool,
    /// Buffers the frame was received in.
    pub buffers: u32,
}

/// Outcome of one [`RxQueue::poll`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Completion entries consumed.
    pub reaped: u32,
    /// Frames handed to the caller.
    pub delivered: u32,
    /// Buffers discarded: device errors, bad lengths, broken frames.
    pub dropped: u32,
    /// Completions whose cookie did not name an in-flight descriptor.
    pub invalid_cookie: u32,
    /// Buffers posted back to the refill ring.
    pub replenished: u32,
    /// The refill ring was not accessible; refill resumes on a later poll.
    pub refill_deferred: bool,
    /// More completions were pending when the budget ran out.
    pub budget_exhausted: bool,
}

struct Partial {
    data: BytesMut,
    checksum_ok: bool,
    buffers: u32,
}

/// Joins multi-buffer frames.
struct Assembler {
    partial: Option<Partial>,
    /// Length posted with every buffer.
    buf_len: usize,
}

impl Assembler {
    fn new(buf_len: usize) -> Self {
        Self {
            partial: None,
            buf_len,
        }
    }

    /// Feed one completed buffer. Returns the frame it finishes, if any.
    fn push<M: MemOps>(
        &mut self,
        mem: &M,
        buf: Allocation,
        entry: &CompletionEntry,
        report: &mut PollReport,
    ) -> Option<RxFrame> {
        let flags = entry.flags();
        let len = entry.len as usize;

        if flags.contains(CompletionFlags::ERROR) || len > buf.len.min(self.buf_len) {
            log::debug!(
                "dropping buffer: cookie={:#x} len={len} flags={flags:?}",
                entry.cookie
            );
            self.discard(report);
            report.dropped += 1;
            return None;
        }

        if flags.contains(CompletionFlags::FIRST) {
            if self.partial.is_some() {
                log::warn!("frame restarted before its last buffer, dropping partial frame");
                self.discard(report);
            }
            self.partial = Some(Partial {
                data: BytesMut::with_capacity(len),
                checksum_ok: true,
                buffers: 0,
            });
        }

        let Some(partial) = self.partial.as_mut() else {
            log::debug!("dropping continuation buffer with no frame in progress");
            report.dropped += 1;
            return None;
        };

        let start = partial.data.len();
        partial.data.resize(start + len, 0);
        if mem.read(buf.addr, &mut partial.data[start..]).is_err() {
            log::error!("failed to read {len} bytes of frame data at {:#x}", buf.addr);
            self.discard(report);
            report.dropped += 1;
            return None;
        }

        partial.buffers += 1;
        partial.checksum_ok &= flags.contains(CompletionFlags::CHECKSUM_OK);

        if partial.buffers > MAX_FRAME_BUFFERS {
            log::warn!("frame exceeds {MAX_FRAME_BUFFERS} buffers, dropping");
            self.discard(report);
            return None;
        }

        if !flags.contains(CompletionFlags::LAST) {
            return None;
        }

        self.partial.take().map(|p| RxFrame {
            data: p.data.freeze(),
            checksum_ok: p.checksum_ok,
            buffers: p.buffers,
        })
    }

    /// Drop the frame in progress, counting its buffers.
    fn discard(&mut self, report: &mut PollReport) {
        if let Some(p) = self.partial.take() {
            report.dropped += p.buffers;
        }
    }

    #[cfg(test)]
    fn pending_buffers(&self) -> u32 {
        self.partial.as_ref().map_or(0, |p| p.buffers)
    }
}

/// One receive queue: a descriptor pool, a refill ring and a completion ring.
pub struct RxQueue<M, P, D> {
    replenisher: Replenisher<M, P, D>,
    completion: DstRing<M>,
    mem: M,
    assembler: Assembler,
    config: RxQueueConfig,
    refill_pending: bool,
}

impl<M, P, D> RxQueue<M, P, D>
where
    M: MemOps + Clone,
    P: BufferProvider,
    D: Doorbell,
{
    /// Create a receive queue.
    ///
    /// Both rings must have `config.get_ring_size()` entries. No buffers are
    /// posted until [`fill`](Self::fill) is called.
    ///
    /// # Arguments
    ///
    /// * `config` - Queue sizing
    /// * `refill` - Layout of the refill ring
    /// * `completion` - Layout of the completion ring
    /// * `mem` - Access to the memory holding both rings and the buffers
    /// * `provider` - Source of device-visible buffers
    /// * `doorbell` - Rung whenever buffers are posted
    pub fn new(
        config: RxQueueConfig,
        refill: RingLayout,
        completion: RingLayout,
        mem: M,
        provider: P,
        doorbell: D,
    ) -> Result<Self, RxError> {
        let ring_size = config.get_ring_size();
        for layout in [refill, completion] {
            if layout.num_entries != ring_size {
                return Err(RxError::RingSizeMismatch(layout.num_entries, ring_size));
            }
        }

        let pool = Arc::new(DescPool::new(config.get_pool_id(), config.get_pool_size())?);
        let src = SrcRing::new(refill, mem.clone())?;
        let completion = DstRing::new(completion, mem.clone())?;

        let replenisher = Replenisher::new(
            pool,
            provider,
            src,
            doorbell,
            config.get_buffer_size() as usize,
            config.get_alloc_retries(),
        );

        log::debug!(
            "rx queue created: pool_id={} ring_size={ring_size} pool_size={} buffer_size={}",
            config.get_pool_id(),
            config.get_pool_size(),
            config.get_buffer_size()
        );

        Ok(Self {
            replenisher,
            completion,
            mem,
            assembler: Assembler::new(config.get_buffer_size() as usize),
            config,
            refill_pending: false,
        })
    }

    /// Post a buffer for every free descriptor the refill ring has room for.
    pub fn fill(&mut self) -> Result<ReplenishReport, RxError> {
        let free = self.replenisher.pool().free_count();
        let report = self.replenisher.replenish(free)?;
        self.refill_pending = report.alloc_failures > 0;
        Ok(report)
    }

    /// Reap up to `budget` completions, handing every complete frame to
    /// `deliver`, then replenish the refill ring.
    ///
    /// # Errors
    ///
    /// - [`RxError::Ring`] - The completion ring could not be accessed. If
    ///   the window could not be opened nothing was consumed. Otherwise the
    ///   entries reaped before the failure were delivered, their slots
    ///   committed and the refill ring replenished as usual, so a later poll
    ///   resumes after them.
    /// - [`RxError::Pool`] - The pool rejected a state transition while
    ///   replenishing.
    ///
    /// A refill ring that cannot be accessed is not an error: the poll
    /// reports `refill_deferred` and the next poll tops up every free
    /// descriptor. The same happens after a pass left short by the
    /// allocator.
    #[cfg_attr(feature = "tracing", instrument(err(Debug), skip_all, parent = Span::current(), level= "Trace"))]
    pub fn poll<F>(&mut self, budget: u32, mut deliver: F) -> Result<PollReport, RxError>
    where
        F: FnMut(RxFrame),
    {
        let mut report = PollReport::default();

        let Self {
            replenisher,
            completion,
            mem,
            assembler,
            ..
        } = self;

        let mut ring_err = None;
        let mut acc = completion.begin()?;
        while report.reaped < budget {
            let entry = match acc.pop() {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    log::error!(
                        "completion ring read failed after {} entries: {e}",
                        report.reaped
                    );
                    ring_err = Some(e);
                    break;
                }
            };
            report.reaped += 1;

            let completed = replenisher.pool().lock().complete(Cookie(entry.cookie));
            let buf = match completed {
                Ok(buf) => buf,
                Err(e) => {
                    log::error!("ignoring completion for cookie {:#x}: {e}", entry.cookie);
                    report.invalid_cookie += 1;
                    continue;
                }
            };

            let frame = assembler.push(&*mem, buf, &entry, &mut report);

            if let Err(e) = replenisher.provider().dealloc(buf) {
                log::error!("failed to release receive buffer {:#x}: {e}", buf.addr);
            }

            if let Some(frame) = frame {
                report.delivered += 1;
                deliver(frame);
            }
        }

        report.budget_exhausted = report.reaped == budget && acc.pending() > 0;
        if let Err(e) = acc.commit() {
            log::warn!("completion ring tail not published: {e}");
            ring_err.get_or_insert(e);
        }

        let wanted = if self.refill_pending {
            self.replenisher.pool().free_count()
        } else {
            report.reaped
        };

        if wanted > 0 {
            match self.replenisher.replenish(wanted) {
                Ok(r) => {
                    report.replenished = r.posted;
                    self.refill_pending = r.alloc_failures > 0;
                }
                Err(ReplenishError::RingAccess(e)) => {
                    log::warn!("refill deferred after reaping {}: {e}", report.reaped);
                    report.refill_deferred = true;
                    self.refill_pending = true;
                }
                Err(e) => return Err(e.into()),
            }
        }

        log::trace!(
            "poll: reaped={} delivered={} dropped={} invalid_cookie={} replenished={}",
            report.reaped,
            report.delivered,
            report.dropped,
            report.invalid_cookie,
            report.replenished
        );

        match ring_err {
            Some(e) => Err(RxError::Ring(e)),
            None => Ok(report),
        }
    }

    /// Reclaim every in-flight buffer and drop any partial frame.
    ///
    /// The device must have stopped using the refill ring: buffers it still
    /// holds are returned to the allocator. Returns the number reclaimed.
    pub fn shutdown(&mut self) -> Result<u32, RxError> {
        let bufs = self.replenisher.pool().lock().drain_inflight();
        for buf in &bufs {
            self.replenisher.provider().dealloc(*buf)?;
        }

        self.assembler.partial = None;
        self.refill_pending = false;

        log::debug!("rx queue shut down, reclaimed {} buffers", bufs.len());
        Ok(bufs.len() as u32)
    }

    pub fn stats(&self) -> QueueStats {
        self.replenisher.stats()
    }

    pub fn pool(&self) -> &Arc<DescPool> {
        self.replenisher.pool()
    }

    pub fn provider(&self) -> &P {
        self.replenisher.provider()
    }

    pub fn config(&self) -> &RxQueueConfig {
        &self.config
    }
}
