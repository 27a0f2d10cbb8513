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
#![allow(dead_code)]

use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use rxring::ring::{RingConsumer, RingProducer};
use rxring::{
    CompletionEntry, CompletionFlags, MemOps, QueueStats, RefillEntry, RingLayout, RxQueue,
    RxQueueConfig, SharedArena,
};

/// Device address of the first byte of a [`HeapMem`].
pub const BASE: u64 = 0x4000_0000;

/// Buffer slot size used throughout the tests.
pub const BUF: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault(pub u64);

/// Heap memory shared between the queue and an emulated device.
///
/// Buffer bytes are only touched by one side at a time; the hand-over is
/// ordered by the ring index words, which are accessed atomically.
pub struct HeapMem {
    base: *mut u8,
    len: usize,
    offline: AtomicBool,
}

// SAFETY: see the type docs; concurrent access is ordered by the rings.
unsafe impl Send for HeapMem {}
unsafe impl Sync for HeapMem {}

impl HeapMem {
    pub fn new(size: usize) -> Self {
        let words = size.div_ceil(8);
        let storage: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        Self {
            base: Box::into_raw(storage).cast::<u8>(),
            len: words * 8,
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn ptr_for(&self, addr: u64, len: usize) -> Result<*mut u8, Fault> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Fault(addr));
        }
        let off = addr.checked_sub(BASE).ok_or(Fault(addr))? as usize;
        if off.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(Fault(addr));
        }
        Ok(self.base.wrapping_add(off))
    }
}

impl Drop for HeapMem {
    fn drop(&mut self) {
        let words = ptr::slice_from_raw_parts_mut(self.base.cast::<u64>(), self.len / 8);
        drop(unsafe { Box::from_raw(words) });
    }
}

impl MemOps for HeapMem {
    type Error = Fault;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        let src = self.ptr_for(addr, dst.len())?;
        unsafe { ptr::copy_nonoverlapping(src, dst.as_mut_ptr(), dst.len()) };
        Ok(dst.len())
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        let dst = self.ptr_for(addr, src.len())?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(src.len())
    }

    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error> {
        let ptr = self.ptr_for(addr, 4)?.cast::<AtomicU32>();
        Ok(unsafe { (*ptr).load(Ordering::Acquire) })
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error> {
        let ptr = self.ptr_for(addr, 4)?.cast::<AtomicU32>();
        unsafe { (*ptr).store(val, Ordering::Release) };
        Ok(())
    }
}

/// Both rings and a buffer region laid out in one [`HeapMem`].
pub struct Region {
    pub mem: Arc<HeapMem>,
    pub refill: RingLayout,
    pub completion: RingLayout,
    pub buf_base: u64,
    pub buf_len: usize,
}

impl Region {
    pub fn new(num_entries: u32, buf_slots: usize) -> Self {
        let ring_bytes = RingLayout::query_size(num_entries) as u64;
        let completion_base = (BASE + ring_bytes).next_multiple_of(64);
        let buf_base = (completion_base + ring_bytes).next_multiple_of(0x1000);
        let buf_len = buf_slots * BUF;
        let total = (buf_base - BASE) as usize + buf_len;

        Self {
            mem: Arc::new(HeapMem::new(total)),
            refill: unsafe { RingLayout::from_base(BASE, num_entries).unwrap() },
            completion: unsafe { RingLayout::from_base(completion_base, num_entries).unwrap() },
            buf_base,
            buf_len,
        }
    }

    pub fn arena(&self) -> SharedArena<BUF> {
        SharedArena::new(self.buf_base, self.buf_len).unwrap()
    }

    pub fn device(&self) -> Device {
        Device {
            refill: RingConsumer::new(self.refill, self.mem.clone()).unwrap(),
            completion: RingProducer::new(self.completion, self.mem.clone()).unwrap(),
            mem: self.mem.clone(),
            posted: Vec::new(),
        }
    }
}

/// Counts doorbell rings.
#[derive(Clone, Default)]
pub struct Bell(pub Arc<AtomicUsize>);

impl rxring::Doorbell for Bell {
    fn ring(&self, _stats: QueueStats) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl Bell {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub type Queue = RxQueue<Arc<HeapMem>, SharedArena<BUF>, Bell>;

/// Build a queue over `region` with the given ring size.
pub fn queue(region: &Region, config: RxQueueConfig) -> (Queue, Bell) {
    let bell = Bell::default();
    let q = RxQueue::new(
        config,
        region.refill,
        region.completion,
        region.mem.clone(),
        region.arena(),
        bell.clone(),
    )
    .unwrap();
    (q, bell)
}

/// Software model of the device side of both rings.
pub struct Device {
    refill: RingConsumer<Arc<HeapMem>, RefillEntry>,
    completion: RingProducer<Arc<HeapMem>, CompletionEntry>,
    mem: Arc<HeapMem>,
    pub posted: Vec<RefillEntry>,
}

impl Device {
    /// Take every buffer currently on the refill ring.
    pub fn take_posted(&mut self) -> usize {
        let mut acc = self.refill.begin().unwrap();
        let mut n = 0;
        while let Some(e) = acc.pop().unwrap() {
            self.posted.push(e);
            n += 1;
        }
        acc.commit().unwrap();
        n
    }

    /// Publish a raw completion entry.
    pub fn push_completion(&mut self, entry: CompletionEntry) {
        let mut acc = self.completion.begin().unwrap();
        acc.push(entry).unwrap();
        acc.commit().unwrap();
    }

    /// Room left on the completion ring.
    pub fn completion_space(&self) -> u32 {
        self.completion.num_avail().unwrap()
    }

    /// Receive `frame`, splitting it over as many posted buffers as needed.
    /// Returns false, consuming nothing, if too few buffers are posted or the
    /// completion ring lacks room.
    pub fn receive(&mut self, frame: &[u8], checksum_ok: bool) -> bool {
        let chunks: Vec<&[u8]> = if frame.is_empty() {
            vec![frame]
        } else {
            frame.chunks(BUF).collect()
        };

        if chunks.len() > self.posted.len() || chunks.len() as u32 > self.completion_space() {
            return false;
        }

        let mut acc = self.completion.begin().unwrap();
        for (i, chunk) in chunks.iter().enumerate() {
            let e = self.posted.remove(0);
            self.mem.write(e.buf_addr, chunk).unwrap();

            let mut flags = CompletionFlags::empty();
            if i == 0 {
                flags |= CompletionFlags::FIRST;
            }
            if i == chunks.len() - 1 {
                flags |= CompletionFlags::LAST;
            }
            if checksum_ok {
                flags |= CompletionFlags::CHECKSUM_OK;
            }
            acc.push(CompletionEntry::new(e.cookie, chunk.len() as u32, flags))
                .unwrap();
        }
        acc.commit().unwrap();
        true
    }
}

/// Deterministic frame contents for sequence number `seq`.
pub fn frame_for(seq: u32, len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(len.max(4));
    v.extend_from_slice(&seq.to_le_bytes());
    v.extend((4..len).map(|i| (i as u32).wrapping_mul(seq | 1) as u8));
    v.truncate(len.max(4));
    v
}
