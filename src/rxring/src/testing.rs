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

//! In-process backends shared by the unit tests.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::{Cell, UnsafeCell};
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use bytemuck::Pod;

use crate::access::MemOps;
use crate::buffer::{AllocError, Allocation, BufferProvider, SharedArena};
use crate::ring::{CompletionEntry, RefillEntry, RingConsumer, RingLayout, RingProducer};

/// Address the test memory pretends to live at.
pub const TEST_BASE: u64 = 0x10_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFault(pub u64);

/// Test MemOps implementation over a Vec.
///
/// Device addresses are offsets from [`TEST_BASE`]. Storage is kept as `u64`
/// words so index words are always aligned for atomic access. The memory can
/// be switched offline, or a single address range made to fault, to model a
/// device that is not accessible.
pub struct TestMem {
    storage: UnsafeCell<Vec<u64>>,
    len: usize,
    offline: Cell<bool>,
    fault: Cell<Option<(u64, u64)>>,
}

impl core::fmt::Debug for TestMem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TestMem")
            .field("len", &self.len)
            .field("offline", &self.offline.get())
            .finish()
    }
}

impl TestMem {
    pub fn new(size: usize) -> Self {
        let words = size.div_ceil(8);
        Self {
            storage: UnsafeCell::new(vec![0u64; words]),
            len: words * 8,
            offline: Cell::new(false),
            fault: Cell::new(None),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    /// Make every access overlapping `range` fail.
    pub fn set_fault_range(&self, range: Option<core::ops::Range<u64>>) {
        self.fault.set(range.map(|r| (r.start, r.end)));
    }

    /// Pointer with the Vec's provenance for `len` bytes at `addr`.
    fn ptr_for(&self, addr: u64, len: usize) -> Result<*mut u8, MemFault> {
        if self.offline.get() {
            return Err(MemFault(addr));
        }

        if let Some((lo, hi)) = self.fault.get() {
            if addr < hi && addr.saturating_add(len as u64) > lo {
                return Err(MemFault(addr));
            }
        }

        let off = addr.checked_sub(TEST_BASE).ok_or(MemFault(addr))? as usize;
        if off.checked_add(len).is_none_or(|end| end > self.len) {
            return Err(MemFault(addr));
        }

        let storage = unsafe { &mut *self.storage.get() };
        Ok(storage.as_mut_ptr().cast::<u8>().wrapping_add(off))
    }
}

impl MemOps for TestMem {
    type Error = MemFault;

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

    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let ptr = self.ptr_for(addr, core::mem::size_of::<T>())?.cast::<T>();
        Ok(unsafe { ptr::read_unaligned(ptr) })
    }

    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let ptr = self.ptr_for(addr, core::mem::size_of::<T>())?.cast::<T>();
        unsafe { ptr::write_unaligned(ptr, val) };
        Ok(())
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

/// A single ring placed at the start of its own test memory.
pub struct OwnedRing {
    mem: Rc<TestMem>,
    layout: RingLayout,
}

impl OwnedRing {
    pub fn new(num_entries: u32) -> Self {
        let mem = Rc::new(TestMem::new(RingLayout::query_size(num_entries)));
        let layout = unsafe { RingLayout::from_base(TEST_BASE, num_entries).unwrap() };
        Self { mem, layout }
    }

    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    pub fn mem(&self) -> Rc<TestMem> {
        self.mem.clone()
    }

    pub fn read_hp(&self) -> u32 {
        self.mem.load_acquire(self.layout.hp_addr).unwrap()
    }

    pub fn read_tp(&self) -> u32 {
        self.mem.load_acquire(self.layout.tp_addr).unwrap()
    }

    pub fn write_tp(&self, val: u32) {
        self.mem.store_release(self.layout.tp_addr, val).unwrap()
    }
}

/// Test memory holding a refill ring, a completion ring and a buffer region.
pub struct RxRegion {
    pub mem: Rc<TestMem>,
    pub refill: RingLayout,
    pub completion: RingLayout,
    pub buf_base: u64,
    pub buf_len: usize,
}

impl RxRegion {
    pub fn new(num_entries: u32, buf_len: usize) -> Self {
        let ring_size = RingLayout::query_size(num_entries) as u64;
        let refill_base = TEST_BASE;
        let completion_base = (refill_base + ring_size).next_multiple_of(64);
        let buf_base = (completion_base + ring_size).next_multiple_of(0x1_0000);
        let total = (buf_base - TEST_BASE) as usize + buf_len;

        let mem = Rc::new(TestMem::new(total));
        let refill = unsafe { RingLayout::from_base(refill_base, num_entries).unwrap() };
        let completion = unsafe { RingLayout::from_base(completion_base, num_entries).unwrap() };

        Self {
            mem,
            refill,
            completion,
            buf_base,
            buf_len,
        }
    }

    pub fn device(&self) -> TestDevice {
        TestDevice {
            refill: RingConsumer::new(self.refill, self.mem.clone()).unwrap(),
            completion: RingProducer::new(self.completion, self.mem.clone()).unwrap(),
            posted: Vec::new(),
        }
    }
}

/// Software stand-in for the device side of both rings.
pub struct TestDevice {
    refill: RingConsumer<Rc<TestMem>, RefillEntry>,
    completion: RingProducer<Rc<TestMem>, CompletionEntry>,
    /// Buffers taken off the refill ring, oldest first.
    pub posted: Vec<RefillEntry>,
}

impl TestDevice {
    /// Take every buffer currently posted on the refill ring.
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

    /// Fill the oldest posted buffer with `data` and complete it.
    pub fn complete_next(&mut self, data: &[u8], flags: crate::ring::CompletionFlags) -> u32 {
        let e = self.posted.remove(0);
        let mem = self.refill.mem().clone();
        let n = data.len().min(e.buf_len as usize);
        mem.write(e.buf_addr, &data[..n]).unwrap();
        self.push_completion(CompletionEntry::new(e.cookie, data.len() as u32, flags));
        e.cookie
    }

    /// Publish a raw completion entry.
    pub fn push_completion(&mut self, entry: CompletionEntry) {
        let mut acc = self.completion.begin().unwrap();
        acc.push(entry).unwrap();
        acc.commit().unwrap();
    }
}

/// Fails the next `fail_next` allocations, then defers to the arena.
pub struct FlakyProvider<const N: usize> {
    pub arena: SharedArena<N>,
    pub fail_next: Cell<u32>,
    /// Every dealloc fails while set.
    pub fail_dealloc: Cell<bool>,
}

impl<const N: usize> FlakyProvider<N> {
    pub fn new(base_addr: u64, region_len: usize) -> Self {
        Self {
            arena: SharedArena::new(base_addr, region_len).unwrap(),
            fail_next: Cell::new(0),
            fail_dealloc: Cell::new(false),
        }
    }
}

impl<const N: usize> BufferProvider for FlakyProvider<N> {
    fn alloc(&self, len: usize) -> Result<Allocation, AllocError> {
        if self.fail_next.get() > 0 {
            self.fail_next.set(self.fail_next.get() - 1);
            return Err(AllocError::OutOfMemory);
        }
        self.arena.alloc(len)
    }

    fn dealloc(&self, alloc: Allocation) -> Result<(), AllocError> {
        if self.fail_dealloc.get() {
            return Err(AllocError::Busy);
        }
        self.arena.dealloc(alloc)
    }
}
