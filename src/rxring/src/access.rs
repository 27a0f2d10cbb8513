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

//! Device-Visible Memory Access
//!
//! The rings and the receive path never dereference device addresses
//! directly. Every access goes through [`MemOps`], which the backend
//! implements for whatever memory the device actually shares with us.

use bytemuck::Pod;

/// Backend-provided access to memory shared with the device.
///
/// An error from any method means the device side of the mapping cannot be
/// reached right now. Callers treat that as transient.
///
/// # Safety
///
/// Implementations must ensure that:
/// - Addresses passed to methods are valid for the duration of the call
/// - Memory ordering guarantees are upheld as documented
/// - Reads and writes don't cause undefined behavior (alignment, validity)
pub trait MemOps {
    type Error;

    /// Copy `dst.len()` bytes starting at device address `addr`.
    ///
    /// Returns the number of bytes read.
    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error>;

    /// Copy `src` to device address `addr`.
    ///
    /// Returns the number of bytes written.
    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error>;

    /// Load a ring index word with acquire semantics.
    ///
    /// `addr` must translate to a valid, aligned `AtomicU32`.
    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error>;

    /// Store a ring index word with release semantics.
    ///
    /// `addr` must translate to a valid, aligned `AtomicU32`.
    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error>;

    /// Read a Pod type at the given address.
    fn read_val<T: Pod>(&self, addr: u64) -> Result<T, Self::Error> {
        let mut val = T::zeroed();
        let bytes = bytemuck::bytes_of_mut(&mut val);

        self.read(addr, bytes)?;
        Ok(val)
    }

    /// Write a Pod type at the given address.
    fn write_val<T: Pod>(&self, addr: u64, val: T) -> Result<(), Self::Error> {
        let bytes = bytemuck::bytes_of(&val);
        self.write(addr, bytes)?;
        Ok(())
    }
}

impl<M: MemOps> MemOps for alloc::rc::Rc<M> {
    type Error = M::Error;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read(addr, dst)
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(addr, src)
    }

    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error> {
        (**self).load_acquire(addr)
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error> {
        (**self).store_release(addr, val)
    }
}

impl<M: MemOps> MemOps for alloc::sync::Arc<M> {
    type Error = M::Error;

    fn read(&self, addr: u64, dst: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).read(addr, dst)
    }

    fn write(&self, addr: u64, src: &[u8]) -> Result<usize, Self::Error> {
        (**self).write(addr, src)
    }

    fn load_acquire(&self, addr: u64) -> Result<u32, Self::Error> {
        (**self).load_acquire(addr)
    }

    fn store_release(&self, addr: u64, val: u32) -> Result<(), Self::Error> {
        (**self).store_release(addr, val)
    }
}
