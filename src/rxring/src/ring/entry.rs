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

//! Ring Entry Formats

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use super::ENTRY_SIZE;

/// A receive buffer posted to the device.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct RefillEntry {
    /// Device-visible address of the buffer.
    pub buf_addr: u64,
    /// Descriptor cookie, echoed back in the completion.
    pub cookie: u32,
    /// Usable length of the buffer in bytes.
    pub buf_len: u32,
}

const _: () = assert!(core::mem::size_of::<RefillEntry>() == ENTRY_SIZE);
const _: () = assert!(core::mem::offset_of!(RefillEntry, buf_addr) == 0);
const _: () = assert!(core::mem::offset_of!(RefillEntry, cookie) == 8);
const _: () = assert!(core::mem::offset_of!(RefillEntry, buf_len) == 12);

impl RefillEntry {
    pub fn new(buf_addr: u64, cookie: u32, buf_len: u32) -> Self {
        Self {
            buf_addr,
            cookie,
            buf_len,
        }
    }
}

bitflags! {
    /// Per-buffer status reported by the device.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct CompletionFlags: u32 {
        /// First buffer of a frame.
        const FIRST       = 1 << 0;
        /// Last buffer of a frame.
        const LAST        = 1 << 1;
        /// Device flagged the frame as bad (FCS, decrypt, overflow).
        const ERROR       = 1 << 2;
        /// Device verified the payload checksum.
        const CHECKSUM_OK = 1 << 3;
    }
}

/// A buffer the device filled and handed back.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable, PartialEq, Eq, Hash)]
pub struct CompletionEntry {
    /// Cookie of the descriptor the buffer was posted with.
    pub cookie: u32,
    /// Bytes written into the buffer.
    pub len: u32,
    pub flags: u32,
    pub reserved: u32,
}

const _: () = assert!(core::mem::size_of::<CompletionEntry>() == ENTRY_SIZE);

impl CompletionEntry {
    pub fn new(cookie: u32, len: u32, flags: CompletionFlags) -> Self {
        Self {
            cookie,
            len,
            flags: flags.bits(),
            reserved: 0,
        }
    }

    /// Flags as a [`CompletionFlags`] bitfield. Unknown bits are ignored.
    #[inline]
    pub fn flags(&self) -> CompletionFlags {
        CompletionFlags::from_bits_truncate(self.flags)
    }

    /// Buffer holds an entire frame.
    #[inline]
    pub fn is_whole_frame(&self) -> bool {
        self.flags()
            .contains(CompletionFlags::FIRST | CompletionFlags::LAST)
    }
}
