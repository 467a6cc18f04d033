// Copyright (c) 2025 Syswonder
// hvisor is licensed under Mulan PSL v2.
// You can use this software according to the terms and conditions of the Mulan PSL v2.
// You may obtain a copy of Mulan PSL v2 at:
//     http://license.coscl.org.cn/MulanPSL2
// THIS SOFTWARE IS PROVIDED ON AN "AS IS" BASIS, WITHOUT WARRANTIES OF ANY KIND, EITHER
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO NON-INFRINGEMENT, MERCHANTABILITY OR
// FIT FOR A PARTICULAR PURPOSE.
// See the Mulan PSL v2 for more details.
//
// Syswonder Website:
//      https://www.syswonder.org
//
// Authors:
//
pub mod addr;
pub mod frame;
pub mod heap;
pub mod mm;
pub mod paging;

use core::ops::{Deref, DerefMut};

pub use addr::{GuestPhysAddr, PhysAddr, VirtAddr};
pub use frame::{BitmapFrameAllocator, FrameAllocator};
pub use mm::{MemoryRegion, MemorySet};
pub use paging::{PageSize, PageTableMemory, PagingError, PagingInstr, PagingResult};

pub const PAGE_SIZE: usize = PageSize::Size4K as usize;

#[repr(align(4096))]
pub struct AlignedPage([u8; PAGE_SIZE]);

impl AlignedPage {
    pub const fn new() -> Self {
        Self([0; PAGE_SIZE])
    }
}

impl Default for AlignedPage {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for AlignedPage {
    type Target = [u8; PAGE_SIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for AlignedPage {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
