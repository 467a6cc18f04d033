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
//! Physical memory allocation.

use bitmap_allocator::BitAlloc;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use super::addr::{is_aligned, PhysAddr, VirtAddr};
use crate::consts::{PAGE_SIZE, PA_BITS};
use crate::error::HvResult;

// Support max 64K * 4096 = 256MB of page-table memory.
type FrameAlloc = bitmap_allocator::BitAlloc64K;

/// Source of zero-filled 4 KiB pages for translation tables.
pub trait FrameAllocator: Send + Sync {
    /// Allocate one page-aligned, zero-filled frame.
    fn alloc_zeroed_page(&self) -> HvResult<PhysAddr>;

    /// # Safety
    ///
    /// `paddr` must have been returned by `alloc_zeroed_page` of this allocator and must not be
    /// referenced by any live descriptor.
    unsafe fn dealloc_page(&self, paddr: PhysAddr);

    /// Address at which the hypervisor can access the frame at `paddr`.
    fn phys_to_virt(&self, paddr: PhysAddr) -> VirtAddr;
}

/// Bitmap allocator over one contiguous pool of frames.
pub struct BitmapFrameAllocator {
    phys_base: PhysAddr,
    virt_base: VirtAddr,
    page_count: usize,
    free: AtomicUsize,
    inner: Mutex<FrameAlloc>,
}

impl BitmapFrameAllocator {
    /// Manage `size` bytes of frames starting at `phys_base`, accessible at `virt_base`.
    ///
    /// # Safety
    ///
    /// The whole range must be unused RAM, mapped read/write at `virt_base` for as long as the
    /// allocator or any table allocated from it lives.
    pub unsafe fn new(phys_base: PhysAddr, virt_base: VirtAddr, size: usize) -> HvResult<Self> {
        if !is_aligned(phys_base) || !is_aligned(virt_base) {
            return hv_result_err!(EINVAL, "frame pool is not page aligned");
        }
        let page_count = size / PAGE_SIZE;
        if page_count == 0 || page_count > FrameAlloc::CAP {
            return hv_result_err!(
                EINVAL,
                format!("frame pool of {} pages is not supported", page_count)
            );
        }
        if phys_base + page_count * PAGE_SIZE > 1 << PA_BITS {
            return hv_result_err!(EINVAL, "frame pool exceeds the output address space");
        }
        let mut inner = FrameAlloc::DEFAULT;
        inner.insert(0..page_count);
        info!(
            "Frame allocator initialization finished: {:#x?}",
            phys_base..phys_base + page_count * PAGE_SIZE
        );
        Ok(Self {
            phys_base,
            virt_base,
            page_count,
            free: AtomicUsize::new(page_count),
            inner: Mutex::new(inner),
        })
    }

    /// Number of frames still available.
    pub fn free_pages(&self) -> usize {
        self.free.load(Ordering::Acquire)
    }

    pub fn total_pages(&self) -> usize {
        self.page_count
    }

    fn contains(&self, paddr: PhysAddr) -> bool {
        paddr >= self.phys_base && paddr < self.phys_base + self.page_count * PAGE_SIZE
    }
}

impl FrameAllocator for BitmapFrameAllocator {
    fn alloc_zeroed_page(&self) -> HvResult<PhysAddr> {
        let idx = self.inner.lock().alloc().ok_or(hv_err!(ENOMEM))?;
        self.free.fetch_sub(1, Ordering::AcqRel);
        let paddr = self.phys_base + idx * PAGE_SIZE;
        unsafe { core::ptr::write_bytes(self.phys_to_virt(paddr) as *mut u8, 0, PAGE_SIZE) };
        trace!("Allocate frame: {:#x}", paddr);
        Ok(paddr)
    }

    unsafe fn dealloc_page(&self, paddr: PhysAddr) {
        trace!("Deallocate frame: {:#x}", paddr);
        if !self.contains(paddr) || !is_aligned(paddr) {
            warn!("Deallocate foreign frame {:#x}, ignored", paddr);
            return;
        }
        let idx = (paddr - self.phys_base) / PAGE_SIZE;
        let mut inner = self.inner.lock();
        if inner.test(idx) {
            warn!("Double free of frame {:#x}, ignored", paddr);
            return;
        }
        inner.dealloc(idx);
        self.free.fetch_add(1, Ordering::AcqRel);
    }

    fn phys_to_virt(&self, paddr: PhysAddr) -> VirtAddr {
        paddr - self.phys_base + self.virt_base
    }
}

/// Frame pool backed by leaked host memory, exposed at a fake physical base.
#[cfg(test)]
pub(crate) fn test_allocator(page_count: usize) -> alloc::sync::Arc<BitmapFrameAllocator> {
    use super::AlignedPage;
    use alloc::{boxed::Box, sync::Arc, vec::Vec};

    const TEST_POOL_PHYS_BASE: PhysAddr = 0x8000_0000;
    let pool: &'static mut [AlignedPage] = Box::leak(
        (0..page_count)
            .map(|_| AlignedPage::new())
            .collect::<Vec<_>>()
            .into_boxed_slice(),
    );
    let virt_base = pool.as_mut_ptr() as VirtAddr;
    let allocator = unsafe {
        BitmapFrameAllocator::new(TEST_POOL_PHYS_BASE, virt_base, page_count * PAGE_SIZE)
    };
    match allocator {
        Ok(allocator) => Arc::new(allocator),
        Err(e) => panic!("test frame pool: {:?}", e),
    }
}
