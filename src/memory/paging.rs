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
use alloc::{collections::BTreeSet, sync::Arc};
use core::fmt::{Debug, Formatter, Result};

use super::addr::{is_aligned, PhysAddr};
use super::frame::FrameAllocator;
use crate::consts::ENTRY_COUNT;
use crate::error::{HvError, HvResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingError {
    NoMemory,
    NotMapped,
    AlreadyMapped,
    MappedToHugePage,
    /// Address not aligned to the granule of the level it is used at.
    Misaligned,
    /// Address outside the input or output address space.
    OutOfRange,
    /// Attribute value wider than its descriptor field.
    InvalidAttr,
    /// Descriptor kind not legal at this level.
    InvalidLevel,
    /// A descriptor points to memory that is not a table of this hierarchy.
    BadTable,
}

pub type PagingResult<T = ()> = core::result::Result<T, PagingError>;

impl From<PagingError> for HvError {
    fn from(err: PagingError) -> Self {
        match err {
            PagingError::NoMemory => hv_err!(ENOMEM),
            PagingError::AlreadyMapped => hv_err!(EEXIST, format!("{:?}", err)),
            PagingError::Misaligned
            | PagingError::OutOfRange
            | PagingError::InvalidAttr
            | PagingError::InvalidLevel => hv_err!(EINVAL, format!("{:?}", err)),
            _ => hv_err!(EFAULT, format!("{:?}", err)),
        }
    }
}

#[repr(usize)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PageSize {
    Size4K = 0x1000,
    Size2M = 0x20_0000,
    Size1G = 0x4000_0000,
}

impl PageSize {
    pub const fn is_aligned(self, addr: usize) -> bool {
        self.page_offset(addr) == 0
    }

    pub const fn align_down(self, addr: usize) -> usize {
        addr & !(self as usize - 1)
    }

    pub const fn page_offset(self, addr: usize) -> usize {
        addr & (self as usize - 1)
    }
}

/// Architecture hooks of one translation regime.
pub trait PagingInstr {
    /// Load `ttbr` into the regime's translation table base register.
    ///
    /// # Safety
    ///
    /// The tables it points to must stay alive and consistent while they are in use.
    unsafe fn activate(ttbr: u64);
    /// Invalidate cached translations of `vaddr`, or of the whole regime with `None`.
    fn flush(vaddr: Option<usize>);
}

/// Memory that stores the tables of one translation hierarchy.
///
/// Every table is one frame from the allocator and is identified by its physical address,
/// which is also what parent descriptors store. The first table is the root.
pub struct PageTableMemory {
    allocator: Arc<dyn FrameAllocator>,
    root: PhysAddr,
    tables: BTreeSet<PhysAddr>,
}

impl PageTableMemory {
    pub fn new(allocator: Arc<dyn FrameAllocator>) -> HvResult<Self> {
        let root = allocator.alloc_zeroed_page()?;
        let mut tables = BTreeSet::new();
        tables.insert(root);
        Ok(Self {
            allocator,
            root,
            tables,
        })
    }

    pub fn root(&self) -> PhysAddr {
        self.root
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Whether `base` is a table of this hierarchy.
    pub fn owns(&self, base: PhysAddr) -> bool {
        self.tables.contains(&base)
    }

    pub fn alloc_table(&mut self) -> PagingResult<PhysAddr> {
        let base = self
            .allocator
            .alloc_zeroed_page()
            .map_err(|_| PagingError::NoMemory)?;
        debug_assert!(is_aligned(base));
        debug!("allocate translation table {:#x}", base);
        self.tables.insert(base);
        Ok(base)
    }

    /// Return a non-root table to the allocator.
    pub fn dealloc_table(&mut self, base: PhysAddr) -> PagingResult {
        if base == self.root || !self.tables.remove(&base) {
            return Err(PagingError::BadTable);
        }
        debug!("release translation table {:#x}", base);
        unsafe { self.allocator.dealloc_page(base) };
        Ok(())
    }

    pub fn read(&self, base: PhysAddr, index: usize) -> PagingResult<u64> {
        let ptr = self.entry_ptr(base, index)?;
        Ok(unsafe { ptr.read_volatile() })
    }

    pub fn write(&mut self, base: PhysAddr, index: usize, val: u64) -> PagingResult {
        let ptr = self.entry_ptr(base, index)?;
        unsafe { ptr.write_volatile(val) };
        Ok(())
    }

    fn entry_ptr(&self, base: PhysAddr, index: usize) -> PagingResult<*mut u64> {
        if index >= ENTRY_COUNT || !self.owns(base) {
            return Err(PagingError::BadTable);
        }
        let table = self.allocator.phys_to_virt(base) as *mut u64;
        Ok(unsafe { table.add(index) })
    }
}

impl Debug for PageTableMemory {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("PageTableMemory")
            .field("root", &self.root)
            .field("tables", &self.tables.len())
            .finish()
    }
}

impl Drop for PageTableMemory {
    fn drop(&mut self) {
        for base in core::mem::take(&mut self.tables) {
            unsafe { self.allocator.dealloc_page(base) };
        }
    }
}
