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
//! The hypervisor's own stage 1 (EL2) translation tables.
use alloc::sync::Arc;
use core::fmt;

use aarch64_cpu::registers::{MAIR_EL2, TTBR0_EL2};
use numeric_enum_macro::numeric_enum;
use tock_registers::interfaces::Writeable;

use super::level::{Level, Stage, TTBL_L3_OUTADDR_MASK};
use super::lpae::{Descriptor, LeafAttr};
use crate::consts::IPA_BITS;
use crate::error::HvResult;
use crate::memory::{
    FrameAllocator, PageSize, PageTableMemory, PagingError, PagingInstr, PagingResult, PhysAddr,
    VirtAddr,
};

numeric_enum! {
    #[repr(u8)]
    /// MAIR_EL2 slot used by a host mapping, see [`init_mair`].
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum HostMemType {
        Device = 0,
        Normal = 1,
        NormalNonCacheable = 2,
    }
}

impl HostMemType {
    fn leaf_attr(self) -> LeafAttr {
        LeafAttr::Host {
            attr_index: self as u8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HostRegion {
    pub vaddr: VirtAddr,
    pub paddr: PhysAddr,
    pub size: usize,
    pub mem_type: HostMemType,
}

pub struct Stage1PageTable {
    mem: PageTableMemory,
}

impl Stage1PageTable {
    pub fn new(allocator: Arc<dyn FrameAllocator>) -> HvResult<Self> {
        Ok(Self {
            mem: PageTableMemory::new(allocator)?,
        })
    }

    pub fn root_paddr(&self) -> PhysAddr {
        self.mem.root()
    }

    pub fn table_count(&self) -> usize {
        self.mem.table_count()
    }

    /// # Safety
    ///
    /// Every address the hypervisor is running from must be mapped.
    pub unsafe fn activate(&self) {
        init_mair();
        S1PTInstr::activate(self.root_paddr() as u64 & TTBL_L3_OUTADDR_MASK);
    }

    /// Map `[vaddr, vaddr + size)` to `paddr`, using the largest block both addresses are
    /// aligned to at every step.
    pub fn map_region(&mut self, region: &HostRegion) -> PagingResult {
        let HostRegion {
            mut vaddr,
            mut paddr,
            size,
            mem_type,
        } = *region;
        if !PageSize::Size4K.is_aligned(vaddr | paddr | size) {
            return Err(PagingError::Misaligned);
        }
        let end = vaddr.checked_add(size).ok_or(PagingError::OutOfRange)?;
        if end > 1 << IPA_BITS {
            return Err(PagingError::OutOfRange);
        }
        debug!("host map {:#x?} -> {:#x}, {:?}", vaddr..end, paddr, mem_type);
        while vaddr < end {
            let remaining = end - vaddr;
            let level = [Level::L1, Level::L2]
                .into_iter()
                .find(|level| {
                    level.is_aligned(vaddr | paddr) && remaining >= level.entry_size() as usize
                })
                .unwrap_or(Level::L3);
            self.map_leaf(vaddr, paddr, level, mem_type)?;
            let step = level.entry_size() as usize;
            vaddr += step;
            paddr += step;
        }
        Ok(())
    }

    fn map_leaf(
        &mut self,
        vaddr: VirtAddr,
        paddr: PhysAddr,
        target: Level,
        mem_type: HostMemType,
    ) -> PagingResult {
        let mut table = self.mem.root();
        let mut level = Level::L1;
        while level != target {
            let index = level.index_of(vaddr);
            let desc = Descriptor::from_bits(self.mem.read(table, index)?);
            table = if desc.is_unused() {
                let next = self.mem.alloc_table()?;
                let link = Descriptor::make_table(level, next, Stage::Host)?;
                self.mem.write(table, index, link.bits())?;
                next
            } else if desc.is_valid() && desc.is_table() {
                desc.table_addr(level)
            } else {
                return Err(PagingError::MappedToHugePage);
            };
            level = level.next().ok_or(PagingError::InvalidLevel)?;
        }
        let index = level.index_of(vaddr);
        if self.mem.read(table, index)? != 0 {
            return Err(PagingError::AlreadyMapped);
        }
        let desc = match level {
            Level::L3 => Descriptor::make_page(paddr, mem_type.leaf_attr(), true)?,
            _ => Descriptor::make_block(level, paddr, mem_type.leaf_attr())?,
        };
        trace!("host map {:#x} -> {:#x} ({:?})", vaddr, paddr, level);
        self.mem.write(table, index, desc.bits())
    }

    /// Find the leaf translating `vaddr`: its table, index and level.
    fn find_leaf(&self, vaddr: VirtAddr) -> PagingResult<(PhysAddr, usize, Level)> {
        if vaddr >> IPA_BITS != 0 {
            return Err(PagingError::OutOfRange);
        }
        let mut table = self.mem.root();
        let mut level = Level::L1;
        loop {
            let index = level.index_of(vaddr);
            let desc = Descriptor::from_bits(self.mem.read(table, index)?);
            if level == Level::L3 || (desc.is_valid() && !desc.is_table()) {
                return Ok((table, index, level));
            }
            if !desc.is_valid() {
                return Err(PagingError::NotMapped);
            }
            table = desc.table_addr(level);
            level = level.next().ok_or(PagingError::InvalidLevel)?;
        }
    }

    /// Clear the valid bit of the level 3 page holding `vaddr`.
    pub fn disable_page(&mut self, vaddr: VirtAddr) -> PagingResult {
        let (table, index, level) = self.find_leaf(vaddr)?;
        if level != Level::L3 {
            return Err(PagingError::MappedToHugePage);
        }
        let mut desc = Descriptor::from_bits(self.mem.read(table, index)?);
        if !desc.is_valid() {
            return Err(PagingError::NotMapped);
        }
        desc.set_valid(false);
        self.mem.write(table, index, desc.bits())?;
        S1PTInstr::flush(Some(vaddr));
        Ok(())
    }

    /// Output address, MAIR slot and granule of the translation of `vaddr`.
    pub fn query(&self, vaddr: VirtAddr) -> PagingResult<(PhysAddr, u8, PageSize)> {
        let (table, index, level) = self.find_leaf(vaddr)?;
        let desc = Descriptor::from_bits(self.mem.read(table, index)?);
        if !desc.is_valid() {
            return Err(PagingError::NotMapped);
        }
        let size = level.entry_size();
        Ok((
            desc.output_addr(level) + size.page_offset(vaddr),
            desc.attr_index(),
            size,
        ))
    }
}

impl fmt::Debug for Stage1PageTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stage1PageTable")
            .field("mem", &self.mem)
            .finish()
    }
}

/// Build the hypervisor's table set from the board's host regions.
pub fn build_host_page_table(
    allocator: Arc<dyn FrameAllocator>,
    regions: &[HostRegion],
) -> HvResult<Stage1PageTable> {
    let mut pt = Stage1PageTable::new(allocator)?;
    for region in regions {
        pt.map_region(region)?;
    }
    info!(
        "host page table built: root {:#x}, {} tables",
        pt.root_paddr(),
        pt.table_count()
    );
    Ok(pt)
}

/// Attr0 Device-nGnRnE, Attr1 Normal write-back, Attr2 Normal non-cacheable.
const MAIR_FLAG: u64 = 0x0044_ff00;

/// Program the MAIR_EL2 slots named by [`HostMemType`].
pub fn init_mair() {
    MAIR_EL2.set(MAIR_FLAG);
}

pub struct S1PTInstr;

impl PagingInstr for S1PTInstr {
    unsafe fn activate(ttbr: u64) {
        TTBR0_EL2.set(ttbr);
        #[cfg(target_arch = "aarch64")]
        core::arch::asm!("isb");
    }

    fn flush(vaddr: Option<usize>) {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            match vaddr {
                Some(vaddr) => core::arch::asm!(
                    "dsb ishst",
                    "tlbi vae2is, {0}",
                    "dsb ish",
                    "isb",
                    in(reg) vaddr >> 12,
                ),
                None => core::arch::asm!("dsb ishst", "tlbi alle2is", "dsb ish", "isb"),
            }
        }
        #[cfg(not(target_arch = "aarch64"))]
        let _ = vaddr;
    }
}
