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
//! Stage 2 (IPA to PA) translation tables of one guest.
//!
//! The root is a level 1 table covering the 39-bit IPA space. Level 2 and level 3 tables are
//! allocated on demand by [`Stage2PageTable::walk_create`] and linked *hidden* (`valid = 0,
//! table = 0`), so the hardware walker cannot reach a half-built sub-tree. The caller enables
//! the links once everything below them is in place.
//!
//! Operations that take a live translation away return a [`Stage2Invalidation`]; TLB
//! maintenance is left to the caller.
use alloc::{sync::Arc, vec::Vec};
use core::fmt;
use core::ops::Range;

use aarch64_cpu::registers::VTTBR_EL2;
use tock_registers::interfaces::Writeable;

use super::level::{DescriptorKind, Level, Stage, TTBL_L3_OUTADDR_MASK};
use super::lpae::{Descriptor, LeafAttr, MemAttr};
use crate::consts::{ENTRY_COUNT, IPA_BITS};
use crate::error::HvResult;
use crate::memory::{
    FrameAllocator, GuestPhysAddr, PageSize, PageTableMemory, PagingError, PagingInstr,
    PagingResult, PhysAddr, PAGE_SIZE,
};

pub type Vmid = u8;

/// Location of one descriptor in a hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    /// Physical address of the table holding the entry.
    pub table: PhysAddr,
    pub index: usize,
    pub level: Level,
    /// First IPA translated by the entry.
    pub base: GuestPhysAddr,
}

impl EntryRef {
    pub fn range(&self) -> Range<GuestPhysAddr> {
        self.base..self.base + self.level.entry_size() as usize
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WalkResult {
    pub entry: EntryRef,
    pub desc: Descriptor,
}

impl WalkResult {
    pub fn is_valid(&self) -> bool {
        self.desc.is_valid()
    }
}

/// IPA range of one guest whose cached translations went stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage2Invalidation {
    pub vmid: Vmid,
    pub ipa: Range<GuestPhysAddr>,
}

impl Stage2Invalidation {
    /// Smallest range covering both invalidations of the same guest.
    pub fn merge(self, other: Self) -> Self {
        debug_assert_eq!(self.vmid, other.vmid);
        Self {
            vmid: self.vmid,
            ipa: self.ipa.start.min(other.ipa.start)..self.ipa.end.max(other.ipa.end),
        }
    }

    /// Must run with the guest's VTTBR loaded.
    pub fn flush(&self) {
        if self.ipa.len() == PAGE_SIZE {
            S2PTInstr::flush(Some(self.ipa.start));
        } else {
            S2PTInstr::flush(None);
        }
    }
}

/// One valid leaf reachable by the hardware walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub ipa: GuestPhysAddr,
    pub pa: PhysAddr,
    pub attr: MemAttr,
    pub size: PageSize,
}

/// VTTBR_EL2 value: VMID in bits [55:48], base address in bits [39:12].
pub const fn vttbr_value(vmid: Vmid, root: PhysAddr) -> u64 {
    ((vmid as u64) << 48) | (root as u64 & TTBL_L3_OUTADDR_MASK)
}

fn check_ipa(ipa: GuestPhysAddr) -> PagingResult {
    if ipa >> IPA_BITS != 0 {
        Err(PagingError::OutOfRange)
    } else {
        Ok(())
    }
}

pub struct Stage2PageTable {
    vmid: Vmid,
    mem: PageTableMemory,
}

impl Stage2PageTable {
    pub fn new(vmid: Vmid, allocator: Arc<dyn FrameAllocator>) -> HvResult<Self> {
        let mem = PageTableMemory::new(allocator)?;
        debug!("vm {}: stage 2 root table {:#x}", vmid, mem.root());
        Ok(Self { vmid, mem })
    }

    pub fn vmid(&self) -> Vmid {
        self.vmid
    }

    pub fn root_paddr(&self) -> PhysAddr {
        self.mem.root()
    }

    /// Number of tables, root included.
    pub fn table_count(&self) -> usize {
        self.mem.table_count()
    }

    pub fn vttbr(&self) -> u64 {
        vttbr_value(self.vmid, self.root_paddr())
    }

    /// # Safety
    ///
    /// Must not be called while another guest's translations are in use on this CPU.
    pub unsafe fn activate(&self) {
        S2PTInstr::activate(self.vttbr());
    }

    fn invalidation(&self, entry: &EntryRef) -> Stage2Invalidation {
        Stage2Invalidation {
            vmid: self.vmid,
            ipa: entry.range(),
        }
    }

    fn root_entry(&self, ipa: GuestPhysAddr) -> EntryRef {
        EntryRef {
            table: self.root_paddr(),
            index: Level::L1.index_of(ipa),
            level: Level::L1,
            base: Level::L1.align_down(ipa),
        }
    }

    fn child_entry(parent: &EntryRef, table: PhysAddr, ipa: GuestPhysAddr) -> Option<EntryRef> {
        let level = parent.level.next()?;
        Some(EntryRef {
            table,
            index: level.index_of(ipa),
            level,
            base: level.align_down(ipa),
        })
    }

    pub fn read(&self, entry: &EntryRef) -> PagingResult<Descriptor> {
        self.mem
            .read(entry.table, entry.index)
            .map(Descriptor::from_bits)
    }

    fn write(&mut self, entry: &EntryRef, desc: Descriptor) -> PagingResult {
        self.mem.write(entry.table, entry.index, desc.bits())
    }

    /// Next-level table an entry links to, whether the link is live, hidden or disabled.
    fn link_target(&self, entry: &EntryRef, desc: Descriptor) -> Option<PhysAddr> {
        if entry.level == Level::L3 || desc.is_unused() || (desc.is_valid() && !desc.is_table()) {
            return None;
        }
        let next = desc.table_addr(entry.level);
        self.mem.owns(next).then_some(next)
    }

    /// Link the table at `child` below `parent`. A hidden link (`valid == false`) has both the
    /// valid and the table bit clear.
    pub fn install_table(&mut self, parent: &EntryRef, child: PhysAddr, valid: bool) -> PagingResult {
        if !self.mem.owns(child) || child == self.root_paddr() {
            return Err(PagingError::BadTable);
        }
        let mut desc = Descriptor::make_table(parent.level, child, Stage::Guest)?;
        if !valid {
            desc.set_valid(false);
            desc.set_table_bit(false);
        }
        self.write(parent, desc)
    }

    /// Make the sub-tree below `parent` reachable.
    pub fn enable_subtree(&mut self, parent: &EntryRef) -> PagingResult<Stage2Invalidation> {
        let mut desc = self.read(parent)?;
        if self.link_target(parent, desc).is_none() {
            return Err(PagingError::BadTable);
        }
        desc.set_valid(true);
        desc.set_table_bit(true);
        self.write(parent, desc)?;
        debug!("vm {}: enable sub-tree {:#x?}", self.vmid, parent.range());
        Ok(self.invalidation(parent))
    }

    /// Make the sub-tree below `parent` unreachable; its tables are kept.
    pub fn disable_subtree(&mut self, parent: &EntryRef) -> PagingResult<Stage2Invalidation> {
        let mut desc = self.read(parent)?;
        if self.link_target(parent, desc).is_none() {
            return Err(PagingError::BadTable);
        }
        desc.set_valid(false);
        self.write(parent, desc)?;
        debug!("vm {}: disable sub-tree {:#x?}", self.vmid, parent.range());
        Ok(self.invalidation(parent))
    }

    /// Write a valid level 3 page: read/write, non-shareable, executable.
    pub fn map_page(&mut self, leaf: &EntryRef, pa: PhysAddr, attr: MemAttr) -> PagingResult {
        if leaf.level != Level::L3 {
            return Err(PagingError::InvalidLevel);
        }
        let desc = Descriptor::make_page(pa, LeafAttr::Guest(attr), true)?;
        trace!("vm {}: map {:#x} -> {:#x}", self.vmid, leaf.base, pa);
        self.write(leaf, desc)
    }

    /// Write a valid level 1 or level 2 block into an unused entry.
    pub fn map_block(&mut self, entry: &EntryRef, pa: PhysAddr, attr: MemAttr) -> PagingResult {
        if !self.read(entry)?.is_unused() {
            return Err(PagingError::AlreadyMapped);
        }
        let desc = Descriptor::make_block(entry.level, pa, LeafAttr::Guest(attr))?;
        trace!("vm {}: map block {:#x} -> {:#x}", self.vmid, entry.base, pa);
        self.write(entry, desc)
    }

    pub fn unmap_page(&mut self, leaf: &EntryRef) -> PagingResult<Stage2Invalidation> {
        if leaf.level != Level::L3 {
            return Err(PagingError::InvalidLevel);
        }
        if self.read(leaf)?.is_unused() {
            return Err(PagingError::NotMapped);
        }
        trace!("vm {}: unmap {:#x}", self.vmid, leaf.base);
        self.write(leaf, Descriptor::empty())?;
        Ok(self.invalidation(leaf))
    }

    /// Descend as the hardware walker would: only valid table descriptors are followed. Stops
    /// at the first block or page, or at an invalid entry.
    pub fn walk(&self, ipa: GuestPhysAddr) -> PagingResult<WalkResult> {
        check_ipa(ipa)?;
        let mut entry = self.root_entry(ipa);
        loop {
            let desc = self.read(&entry)?;
            if entry.level == Level::L3 || !desc.is_valid() || !desc.is_table() {
                return if entry.level != Level::L3 && !desc.is_valid() {
                    Err(PagingError::NotMapped)
                } else {
                    Ok(WalkResult { entry, desc })
                };
            }
            let next = desc.table_addr(entry.level);
            if !self.mem.owns(next) {
                return Err(PagingError::BadTable);
            }
            entry = Self::child_entry(&entry, next, ipa).ok_or(PagingError::InvalidLevel)?;
        }
    }

    /// Locate the level 3 entry of `ipa` through every link, live or not.
    pub fn entry(&self, ipa: GuestPhysAddr) -> PagingResult<WalkResult> {
        check_ipa(ipa)?;
        let mut entry = self.root_entry(ipa);
        loop {
            let desc = self.read(&entry)?;
            if entry.level == Level::L3 {
                return Ok(WalkResult { entry, desc });
            }
            if desc.is_valid() && !desc.is_table() {
                return Err(PagingError::MappedToHugePage);
            }
            let next = self.link_target(&entry, desc).ok_or(PagingError::NotMapped)?;
            entry = Self::child_entry(&entry, next, ipa).ok_or(PagingError::InvalidLevel)?;
        }
    }

    /// Locate the level 3 entry of `ipa`, allocating missing tables on the way.
    ///
    /// New tables are linked hidden. Every hidden link passed or created is appended to
    /// `linked` (once), in walk order. Disabled links are followed but left alone.
    pub fn walk_create(
        &mut self,
        ipa: GuestPhysAddr,
        linked: &mut Vec<EntryRef>,
    ) -> PagingResult<WalkResult> {
        check_ipa(ipa)?;
        let mut entry = self.root_entry(ipa);
        loop {
            let desc = self.read(&entry)?;
            if entry.level == Level::L3 {
                return Ok(WalkResult { entry, desc });
            }
            let next = if desc.is_unused() {
                let table = self.mem.alloc_table()?;
                self.install_table(&entry, table, false)?;
                linked.push(entry);
                table
            } else if desc.is_valid() && !desc.is_table() {
                return Err(PagingError::MappedToHugePage);
            } else {
                let table = self
                    .link_target(&entry, desc)
                    .ok_or(PagingError::MappedToHugePage)?;
                if !desc.is_valid() && !desc.is_table() && !linked.contains(&entry) {
                    linked.push(entry);
                }
                table
            };
            entry = Self::child_entry(&entry, next, ipa).ok_or(PagingError::InvalidLevel)?;
        }
    }

    /// Output address, attribute and granule of the translation of `ipa`.
    pub fn query(&self, ipa: GuestPhysAddr) -> PagingResult<(PhysAddr, MemAttr, PageSize)> {
        let WalkResult { entry, desc } = self.walk(ipa)?;
        if desc.kind(entry.level).is_none() {
            return Err(PagingError::NotMapped);
        }
        let size = entry.level.entry_size();
        let pa = desc.output_addr(entry.level) + size.page_offset(ipa);
        Ok((pa, desc.mem_attr(), size))
    }

    /// Every valid leaf reachable from the root, in IPA order.
    pub fn mappings(&self) -> Vec<Mapping> {
        let mut out = Vec::new();
        self.collect_mappings(self.root_paddr(), Level::L1, 0, &mut out);
        out
    }

    fn collect_mappings(
        &self,
        table: PhysAddr,
        level: Level,
        base: GuestPhysAddr,
        out: &mut Vec<Mapping>,
    ) {
        for index in 0..ENTRY_COUNT {
            let entry = EntryRef {
                table,
                index,
                level,
                base: base + (index << level.shift()),
            };
            let desc = match self.read(&entry) {
                Ok(desc) if desc.is_valid() => desc,
                _ => continue,
            };
            match desc.kind(level) {
                Some(DescriptorKind::Table) => {
                    let next = desc.table_addr(level);
                    if let (true, Some(child)) = (self.mem.owns(next), level.next()) {
                        self.collect_mappings(next, child, entry.base, out);
                    }
                }
                Some(_) => out.push(Mapping {
                    ipa: entry.base,
                    pa: desc.output_addr(level),
                    attr: desc.mem_attr(),
                    size: level.entry_size(),
                }),
                None => {}
            }
        }
    }

    /// Release every table below the root, hidden and disabled sub-trees included, and clear
    /// the root. Returns the number of tables released.
    pub fn teardown(&mut self) -> usize {
        let root = self.root_paddr();
        let mut released = 0;
        for index in 0..ENTRY_COUNT {
            let entry = EntryRef {
                table: root,
                index,
                level: Level::L1,
                base: index << Level::L1.shift(),
            };
            let desc = match self.read(&entry) {
                Ok(desc) if !desc.is_unused() => desc,
                _ => continue,
            };
            if let Some(child) = self.link_target(&entry, desc) {
                released += self.release(child, Level::L2);
            }
            if let Err(e) = self.write(&entry, Descriptor::empty()) {
                warn!("vm {}: cannot clear root entry {}: {:?}", self.vmid, index, e);
            }
        }
        info!("vm {}: released {} stage 2 tables", self.vmid, released);
        released
    }

    fn release(&mut self, table: PhysAddr, level: Level) -> usize {
        let mut released = 0;
        if level != Level::L3 {
            for index in 0..ENTRY_COUNT {
                let entry = EntryRef {
                    table,
                    index,
                    level,
                    base: 0,
                };
                let child = self
                    .read(&entry)
                    .ok()
                    .and_then(|desc| self.link_target(&entry, desc));
                if let (Some(child), Some(next)) = (child, level.next()) {
                    released += self.release(child, next);
                }
            }
        }
        match self.mem.dealloc_table(table) {
            Ok(()) => released + 1,
            Err(e) => {
                warn!("vm {}: cannot release table {:#x}: {:?}", self.vmid, table, e);
                released
            }
        }
    }
}

impl fmt::Debug for Stage2PageTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stage2PageTable")
            .field("vmid", &self.vmid)
            .field("vttbr", &format_args!("{:#x}", self.vttbr()))
            .field("mem", &self.mem)
            .finish()
    }
}

pub struct S2PTInstr;

impl PagingInstr for S2PTInstr {
    unsafe fn activate(ttbr: u64) {
        VTTBR_EL2.set(ttbr);
        #[cfg(target_arch = "aarch64")]
        core::arch::asm!("isb");
    }

    fn flush(ipa: Option<usize>) {
        #[cfg(target_arch = "aarch64")]
        unsafe {
            match ipa {
                Some(ipa) => core::arch::asm!(
                    "dsb ishst",
                    "tlbi ipas2e1is, {0}",
                    "dsb ish",
                    "tlbi vmalle1is",
                    "dsb ish",
                    "isb",
                    in(reg) ipa >> 12,
                ),
                None => core::arch::asm!("dsb ishst", "tlbi vmalls12e1is", "dsb ish", "isb"),
            }
        }
        #[cfg(not(target_arch = "aarch64"))]
        let _ = ipa;
    }
}
