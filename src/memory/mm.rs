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
use alloc::{collections::btree_map::Entry, collections::BTreeMap, sync::Arc, vec::Vec};
use core::fmt::{Debug, Formatter, Result};

use super::addr::{is_aligned, page_count, GuestPhysAddr, PhysAddr};
use super::{FrameAllocator, PageSize, PagingError, PagingResult, PAGE_SIZE};
use crate::arch::aarch64::s2pt::{EntryRef, Stage2Invalidation, Vmid};
use crate::arch::aarch64::{MemAttr, Stage2PageTable};
use crate::config::{self, MemMapDesc};
use crate::consts::{IPA_BITS, PA_BITS};
use crate::error::HvResult;

/// A guest region mapped page by page: `start + k * 4K -> paddr + k * 4K`.
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    pub label: &'static str,
    pub start: GuestPhysAddr,
    pub paddr: PhysAddr,
    pub size: usize,
    pub attr: MemAttr,
}

pub struct MemorySet {
    regions: BTreeMap<GuestPhysAddr, MemoryRegion>,
    pt: Stage2PageTable,
    /// Live translations removed by a failed install, not yet flushed.
    stale: Option<Stage2Invalidation>,
}

impl MemoryRegion {
    pub fn new(
        label: &'static str,
        start: GuestPhysAddr,
        paddr: PhysAddr,
        size: usize,
        attr: MemAttr,
    ) -> Self {
        Self {
            label,
            start,
            paddr,
            size,
            attr,
        }
    }

    /// Pages mapped for this region; an empty region still maps one.
    pub fn page_count(&self) -> usize {
        page_count(self.size)
    }

    pub fn end(&self) -> GuestPhysAddr {
        self.start + self.page_count() * PAGE_SIZE
    }

    /// Test whether this region is overlap with `other`.
    fn is_overlap_with(&self, other: &Self) -> bool {
        !(self.end() <= other.start || self.start >= other.end())
    }

    fn validate(&self) -> HvResult {
        if !is_aligned(self.start) || !is_aligned(self.paddr) {
            return hv_result_err!(EINVAL, format!("{:#x?} is not page aligned", self));
        }
        let len = self.page_count().checked_mul(PAGE_SIZE);
        let in_range = |base: usize, bits: usize| {
            len.and_then(|len| base.checked_add(len))
                .is_some_and(|end| end <= 1 << bits)
        };
        if !in_range(self.start, IPA_BITS) || !in_range(self.paddr, PA_BITS) {
            return hv_result_err!(EINVAL, format!("{:#x?} is out of range", self));
        }
        Ok(())
    }
}

impl From<&MemMapDesc> for MemoryRegion {
    fn from(desc: &MemMapDesc) -> Self {
        Self::new(desc.label, desc.ipa, desc.pa, desc.size, desc.attr)
    }
}

impl MemorySet {
    pub fn new(vmid: Vmid, allocator: Arc<dyn FrameAllocator>) -> HvResult<Self> {
        Ok(Self {
            regions: BTreeMap::new(),
            pt: Stage2PageTable::new(vmid, allocator)?,
            stale: None,
        })
    }

    pub fn vmid(&self) -> Vmid {
        self.pt.vmid()
    }

    pub fn page_table(&self) -> &Stage2PageTable {
        &self.pt
    }

    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.values()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    fn test_free_area(&self, other: &MemoryRegion) -> bool {
        if let Some((_, before)) = self.regions.range(..other.start).last() {
            if before.is_overlap_with(other) {
                return false;
            }
        }
        if let Some((_, after)) = self.regions.range(other.start..).next() {
            if after.is_overlap_with(other) {
                return false;
            }
        }
        true
    }

    /// Invalidation owed for live pages that a failed install wrote and cleared again.
    pub fn take_invalidation(&mut self) -> Option<Stage2Invalidation> {
        self.stale.take()
    }

    /// Add a memory region to this set.
    pub fn insert(&mut self, region: MemoryRegion) -> HvResult {
        self.insert_all(&[region])
    }

    /// Add several regions. Nothing is mapped unless all of them are well formed and overlap
    /// neither each other nor the installed regions.
    pub fn insert_all(&mut self, regions: &[MemoryRegion]) -> HvResult {
        for (i, region) in regions.iter().enumerate() {
            region.validate()?;
            let clash = regions[..i].iter().find(|r| r.is_overlap_with(region));
            if clash.is_some() || !self.test_free_area(region) {
                warn!(
                    "MemoryRegion overlapped in MemorySet: {:#x?}\n{:#x?}",
                    region, self
                );
                return hv_result_err!(EINVAL);
            }
        }
        for region in regions {
            self.map_region(region)?;
            self.regions.insert(region.start, region.clone());
        }
        Ok(())
    }

    /// Install sentinel-terminated descriptor lists, e.g. a guest's device and memory lists.
    pub fn install_memmap(&mut self, lists: &[&[MemMapDesc]]) -> HvResult {
        let mut regions = Vec::new();
        for list in lists {
            regions.extend(config::entries(list)?.iter().map(MemoryRegion::from));
        }
        info!("vm {}: install {} regions", self.vmid(), regions.len());
        self.insert_all(&regions)
    }

    /// Map every page of `region` below hidden links, then enable the new links deepest
    /// first. On failure the pages already written for the region are cleared again; those
    /// that were reachable are recorded for [`MemorySet::take_invalidation`].
    fn map_region(&mut self, region: &MemoryRegion) -> HvResult {
        debug!("vm {}: map {:#x?}", self.vmid(), region);
        let mut linked = Vec::new();
        let mut mapped: Vec<EntryRef> = Vec::with_capacity(region.page_count());
        for k in 0..region.page_count() {
            let ipa = region.start + k * PAGE_SIZE;
            let res = self.pt.walk_create(ipa, &mut linked).and_then(|leaf| {
                if leaf.is_valid() {
                    return Err(PagingError::AlreadyMapped);
                }
                self.pt
                    .map_page(&leaf.entry, region.paddr + k * PAGE_SIZE, region.attr)
                    .map(|_| leaf.entry)
            });
            match res {
                Ok(leaf) => mapped.push(leaf),
                Err(e) => {
                    warn!("vm {}: mapping {:#x} failed: {:?}", self.vmid(), ipa, e);
                    self.rollback(&mapped);
                    return Err(e.into());
                }
            }
        }
        for link in linked.iter().rev() {
            self.pt.enable_subtree(link)?;
        }
        Ok(())
    }

    fn rollback(&mut self, mapped: &[EntryRef]) {
        for leaf in mapped {
            let live = self.pt.query(leaf.base).is_ok();
            match self.pt.unmap_page(leaf) {
                Ok(inv) if live => {
                    self.stale = Some(match self.stale.take() {
                        Some(prev) => prev.merge(inv),
                        None => inv,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(
                    "vm {}: cannot roll back {:#x}: {:?}",
                    self.vmid(),
                    leaf.base,
                    e
                ),
            }
        }
    }

    /// Find and remove memory region which starts from `start`.
    pub fn delete(&mut self, start: GuestPhysAddr) -> HvResult<Stage2Invalidation> {
        if let Entry::Occupied(e) = self.regions.entry(start) {
            let region = e.remove();
            let mut inv = Stage2Invalidation {
                vmid: self.pt.vmid(),
                ipa: region.start..region.start,
            };
            for k in 0..region.page_count() {
                let leaf = self.pt.entry(region.start + k * PAGE_SIZE)?;
                inv = inv.merge(self.pt.unmap_page(&leaf.entry)?);
            }
            debug!("vm {}: removed {:#x?}", self.vmid(), region);
            Ok(inv)
        } else {
            hv_result_err!(
                EINVAL,
                format!(
                    "MemorySet::delete(): no memory region starts from {:#x?}",
                    start
                )
            )
        }
    }

    /// Drop every region and release every table below the root.
    pub fn clear(&mut self) {
        self.regions.clear();
        self.stale = None;
        self.pt.teardown();
    }

    /// # Safety
    ///
    /// See [`Stage2PageTable::activate`].
    pub unsafe fn activate(&self) {
        self.pt.activate();
    }

    pub fn page_table_query(
        &self,
        ipa: GuestPhysAddr,
    ) -> PagingResult<(PhysAddr, MemAttr, PageSize)> {
        self.pt.query(ipa)
    }

    pub fn translate(&self, ipa: GuestPhysAddr) -> HvResult<PhysAddr> {
        Ok(self.page_table_query(ipa)?.0)
    }
}

impl Debug for MemoryRegion {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("MemoryRegion")
            .field("label", &self.label)
            .field("ipa_range", &(self.start..self.start.wrapping_add(self.size)))
            .field("paddr", &self.paddr)
            .field("attr", &self.attr)
            .finish()
    }
}

impl Debug for MemorySet {
    fn fmt(&self, f: &mut Formatter) -> Result {
        f.debug_struct("MemorySet")
            .field("regions", &self.regions.values())
            .field("page_table", &self.pt)
            .finish()
    }
}

impl Drop for MemorySet {
    fn drop(&mut self) {
        debug!("Drop {:#x?}", self);
        self.clear();
    }
}

#[cfg(test)]
mod tests;
