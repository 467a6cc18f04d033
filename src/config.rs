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
//! Guest memory-map descriptors.
//!
//! Boards describe each guest as a device list and a memory list. Both are constant arrays
//! terminated by [`MemMapDesc::END`]. The first memory entry is the placeholder of the guest
//! image, patched with the real load address and size when the VM is created.
use alloc::vec::Vec;

use crate::arch::aarch64::MemAttr;
use crate::error::HvResult;
use crate::memory::{GuestPhysAddr, MemoryRegion, PhysAddr};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemMapDesc {
    pub label: &'static str,
    pub ipa: GuestPhysAddr,
    pub pa: PhysAddr,
    pub size: usize,
    pub attr: MemAttr,
}

impl MemMapDesc {
    /// List terminator.
    pub const END: Self = Self::new("", 0, 0, 0, MemAttr::SO);

    pub const fn new(
        label: &'static str,
        ipa: GuestPhysAddr,
        pa: PhysAddr,
        size: usize,
        attr: MemAttr,
    ) -> Self {
        Self {
            label,
            ipa,
            pa,
            size,
            attr,
        }
    }

    pub fn is_end(&self) -> bool {
        self.label.is_empty() && self.ipa == 0 && self.pa == 0 && self.size == 0
    }
}

/// Entries of a sentinel-terminated list, without the sentinel.
pub fn entries(list: &[MemMapDesc]) -> HvResult<&[MemMapDesc]> {
    match list.iter().position(MemMapDesc::is_end) {
        Some(n) => Ok(&list[..n]),
        None => hv_result_err!(EINVAL, "memory map without terminator"),
    }
}

/// Memory map of one guest.
#[derive(Debug, Clone)]
pub struct GuestMemoryMap {
    pub devices: Vec<MemMapDesc>,
    pub memory: Vec<MemMapDesc>,
}

impl GuestMemoryMap {
    pub fn from_lists(devices: &[MemMapDesc], memory: &[MemMapDesc]) -> HvResult<Self> {
        Ok(Self {
            devices: entries(devices)?.to_vec(),
            memory: entries(memory)?.to_vec(),
        })
    }

    /// Point the image placeholder at the loaded guest image.
    pub fn patch_image(&mut self, base: PhysAddr, size: usize) -> HvResult {
        match self.memory.first_mut() {
            Some(image) => {
                debug!(
                    "guest image {:?}: {:#x} -> {:#x}, size {:#x}",
                    image.label, image.ipa, base, size
                );
                image.pa = base;
                image.size = size;
                Ok(())
            }
            None => hv_result_err!(EINVAL, "memory map has no image entry"),
        }
    }

    /// Device regions followed by memory regions.
    pub fn regions(&self) -> Vec<MemoryRegion> {
        self.devices
            .iter()
            .chain(self.memory.iter())
            .map(MemoryRegion::from)
            .collect()
    }
}
