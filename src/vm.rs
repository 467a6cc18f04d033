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
use alloc::{collections::BTreeMap, sync::Arc};
use numeric_enum_macro::numeric_enum;
use spin::{Mutex, RwLock};

use crate::arch::aarch64::s2pt::Vmid;
use crate::config::GuestMemoryMap;
use crate::consts::MAX_VMID;
use crate::error::HvResult;
use crate::memory::{FrameAllocator, GuestPhysAddr, MemorySet, PhysAddr};
use crate::platform;

numeric_enum! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum VmState {
        Undefined = 0,
        Defined = 1,
        Scheduling = 2,
    }
}

pub struct Vm {
    pub vmid: Vmid,
    state: VmState,
    pub gpm: MemorySet,
}

impl Vm {
    pub fn new(vmid: Vmid, allocator: Arc<dyn FrameAllocator>) -> HvResult<Self> {
        Ok(Self {
            vmid,
            state: VmState::Undefined,
            gpm: MemorySet::new(vmid, allocator)?,
        })
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn vttbr(&self) -> u64 {
        self.gpm.page_table().vttbr()
    }

    fn transition(&mut self, from: VmState, to: VmState) -> HvResult<VmState> {
        if self.state != from {
            return hv_result_err!(
                EPERM,
                format!("vm {}: {:?} -> {:?} from {:?}", self.vmid, from, to, self.state)
            );
        }
        info!("vm {}: {:?} -> {:?}", self.vmid, from, to);
        self.state = to;
        Ok(to)
    }
}

/// Registry of the guests and the frames their tables come from.
pub struct VmList {
    vms: RwLock<BTreeMap<Vmid, Arc<RwLock<Vm>>>>,
    allocator: Arc<dyn FrameAllocator>,
    next_vmid: Mutex<usize>,
}

impl VmList {
    pub fn new(allocator: Arc<dyn FrameAllocator>) -> Self {
        Self {
            vms: RwLock::new(BTreeMap::new()),
            allocator,
            next_vmid: Mutex::new(0),
        }
    }

    pub fn vm_count(&self) -> usize {
        self.vms.read().len()
    }

    pub fn find_vm(&self, vmid: Vmid) -> Option<Arc<RwLock<Vm>>> {
        self.vms.read().get(&vmid).cloned()
    }

    /// Next unused vmid, counting up from the last one handed out.
    pub fn get_next_vmid(&self) -> HvResult<Vmid> {
        let vms = self.vms.read();
        let mut next = self.next_vmid.lock();
        for candidate in (*next..MAX_VMID).chain(0..*next) {
            let vmid = candidate as Vmid;
            if !vms.contains_key(&vmid) {
                *next = candidate + 1;
                return Ok(vmid);
            }
        }
        hv_result_err!(ENOMEM, "no free vmid")
    }

    /// Create a guest from `memmap` with the next free vmid.
    pub fn create_vm(
        &self,
        memmap: GuestMemoryMap,
        image_base: PhysAddr,
        image_size: usize,
    ) -> HvResult<Vmid> {
        let vmid = self.get_next_vmid()?;
        self.create_vm_with_id(vmid, memmap, image_base, image_size)?;
        Ok(vmid)
    }

    /// Create the next guest from the board's memory map for its vmid.
    pub fn create_platform_vm(&self, image_base: PhysAddr, image_size: usize) -> HvResult<Vmid> {
        let vmid = self.get_next_vmid()?;
        let memmap = platform::guest_memory_map(vmid)?;
        self.create_vm_with_id(vmid, memmap, image_base, image_size)?;
        Ok(vmid)
    }

    /// Build the stage 2 tables of a new guest and register it. Nothing is registered if any
    /// region fails to install; the tables built so far are released.
    pub fn create_vm_with_id(
        &self,
        vmid: Vmid,
        mut memmap: GuestMemoryMap,
        image_base: PhysAddr,
        image_size: usize,
    ) -> HvResult<Arc<RwLock<Vm>>> {
        let mut vms = self.vms.write();
        if vms.contains_key(&vmid) {
            return hv_result_err!(EEXIST, format!("vm {} already exists", vmid));
        }
        memmap.patch_image(image_base, image_size)?;
        let mut vm = Vm::new(vmid, self.allocator.clone())?;
        if let Err(e) = vm.gpm.insert_all(&memmap.regions()) {
            error!("vm {}: stage 2 memory init failed: {:?}", vmid, e);
            return Err(e);
        }
        vm.transition(VmState::Undefined, VmState::Defined)?;
        info!(
            "vm {} created: {} regions, vttbr {:#x}",
            vmid,
            vm.gpm.region_count(),
            vm.vttbr()
        );
        let vm = Arc::new(RwLock::new(vm));
        vms.insert(vmid, vm.clone());
        Ok(vm)
    }

    /// Unregister a guest and release its tables.
    pub fn delete_vm(&self, vmid: Vmid) -> HvResult<VmState> {
        let vm = match self.vms.write().remove(&vmid) {
            Some(vm) => vm,
            None => return hv_result_err!(ENOENT, format!("vm {} not found", vmid)),
        };
        let mut vm = vm.write();
        vm.gpm.clear();
        vm.state = VmState::Undefined;
        info!("vm {} deleted", vmid);
        Ok(vm.state)
    }

    pub fn start_vm(&self, vmid: Vmid) -> HvResult<VmState> {
        self.vm(vmid)?
            .write()
            .transition(VmState::Defined, VmState::Scheduling)
    }

    pub fn shutdown_vm(&self, vmid: Vmid) -> HvResult<VmState> {
        self.vm(vmid)?
            .write()
            .transition(VmState::Scheduling, VmState::Defined)
    }

    /// Physical address the guest `vmid` reaches at `ipa`.
    pub fn translate(&self, vmid: Vmid, ipa: GuestPhysAddr) -> HvResult<PhysAddr> {
        self.vm(vmid)?.read().gpm.translate(ipa)
    }

    fn vm(&self, vmid: Vmid) -> HvResult<Arc<RwLock<Vm>>> {
        match self.find_vm(vmid) {
            Some(vm) => Ok(vm),
            None => hv_result_err!(ENOENT, format!("vm {} not found", vmid)),
        }
    }
}

#[cfg(test)]
mod tests;
