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
use super::*;
use crate::arch::aarch64::MemAttr;
use crate::config::MemMapDesc;
use crate::memory::frame::test_allocator;
use crate::memory::BitmapFrameAllocator;
use crate::HvErrorNum;

const IMAGE0: PhysAddr = 0x9000_0000;
const IMAGE1: PhysAddr = 0xA000_0000;
const IMAGE_SIZE: usize = 0x1_0000;

fn new_list(pages: usize) -> (Arc<BitmapFrameAllocator>, VmList) {
    let allocator = test_allocator(pages);
    let list = VmList::new(allocator.clone());
    (allocator, list)
}

#[test]
fn test_guest0_sysreg_translation() {
    let (_allocator, list) = new_list(64);
    let vmid = list.create_platform_vm(IMAGE0, IMAGE_SIZE).unwrap();
    assert_eq!(vmid, 0);
    assert_eq!(list.translate(0, 0x1C01_0000).unwrap(), 0x1C01_0000);
    assert_eq!(list.translate(0, 0x1C01_0FFF).unwrap(), 0x1C01_0FFF);
    let err = list.translate(0, 0x1C01_1000).unwrap_err();
    assert_eq!(err.num, HvErrorNum::EFAULT);
}

#[test]
fn test_guest0_device_map() {
    let (_allocator, list) = new_list(64);
    list.create_platform_vm(IMAGE0, IMAGE_SIZE).unwrap();
    // serial0 and serial1 swapped
    assert_eq!(list.translate(0, 0x1C09_0000).unwrap(), 0x1C0A_0000);
    assert_eq!(list.translate(0, 0x1C0A_0000).unwrap(), 0x1C09_0000);
    // GICC backed by the virtual CPU interface
    assert_eq!(list.translate(0, 0x2C00_2000).unwrap(), 0x2C00_6000);
    assert_eq!(list.translate(0, 0x2C00_3FFC).unwrap(), 0x2C00_7FFC);
    assert!(list.translate(0, 0x2C00_4000).is_err());
    assert_eq!(list.translate(0, 0x1A80_0000).unwrap(), 0x1A80_0000);
    assert_eq!(list.translate(0, 0x1BFF_F000).unwrap(), 0x1BFF_F000);
    // guest image
    assert_eq!(list.translate(0, 0x1234).unwrap(), IMAGE0 + 0x1234);
    assert!(list.translate(0, IMAGE_SIZE).is_err());

    let vm = list.find_vm(0).unwrap();
    let vm = vm.read();
    assert_eq!(
        vm.gpm.page_table_query(0).unwrap().1,
        MemAttr::NORMAL_OWB | MemAttr::NORMAL_IWB
    );
    assert_eq!(vm.gpm.page_table_query(0x1C01_0000).unwrap().1, MemAttr::DM);
}

#[test]
fn test_guest1_isolation() {
    let (_allocator, list) = new_list(64);
    assert_eq!(list.create_platform_vm(IMAGE0, IMAGE_SIZE).unwrap(), 0);
    assert_eq!(list.create_platform_vm(IMAGE1, IMAGE_SIZE).unwrap(), 1);

    assert_eq!(list.translate(1, 0x1C09_0000).unwrap(), 0x1C0B_0000);
    assert_eq!(list.translate(1, 0x1C11_0000).unwrap(), 0x1C12_0000);
    assert_eq!(list.translate(0, 0x1C09_0000).unwrap(), 0x1C0A_0000);
    assert_eq!(list.translate(1, 0x100).unwrap(), IMAGE1 + 0x100);
    assert!(list.translate(1, 0x1C01_0000).is_err());
    assert!(list.translate(1, 0x1A00_0000).is_err());

    let vm0 = list.find_vm(0).unwrap();
    let vm1 = list.find_vm(1).unwrap();
    let (t0, t1) = (vm0.read().vttbr(), vm1.read().vttbr());
    assert_eq!(t0 >> 48, 0);
    assert_eq!(t1 >> 48, 1);
    assert_ne!(t0 & 0xFF_FFFF_F000, t1 & 0xFF_FFFF_F000);
}

#[test]
fn test_delete_releases_every_table() {
    let (allocator, list) = new_list(64);
    let baseline = allocator.free_pages();
    let vmid = list.create_platform_vm(IMAGE0, IMAGE_SIZE).unwrap();
    assert!(allocator.free_pages() < baseline);

    assert_eq!(list.delete_vm(vmid).unwrap(), VmState::Undefined);
    assert_eq!(allocator.free_pages(), baseline);
    assert!(list.find_vm(vmid).is_none());
    assert_eq!(list.delete_vm(vmid).unwrap_err().num, HvErrorNum::ENOENT);
    assert_eq!(list.translate(vmid, 0).unwrap_err().num, HvErrorNum::ENOENT);
}

#[test]
fn test_state_machine() {
    let (_allocator, list) = new_list(8);
    let memmap = GuestMemoryMap::from_lists(&[MemMapDesc::END], &platform::GUEST1_MEMORY).unwrap();
    let vmid = list.create_vm(memmap, IMAGE0, IMAGE_SIZE).unwrap();
    assert_eq!(list.find_vm(vmid).unwrap().read().state(), VmState::Defined);

    assert_eq!(list.shutdown_vm(vmid).unwrap_err().num, HvErrorNum::EPERM);
    assert_eq!(list.start_vm(vmid).unwrap(), VmState::Scheduling);
    assert_eq!(list.start_vm(vmid).unwrap_err().num, HvErrorNum::EPERM);
    assert_eq!(list.shutdown_vm(vmid).unwrap(), VmState::Defined);
    assert_eq!(list.start_vm(vmid).unwrap(), VmState::Scheduling);
    assert_eq!(list.delete_vm(vmid).unwrap(), VmState::Undefined);
    assert_eq!(list.start_vm(vmid).unwrap_err().num, HvErrorNum::ENOENT);
}

#[test]
fn test_vmid_allocation() {
    let (_allocator, list) = new_list(16);
    let memmap = || GuestMemoryMap::from_lists(&[MemMapDesc::END], &platform::GUEST1_MEMORY).unwrap();
    assert_eq!(list.create_vm(memmap(), IMAGE0, IMAGE_SIZE).unwrap(), 0);
    list.create_vm_with_id(2, memmap(), IMAGE1, IMAGE_SIZE).unwrap();
    assert_eq!(list.get_next_vmid().unwrap(), 1);
    assert_eq!(list.create_vm(memmap(), IMAGE0, IMAGE_SIZE).unwrap(), 3);
    let err = list
        .create_vm_with_id(2, memmap(), IMAGE1, IMAGE_SIZE)
        .err()
        .unwrap();
    assert_eq!(err.num, HvErrorNum::EEXIST);
    assert_eq!(list.vm_count(), 3);
}

#[test]
fn test_failed_creation_is_not_registered() {
    let (allocator, list) = new_list(16);
    let baseline = allocator.free_pages();
    let devices = [
        MemMapDesc::new("a", 0x1C00_0000, 0x1C00_0000, 0x2000, MemAttr::DM),
        MemMapDesc::new("b", 0x1C00_1000, 0x1C00_1000, 0x1000, MemAttr::DM),
        MemMapDesc::END,
    ];
    let memmap = GuestMemoryMap::from_lists(&devices, &platform::GUEST1_MEMORY).unwrap();
    let err = list
        .create_vm_with_id(5, memmap, IMAGE0, IMAGE_SIZE)
        .err()
        .unwrap();
    assert_eq!(err.num, HvErrorNum::EINVAL);
    assert!(list.find_vm(5).is_none());
    assert_eq!(allocator.free_pages(), baseline);
}

#[test]
fn test_unknown_platform_guest() {
    let (_allocator, list) = new_list(64);
    list.create_vm_with_id(
        0,
        platform::guest_memory_map(0).unwrap(),
        IMAGE0,
        IMAGE_SIZE,
    )
    .unwrap();
    list.create_vm_with_id(
        1,
        platform::guest_memory_map(1).unwrap(),
        IMAGE1,
        IMAGE_SIZE,
    )
    .unwrap();
    let err = list.create_platform_vm(IMAGE0, IMAGE_SIZE).unwrap_err();
    assert_eq!(err.num, HvErrorNum::ENOENT);
}
