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

const GUEST_RW: LeafAttr = LeafAttr::Guest(MemAttr::DM);

#[test]
fn test_block_address_round_trip() {
    for (level, pa) in [
        (Level::L1, 0x80_4000_0000usize),
        (Level::L1, 0xFF_C000_0000),
        (Level::L2, 0x1C20_0000),
        (Level::L2, 0xFF_FFE0_0000),
    ] {
        let host = Descriptor::make_block(level, pa, LeafAttr::Host { attr_index: 1 }).unwrap();
        let guest = Descriptor::make_block(level, pa, GUEST_RW).unwrap();
        assert_eq!(host.output_addr(level), pa);
        assert_eq!(guest.output_addr(level), pa);
        assert_eq!(host.kind(level), Some(DescriptorKind::Block));
        assert!(!guest.is_table());
    }
}

#[test]
fn test_host_block_profile() {
    let desc = Descriptor::make_block(Level::L2, 0x4000_0000, LeafAttr::Host { attr_index: 2 })
        .unwrap();
    let attr = desc.attr();
    assert!(attr.contains(DescriptorAttr::VALID | DescriptorAttr::AF | DescriptorAttr::NS));
    assert!(attr.contains(DescriptorAttr::AP_USER | DescriptorAttr::NG));
    assert!(!attr.intersects(DescriptorAttr::AP_RO | DescriptorAttr::XN | DescriptorAttr::PXN));
    assert_eq!(desc.shareability(), 2);
    assert_eq!(desc.attr_index(), 2);
}

#[test]
fn test_guest_page_profile() {
    let desc = Descriptor::make_page(0x1C01_0000, LeafAttr::Guest(MemAttr::NORMAL_WB), true)
        .unwrap();
    assert_eq!(desc.bits(), 0x1C01_0000 | 0x4FF);
    assert_eq!(desc.kind(Level::L3), Some(DescriptorKind::Page));
    assert_eq!(desc.mem_attr(), MemAttr::NORMAL_OWB | MemAttr::NORMAL_IWB);
    assert_eq!(desc.access_perm(), 0b11);
    assert_eq!(desc.shareability(), 0);

    let hidden = Descriptor::make_page(0x1C01_0000, GUEST_RW, false).unwrap();
    assert!(!hidden.is_valid());
    assert!(hidden.is_table());
    assert_eq!(hidden.kind(Level::L3), None);
}

#[test]
fn test_table_descriptor_limits_cleared() {
    let host = Descriptor::make_table(Level::L1, 0x8000_3000, Stage::Host).unwrap();
    assert!(host.is_valid() && host.is_table());
    assert_eq!(host.table_addr(Level::L1), 0x8000_3000);
    assert!(!host.has_table_limits());
    assert!(host.attr().contains(DescriptorAttr::NS_TABLE));

    let guest = Descriptor::make_table(Level::L2, 0x8000_3000, Stage::Guest).unwrap();
    assert_eq!(guest.bits() >> 59, 0);
    assert_eq!(guest.bits(), 0x8000_3003);
    assert_eq!(guest.kind(Level::L2), Some(DescriptorKind::Table));
}

#[test]
fn test_toggle_valid_is_identity() {
    let orig = Descriptor::make_page(0x8765_4000, GUEST_RW, true).unwrap();
    let mut desc = orig;
    desc.set_valid(false);
    assert_eq!(desc.bits(), orig.bits() & !1);
    desc.set_valid(true);
    assert_eq!(desc, orig);

    desc.set_table_bit(false);
    desc.set_table_bit(true);
    assert_eq!(desc, orig);
}

#[test]
fn test_field_setters_mask_to_width() {
    let mut desc = Descriptor::make_page(0x1000, GUEST_RW, true).unwrap();
    desc.set_attr_index(0xFF);
    assert_eq!(desc.attr_index(), 0b111);
    desc.set_access_perm(0b110);
    assert_eq!(desc.access_perm(), 0b10);
    desc.set_output_addr(Level::L3, 0xFFFF_FFFF_FFFF_F123);
    assert_eq!(desc.output_addr(Level::L3), 0xFF_FFFF_F000);
    assert_eq!(desc.bits() >> 40 & 0xFFF, 0);
}

#[test]
fn test_checked_constructors_reject_bad_input() {
    assert_eq!(
        Descriptor::make_block(Level::L2, 0x1C01_0000, GUEST_RW),
        Err(PagingError::Misaligned)
    );
    assert_eq!(
        Descriptor::make_page(1 << 40, GUEST_RW, true),
        Err(PagingError::OutOfRange)
    );
    assert_eq!(
        Descriptor::make_block(Level::L3, 0x1000, GUEST_RW),
        Err(PagingError::InvalidLevel)
    );
    assert_eq!(
        Descriptor::make_table(Level::L3, 0x1000, Stage::Guest),
        Err(PagingError::InvalidLevel)
    );
    assert_eq!(
        Descriptor::make_page(0x1000, LeafAttr::Host { attr_index: 8 }, true),
        Err(PagingError::InvalidAttr)
    );
    assert_eq!(MemAttr::new(0x10), Err(PagingError::InvalidAttr));
    assert_eq!(MemAttr::new(0xC), Ok(MemAttr::NORMAL_OWB));
}

#[test]
fn test_mem_attr_tags() {
    assert!(MemAttr::SO.is_device());
    assert!(MemAttr::DM.is_device());
    assert!(!(MemAttr::NORMAL_ONC | MemAttr::NORMAL_INC).is_device());
    assert_eq!(MemAttr::NORMAL_WB.bits(), 0xF);
    assert_eq!((MemAttr::NORMAL_OWT | MemAttr::NORMAL_IWT).bits(), 0xA);
}
