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
use crate::memory::frame::test_allocator;
use crate::memory::BitmapFrameAllocator;

fn new_set(pages: usize) -> (Arc<BitmapFrameAllocator>, MemorySet) {
    let allocator = test_allocator(pages);
    let set = MemorySet::new(0, allocator.clone()).unwrap();
    (allocator, set)
}

fn dev(label: &'static str, start: usize, paddr: usize, size: usize) -> MemoryRegion {
    MemoryRegion::new(label, start, paddr, size, MemAttr::DM)
}

#[test]
fn test_region_maps_exact_pages() {
    let (_allocator, mut set) = new_set(8);
    set.insert(dev("kmi", 0x1C06_0000, 0x2006_0000, 4 * PAGE_SIZE))
        .unwrap();
    let maps = set.page_table().mappings();
    assert_eq!(maps.len(), 4);
    for (i, m) in maps.iter().enumerate() {
        assert_eq!(m.ipa, 0x1C06_0000 + i * PAGE_SIZE);
        assert_eq!(m.pa, 0x2006_0000 + i * PAGE_SIZE);
        assert_eq!(m.attr, MemAttr::DM);
    }
    assert_eq!(set.translate(0x1C06_3FFF).unwrap(), 0x2006_3FFF);
    assert!(set.translate(0x1C06_4000).is_err());
}

#[test]
fn test_partial_and_empty_sizes_round_up() {
    let (_allocator, mut set) = new_set(8);
    set.insert_all(&[
        dev("gicc", 0x2C00_2000, 0x2C00_6000, 0x1800),
        MemoryRegion::new("start", 0x8000_0000, 0x9000_0000, 0, MemAttr::NORMAL_WB),
    ])
    .unwrap();
    assert_eq!(set.page_table().mappings().len(), 3);
    assert_eq!(set.translate(0x2C00_3000).unwrap(), 0x2C00_7000);
    assert_eq!(
        set.page_table_query(0x8000_0004),
        Ok((0x9000_0004, MemAttr::NORMAL_WB, PageSize::Size4K))
    );
}

#[test]
fn test_overlap_maps_nothing() {
    let (allocator, mut set) = new_set(8);
    let before = allocator.free_pages();
    let err = set
        .insert_all(&[
            dev("a", 0x1C00_0000, 0x1C00_0000, 2 * PAGE_SIZE),
            dev("b", 0x1C00_1000, 0x1D00_0000, PAGE_SIZE),
        ])
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    assert!(set.translate(0x1C00_0000).is_err());
    assert!(set.translate(0x1C00_1000).is_err());
    assert_eq!(set.region_count(), 0);
    assert_eq!(allocator.free_pages(), before);

    set.insert(dev("a", 0x1C00_0000, 0x1C00_0000, 2 * PAGE_SIZE))
        .unwrap();
    let err = set
        .insert(dev("c", 0x1C00_1000, 0x1E00_0000, PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    assert_eq!(set.translate(0x1C00_1000).unwrap(), 0x1C00_1000);
}

#[test]
fn test_malformed_region_is_rejected() {
    let (_allocator, mut set) = new_set(8);
    let err = set
        .insert_all(&[
            dev("ok", 0x1C00_0000, 0x1C00_0000, PAGE_SIZE),
            dev("odd", 0x1C01_0800, 0x1C01_0000, PAGE_SIZE),
        ])
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    assert!(set.translate(0x1C00_0000).is_err());

    let err = set
        .insert(dev("far", 0x7F_FFFF_F000, 0, 2 * PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
}

#[test]
fn test_wrapping_region_is_rejected() {
    let (_allocator, mut set) = new_set(8);
    let err = set
        .insert(dev("wrap", 0xFFFF_FFFF_FFFF_F000, 0x1000, 2 * PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    let err = set
        .insert(dev("wrap_pa", 0x1C00_0000, 0xFFFF_FFFF_FFFF_F000, 2 * PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    let err = set
        .insert(dev("huge", 0x1C00_0000, 0x1C00_0000, usize::MAX))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    assert_eq!(set.region_count(), 0);
    assert!(set.page_table().mappings().is_empty());
}

#[test]
fn test_exhaustion_keeps_earlier_regions() {
    // root + L2 + L3 for the first region, nothing left for the second.
    let (_allocator, mut set) = new_set(3);
    let err = set
        .insert_all(&[
            dev("uart", 0x1C09_0000, 0x1C0B_0000, PAGE_SIZE),
            dev("far", 0x40_0000_0000, 0x1C0C_0000, PAGE_SIZE),
        ])
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::ENOMEM);
    assert_eq!(set.translate(0x1C09_0000).unwrap(), 0x1C0B_0000);
    assert!(set.translate(0x40_0000_0000).is_err());
    assert_eq!(set.region_count(), 1);
}

#[test]
fn test_failed_region_is_rolled_back() {
    // The second page of "wide" needs a new level 3 table that cannot be allocated.
    let (_allocator, mut set) = new_set(3);
    let err = set
        .insert(dev("wide", 0x1C1F_F000, 0x1C1F_F000, 2 * PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::ENOMEM);
    assert!(set.page_table().mappings().is_empty());
    assert!(set.page_table().entry(0x1C1F_F000).unwrap().desc.is_unused());
    // Nothing was reachable, so nothing is owed.
    assert_eq!(set.take_invalidation(), None);

    // Later installs reuse and enable the hidden links left behind.
    set.insert(dev("uart", 0x1C09_0000, 0x1C0B_0000, PAGE_SIZE))
        .unwrap();
    assert_eq!(set.translate(0x1C09_0000).unwrap(), 0x1C0B_0000);
    assert!(set.translate(0x1C1F_F000).is_err());
}

#[test]
fn test_rollback_of_live_page_reports_invalidation() {
    // root + L2 + L3 for "uart"; the level 3 table of 0x1C20_0000 cannot be allocated.
    let (_allocator, mut set) = new_set(3);
    set.insert(dev("uart", 0x1C09_0000, 0x1C09_0000, PAGE_SIZE))
        .unwrap();
    assert_eq!(set.take_invalidation(), None);

    let err = set
        .insert(dev("wide", 0x1C1F_F000, 0x1C1F_F000, 2 * PAGE_SIZE))
        .unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::ENOMEM);
    assert!(set.translate(0x1C1F_F000).is_err());
    assert_eq!(set.region_count(), 1);
    assert_eq!(
        set.take_invalidation(),
        Some(Stage2Invalidation {
            vmid: 0,
            ipa: 0x1C1F_F000..0x1C20_0000,
        })
    );
    assert_eq!(set.take_invalidation(), None);
    assert_eq!(set.translate(0x1C09_0000).unwrap(), 0x1C09_0000);
}

#[test]
fn test_delete_region() {
    let (_allocator, mut set) = new_set(8);
    set.insert_all(&[
        dev("rtc", 0x1C17_0000, 0x1C17_0000, PAGE_SIZE),
        dev("clcd", 0x1C1F_0000, 0x1C1F_0000, 2 * PAGE_SIZE),
    ])
    .unwrap();
    let inv = set.delete(0x1C1F_0000).unwrap();
    assert_eq!(inv.vmid, 0);
    assert_eq!(inv.ipa, 0x1C1F_0000..0x1C1F_2000);
    assert!(set.translate(0x1C1F_1000).is_err());
    assert_eq!(set.translate(0x1C17_0000).unwrap(), 0x1C17_0000);
    assert_eq!(set.region_count(), 1);

    let err = set.delete(0x1C1F_0000).unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
    // The area is free again.
    set.insert(dev("clcd", 0x1C1F_0000, 0x2C1F_0000, PAGE_SIZE))
        .unwrap();
    assert_eq!(set.translate(0x1C1F_0000).unwrap(), 0x2C1F_0000);
}

#[test]
fn test_install_memmap_lists() {
    let devices = [
        MemMapDesc::new("sysreg", 0x1C01_0000, 0x1C01_0000, 0x1000, MemAttr::DM),
        MemMapDesc::END,
    ];
    let memory = [
        MemMapDesc::new(
            "start",
            0x8000_0000,
            0x9000_0000,
            0x2000,
            MemAttr::NORMAL_WB,
        ),
        MemMapDesc::END,
    ];
    let (_allocator, mut set) = new_set(8);
    set.install_memmap(&[&devices, &memory]).unwrap();
    assert_eq!(set.region_count(), 2);
    assert_eq!(set.translate(0x8000_1000).unwrap(), 0x9000_1000);

    let unterminated = [MemMapDesc::new("x", 0, 0, 0x1000, MemAttr::DM)];
    let (_allocator, mut set) = new_set(8);
    let err = set.install_memmap(&[&unterminated]).unwrap_err();
    assert_eq!(err.num, crate::HvErrorNum::EINVAL);
}

#[test]
fn test_drop_releases_tables() {
    let allocator = test_allocator(8);
    {
        let mut set = MemorySet::new(0, allocator.clone()).unwrap();
        set.insert(dev("uart", 0x1C09_0000, 0x1C09_0000, PAGE_SIZE))
            .unwrap();
        assert_eq!(allocator.free_pages(), 5);
    }
    assert_eq!(allocator.free_pages(), 8);
}
