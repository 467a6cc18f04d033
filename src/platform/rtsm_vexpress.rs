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
//! ARM RTSM (Fast Models) Versatile Express, Cortex-A15 tile.
use crate::arch::aarch64::s1pt::{HostMemType, HostRegion};
use crate::arch::aarch64::MemAttr;
use crate::config::MemMapDesc;

pub const SZ_4K: usize = 0x1000;
pub const SZ_8K: usize = 0x2000;
pub const SZ_64K: usize = 0x1_0000;
pub const SZ_2M: usize = 0x20_0000;
pub const SZ_16M: usize = 0x100_0000;
pub const SZ_32M: usize = 0x200_0000;
pub const SZ_1G: usize = 0x4000_0000;

pub const GIC_BASE_PA: usize = 0x2C00_0000;
pub const GIC_OFFSET_GICC: usize = 0x2000;
/// Virtual CPU interface handed to guests in place of the GICC.
pub const GIC_OFFSET_GICV: usize = 0x6000;

const NORMAL_WB: MemAttr = MemAttr::NORMAL_WB;
const DM: MemAttr = MemAttr::DM;

// serial0 and serial1 are swapped for guest 0.
pub const GUEST0_DEVICES: [MemMapDesc; 20] = [
    MemMapDesc::new("sysreg", 0x1C01_0000, 0x1C01_0000, SZ_4K, DM),
    MemMapDesc::new("sysctl", 0x1C02_0000, 0x1C02_0000, SZ_4K, DM),
    MemMapDesc::new("aaci", 0x1C04_0000, 0x1C04_0000, SZ_4K, DM),
    MemMapDesc::new("mmci", 0x1C05_0000, 0x1C05_0000, SZ_4K, DM),
    MemMapDesc::new("kmi", 0x1C06_0000, 0x1C06_0000, SZ_64K, DM),
    MemMapDesc::new("kmi2", 0x1C07_0000, 0x1C07_0000, SZ_64K, DM),
    MemMapDesc::new("v2m_serial0", 0x1C09_0000, 0x1C0A_0000, SZ_4K, DM),
    MemMapDesc::new("v2m_serial1", 0x1C0A_0000, 0x1C09_0000, SZ_4K, DM),
    MemMapDesc::new("v2m_serial2", 0x1C0B_0000, 0x1C0B_0000, SZ_4K, DM),
    MemMapDesc::new("v2m_serial3", 0x1C0C_0000, 0x1C0C_0000, SZ_4K, DM),
    MemMapDesc::new("wdt", 0x1C0F_0000, 0x1C0F_0000, SZ_4K, DM),
    MemMapDesc::new("v2m_timer01(sp804)", 0x1C11_0000, 0x1C11_0000, SZ_4K, DM),
    MemMapDesc::new("v2m_timer23", 0x1C12_0000, 0x1C12_0000, SZ_4K, DM),
    MemMapDesc::new("rtc", 0x1C17_0000, 0x1C17_0000, SZ_4K, DM),
    MemMapDesc::new("clcd", 0x1C1F_0000, 0x1C1F_0000, SZ_4K, DM),
    MemMapDesc::new(
        "gicc",
        GIC_BASE_PA | GIC_OFFSET_GICC,
        GIC_BASE_PA | GIC_OFFSET_GICV,
        SZ_8K,
        DM,
    ),
    MemMapDesc::new("SMSC91c111i", 0x1A00_0000, 0x1A00_0000, SZ_16M, DM),
    // The static memory bus around the SMSC window.
    MemMapDesc::new("simplebus2", 0x1800_0000, 0x1800_0000, SZ_32M, DM),
    MemMapDesc::new("simplebus2_hi", 0x1B00_0000, 0x1B00_0000, SZ_16M, DM),
    MemMapDesc::END,
];

pub const GUEST1_DEVICES: [MemMapDesc; 4] = [
    MemMapDesc::new("uart", 0x1C09_0000, 0x1C0B_0000, SZ_4K, DM),
    MemMapDesc::new("sp804", 0x1C11_0000, 0x1C12_0000, SZ_4K, DM),
    MemMapDesc::new(
        "gicc",
        GIC_BASE_PA | GIC_OFFSET_GICC,
        GIC_BASE_PA | GIC_OFFSET_GICV,
        SZ_8K,
        DM,
    ),
    MemMapDesc::END,
];

pub const GUEST0_MEMORY: [MemMapDesc; 2] = [
    MemMapDesc::new("start", 0, 0, 0, NORMAL_WB),
    MemMapDesc::END,
];

pub const GUEST1_MEMORY: [MemMapDesc; 2] = [
    MemMapDesc::new("start", 0, 0, 0, NORMAL_WB),
    MemMapDesc::END,
];

/// Device list then memory list, per vmid.
pub static GUEST_MEMMAPS: [[&[MemMapDesc]; 2]; 2] = [
    [&GUEST0_DEVICES, &GUEST0_MEMORY],
    [&GUEST1_DEVICES, &GUEST1_MEMORY],
];

/// Hypervisor RAM and the peripherals it drives itself.
pub const HOST_REGIONS: [HostRegion; 3] = [
    HostRegion {
        vaddr: 0x8000_0000,
        paddr: 0x8000_0000,
        size: SZ_1G,
        mem_type: HostMemType::Normal,
    },
    HostRegion {
        vaddr: 0x1C00_0000,
        paddr: 0x1C00_0000,
        size: SZ_2M,
        mem_type: HostMemType::Device,
    },
    HostRegion {
        vaddr: GIC_BASE_PA,
        paddr: GIC_BASE_PA,
        size: SZ_2M,
        mem_type: HostMemType::Device,
    },
];
