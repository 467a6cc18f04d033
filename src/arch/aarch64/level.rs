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
//! Per-level constants of the 4 KiB granule long-descriptor format.
//!
//! Every address mask and entry size used by the codec and the table walkers comes from
//! [`LevelPolicy::of`]; nothing else in the crate spells a mask out.
use numeric_enum_macro::numeric_enum;

use crate::consts::ENTRY_COUNT;
use crate::memory::PageSize;

/// Level 1 block output address, bits [39:30].
pub const TTBL_L1_OUTADDR_MASK: u64 = 0x0000_00FF_C000_0000;
/// Level 2 block output address, bits [39:21].
pub const TTBL_L2_OUTADDR_MASK: u64 = 0x0000_00FF_FFE0_0000;
/// Level 3 page output address, bits [39:12].
pub const TTBL_L3_OUTADDR_MASK: u64 = 0x0000_00FF_FFFF_F000;
/// Level 1 table descriptor, next-level (level 2) table address, bits [39:12].
pub const TTBL_L1_TABADDR_MASK: u64 = 0x0000_00FF_FFFF_F000;
/// Level 2 table descriptor, next-level (level 3) table address, bits [39:12].
pub const TTBL_L2_TABADDR_MASK: u64 = 0x0000_00FF_FFFF_F000;

numeric_enum! {
    #[repr(usize)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    pub enum Level {
        L1 = 1,
        L2 = 2,
        L3 = 3,
    }
}

/// Which translation regime a table belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Stage-1 tables of the hypervisor itself.
    Host,
    /// Stage-2 tables of one guest.
    Guest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Block,
    Table,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelPolicy {
    pub level: Level,
    pub stage: Stage,
    /// Output address field of a block (levels 1, 2) or page (level 3).
    pub block_addr_mask: u64,
    /// Next-level address field of a table descriptor, none at level 3.
    pub table_addr_mask: Option<u64>,
    /// Input range translated by one entry.
    pub entry_size: PageSize,
}

impl LevelPolicy {
    pub const fn of(level: Level, stage: Stage) -> Self {
        // Both regimes share the layout; the stage only changes attributes.
        match level {
            Level::L1 => Self {
                level,
                stage,
                block_addr_mask: TTBL_L1_OUTADDR_MASK,
                table_addr_mask: Some(TTBL_L1_TABADDR_MASK),
                entry_size: PageSize::Size1G,
            },
            Level::L2 => Self {
                level,
                stage,
                block_addr_mask: TTBL_L2_OUTADDR_MASK,
                table_addr_mask: Some(TTBL_L2_TABADDR_MASK),
                entry_size: PageSize::Size2M,
            },
            Level::L3 => Self {
                level,
                stage,
                block_addr_mask: TTBL_L3_OUTADDR_MASK,
                table_addr_mask: None,
                entry_size: PageSize::Size4K,
            },
        }
    }

    pub const fn allows(&self, kind: DescriptorKind) -> bool {
        match kind {
            DescriptorKind::Block | DescriptorKind::Table => !matches!(self.level, Level::L3),
            DescriptorKind::Page => matches!(self.level, Level::L3),
        }
    }
}

impl Level {
    pub const fn policy(self, stage: Stage) -> LevelPolicy {
        LevelPolicy::of(self, stage)
    }

    pub const fn entry_size(self) -> PageSize {
        LevelPolicy::of(self, Stage::Guest).entry_size
    }

    pub const fn block_addr_mask(self) -> u64 {
        LevelPolicy::of(self, Stage::Guest).block_addr_mask
    }

    pub const fn table_addr_mask(self) -> Option<u64> {
        LevelPolicy::of(self, Stage::Guest).table_addr_mask
    }

    pub const fn shift(self) -> usize {
        (self.entry_size() as usize).trailing_zeros() as usize
    }

    /// Index of the entry translating `addr` in a table of this level.
    pub const fn index_of(self, addr: usize) -> usize {
        (addr >> self.shift()) & (ENTRY_COUNT - 1)
    }

    pub const fn is_aligned(self, addr: usize) -> bool {
        self.entry_size().is_aligned(addr)
    }

    /// Start of the range translated by the entry holding `addr`.
    pub const fn align_down(self, addr: usize) -> usize {
        self.entry_size().align_down(addr)
    }

    pub const fn next(self) -> Option<Level> {
        match self {
            Level::L1 => Some(Level::L2),
            Level::L2 => Some(Level::L3),
            Level::L3 => None,
        }
    }
}
