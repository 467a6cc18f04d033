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
//! Codec of one 64-bit LPAE long descriptor.
//!
//! A descriptor is kept as its packed `u64`; every field is read and written through the
//! accessors below, which clear the field before inserting the new value and mask values
//! to the field width.
use bit_field::BitField;
use core::fmt;
use core::ops::{BitOr, Range};
use numeric_enum_macro::numeric_enum;

use super::level::{DescriptorKind, Level, Stage};
use crate::consts::PA_BITS;
use crate::memory::{PagingError, PagingResult, PhysAddr};

bitflags::bitflags! {
    /// Single-bit fields of the long-descriptor formats.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct DescriptorAttr: u64 {
        /// Whether the descriptor is valid.
        const VALID =       1 << 0;
        /// Table descriptor at level 1/2, page descriptor at level 3.
        const TABLE =       1 << 1;

        // Stage 1 lower block/page attributes.

        /// Output address is in the Non-secure address space.
        const NS =          1 << 5;
        /// AP[1]: accessible from unprivileged code.
        const AP_USER =     1 << 6;
        /// AP[2]: read-only.
        const AP_RO =       1 << 7;
        /// The not global bit.
        const NG =          1 << 11;

        // Stage 2 lower block/page attributes.

        /// HAP[0]: the guest may read.
        const S2AP_R =      1 << 6;
        /// HAP[1]: the guest may write.
        const S2AP_W =      1 << 7;

        /// The Access flag.
        const AF =          1 << 10;

        // Upper block/page attributes.

        /// Contiguous hint.
        const CONTIGUOUS =  1 << 52;
        /// Privileged execute-never (stage 1 only).
        const PXN =         1 << 53;
        /// Execute-never.
        const XN =          1 << 54;

        // Limits for subsequent levels, in stage 1 table descriptors.

        const PXN_TABLE =   1 << 59;
        const XN_TABLE =    1 << 60;
        const NS_TABLE =    1 << 63;
    }
}

/// Stage 2 MemAttr[3:0] or stage 1 AttrIndx[2:0].
const ATTR_RANGE: Range<usize> = 2..6;
const ATTR_INDX_RANGE: Range<usize> = 2..5;
/// AP[2:1] / HAP[1:0].
const AP_RANGE: Range<usize> = 6..8;
/// SH[1:0].
const SH_RANGE: Range<usize> = 8..10;
/// APTable[1:0].
const AP_TABLE_RANGE: Range<usize> = 61..63;

/// Largest stage 1 AttrIndx value (index into MAIR).
pub const MAX_ATTR_INDEX: u8 = 0b111;

numeric_enum! {
    #[repr(u8)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Shareability {
        NonShareable = 0,
        OuterShareable = 2,
        InnerShareable = 3,
    }
}

/// Stage 2 memory attribute tag, the 4-bit MemAttr field.
///
/// Bits [3:2] select the outer attribute (`00` for Strongly-ordered or Device memory), bits
/// [1:0] the inner attribute of Normal memory. Outer and inner parts are combined with `|`.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MemAttr(u8);

impl MemAttr {
    pub const FIELD_MASK: u8 = 0xF;

    /// Strongly-ordered.
    pub const SO: Self = Self(0x0);
    /// Device.
    pub const DM: Self = Self(0x1);
    pub const NORMAL_ONC: Self = Self(0x4);
    pub const NORMAL_OWT: Self = Self(0x8);
    pub const NORMAL_OWB: Self = Self(0xC);
    pub const NORMAL_INC: Self = Self(0x1);
    pub const NORMAL_IWT: Self = Self(0x2);
    pub const NORMAL_IWB: Self = Self(0x3);
    /// Normal memory, outer and inner write-back.
    pub const NORMAL_WB: Self = Self(0xF);

    /// Checked constructor; values wider than the field are rejected, not truncated.
    pub const fn new(bits: u8) -> PagingResult<Self> {
        if bits & !Self::FIELD_MASK != 0 {
            Err(PagingError::InvalidAttr)
        } else {
            Ok(Self(bits))
        }
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_device(self) -> bool {
        self.0 & 0b1100 == 0
    }
}

impl BitOr for MemAttr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for MemAttr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0 {
            0x0 => write!(f, "MemAttr(SO)"),
            0x1 => write!(f, "MemAttr(DM)"),
            bits => write!(f, "MemAttr(Normal, outer={:#b}, inner={:#b})", bits >> 2, bits & 3),
        }
    }
}

/// Attribute profile of a leaf descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafAttr {
    /// Hypervisor stage 1: AttrIndx into MAIR, outer shareable, Non-secure, user, read/write.
    Host { attr_index: u8 },
    /// Guest stage 2: MemAttr, non-shareable, read/write, executable.
    Guest(MemAttr),
}

impl LeafAttr {
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Host { .. } => Stage::Host,
            Self::Guest(_) => Stage::Guest,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct Descriptor(u64);

impl Descriptor {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub fn is_unused(&self) -> bool {
        self.0 == 0
    }

    pub fn attr(&self) -> DescriptorAttr {
        DescriptorAttr::from_bits_truncate(self.0)
    }

    fn set_attr(&mut self, attr: DescriptorAttr, on: bool) {
        self.0.set_bit(attr.bits().trailing_zeros() as usize, on);
    }

    pub fn is_valid(&self) -> bool {
        self.attr().contains(DescriptorAttr::VALID)
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.set_attr(DescriptorAttr::VALID, valid);
    }

    pub fn is_table(&self) -> bool {
        self.attr().contains(DescriptorAttr::TABLE)
    }

    pub fn set_table_bit(&mut self, table: bool) {
        self.set_attr(DescriptorAttr::TABLE, table);
    }

    /// What this descriptor is when found at `level`, `None` if invalid or reserved.
    pub fn kind(&self, level: Level) -> Option<DescriptorKind> {
        match (self.is_valid(), self.is_table(), level) {
            (false, _, _) => None,
            (true, true, Level::L3) => Some(DescriptorKind::Page),
            (true, false, Level::L3) => None,
            (true, true, _) => Some(DescriptorKind::Table),
            (true, false, _) => Some(DescriptorKind::Block),
        }
    }

    /// Output address of a block or page at `level`.
    pub fn output_addr(&self, level: Level) -> PhysAddr {
        (self.0 & level.block_addr_mask()) as PhysAddr
    }

    pub fn set_output_addr(&mut self, level: Level, paddr: PhysAddr) {
        let mask = level.block_addr_mask();
        self.0 = (self.0 & !mask) | (paddr as u64 & mask);
    }

    /// Next-level table address; zero at level 3, which has no table descriptors.
    pub fn table_addr(&self, level: Level) -> PhysAddr {
        level
            .table_addr_mask()
            .map_or(0, |mask| (self.0 & mask) as PhysAddr)
    }

    pub fn set_table_addr(&mut self, level: Level, paddr: PhysAddr) {
        if let Some(mask) = level.table_addr_mask() {
            self.0 = (self.0 & !mask) | (paddr as u64 & mask);
        }
    }

    pub fn mem_attr(&self) -> MemAttr {
        MemAttr(self.0.get_bits(ATTR_RANGE) as u8)
    }

    pub fn set_mem_attr(&mut self, attr: MemAttr) {
        self.0
            .set_bits(ATTR_RANGE, (attr.bits() & MemAttr::FIELD_MASK) as u64);
    }

    pub fn attr_index(&self) -> u8 {
        self.0.get_bits(ATTR_INDX_RANGE) as u8
    }

    pub fn set_attr_index(&mut self, index: u8) {
        self.0
            .set_bits(ATTR_INDX_RANGE, (index & MAX_ATTR_INDEX) as u64);
    }

    pub fn access_perm(&self) -> u8 {
        self.0.get_bits(AP_RANGE) as u8
    }

    pub fn set_access_perm(&mut self, ap: u8) {
        self.0.set_bits(AP_RANGE, (ap & 0b11) as u64);
    }

    pub fn shareability(&self) -> u8 {
        self.0.get_bits(SH_RANGE) as u8
    }

    pub fn set_shareability(&mut self, sh: Shareability) {
        self.0.set_bits(SH_RANGE, u8::from(sh) as u64);
    }

    pub fn ap_table(&self) -> u8 {
        self.0.get_bits(AP_TABLE_RANGE) as u8
    }

    /// Whether any "limit for subsequent levels" field is set.
    pub fn has_table_limits(&self) -> bool {
        self.ap_table() != 0
            || self
                .attr()
                .intersects(DescriptorAttr::PXN_TABLE | DescriptorAttr::XN_TABLE)
    }

    fn check_output(level: Level, paddr: PhysAddr) -> PagingResult {
        if paddr >> PA_BITS != 0 {
            return Err(PagingError::OutOfRange);
        }
        if !level.is_aligned(paddr) {
            return Err(PagingError::Misaligned);
        }
        Ok(())
    }

    /// Lower and upper attributes shared by blocks and pages.
    fn set_leaf_attr(&mut self, attr: LeafAttr) -> PagingResult {
        self.set_attr(DescriptorAttr::AF, true);
        self.set_attr(DescriptorAttr::CONTIGUOUS, false);
        self.set_attr(DescriptorAttr::XN, false);
        match attr {
            LeafAttr::Host { attr_index } => {
                if attr_index > MAX_ATTR_INDEX {
                    return Err(PagingError::InvalidAttr);
                }
                self.set_attr_index(attr_index);
                self.set_attr(DescriptorAttr::NS, true);
                self.set_attr(DescriptorAttr::AP_USER, true);
                self.set_attr(DescriptorAttr::AP_RO, false);
                self.set_shareability(Shareability::OuterShareable);
                self.set_attr(DescriptorAttr::NG, true);
                self.set_attr(DescriptorAttr::PXN, false);
            }
            LeafAttr::Guest(mem_attr) => {
                self.set_mem_attr(mem_attr);
                self.set_attr(DescriptorAttr::S2AP_R, true);
                self.set_attr(DescriptorAttr::S2AP_W, true);
                self.set_shareability(Shareability::NonShareable);
            }
        }
        Ok(())
    }

    /// Level 1 (1 GiB) or level 2 (2 MiB) block mapping `paddr`.
    pub fn make_block(level: Level, paddr: PhysAddr, attr: LeafAttr) -> PagingResult<Self> {
        if !level.policy(attr.stage()).allows(DescriptorKind::Block) {
            return Err(PagingError::InvalidLevel);
        }
        Self::check_output(level, paddr)?;
        let mut desc = Self::empty();
        desc.set_valid(true);
        desc.set_table_bit(false);
        desc.set_output_addr(level, paddr);
        desc.set_leaf_attr(attr)?;
        Ok(desc)
    }

    /// Level 3 page mapping `paddr`; `valid == false` prepares the page for later activation.
    pub fn make_page(paddr: PhysAddr, attr: LeafAttr, valid: bool) -> PagingResult<Self> {
        Self::check_output(Level::L3, paddr)?;
        let mut desc = Self::empty();
        desc.set_valid(valid);
        desc.set_table_bit(true);
        desc.set_output_addr(Level::L3, paddr);
        desc.set_leaf_attr(attr)?;
        Ok(desc)
    }

    /// Level 1 or 2 descriptor pointing to the next-level table at `next`.
    ///
    /// No limit is propagated to subsequent levels. Host tables live in the Non-secure space;
    /// in stage 2 the upper table bits are reserved and stay zero.
    pub fn make_table(level: Level, next: PhysAddr, stage: Stage) -> PagingResult<Self> {
        if !level.policy(stage).allows(DescriptorKind::Table) {
            return Err(PagingError::InvalidLevel);
        }
        Self::check_output(Level::L3, next)?;
        let mut desc = Self::empty();
        desc.set_valid(true);
        desc.set_table_bit(true);
        desc.set_table_addr(level, next);
        desc.set_attr(DescriptorAttr::PXN_TABLE, false);
        desc.set_attr(DescriptorAttr::XN_TABLE, false);
        desc.0.set_bits(AP_TABLE_RANGE, 0);
        desc.set_attr(DescriptorAttr::NS_TABLE, stage == Stage::Host);
        Ok(desc)
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("raw", &format_args!("{:#018x}", self.0))
            .field("addr", &format_args!("{:#x}", self.output_addr(Level::L3)))
            .field("attr", &self.attr())
            .field("mem_attr", &self.mem_attr())
            .finish()
    }
}

#[cfg(test)]
mod tests;
