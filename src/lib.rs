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
//! Two-stage LPAE translation-table core of the hypervisor.
//!
//! The hypervisor's own stage-1 tables are built by [`arch::s1pt`], every
//! guest gets a stage-2 hierarchy from [`arch::s2pt`] populated from its
//! memory map by [`memory::MemorySet`], and [`vm::VmList`] ties a guest
//! identifier to its root table.
#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate alloc;
#[macro_use]
extern crate log;

#[macro_use]
pub mod error;
#[macro_use]
pub mod logging;

pub mod arch;
pub mod config;
pub mod consts;
pub mod memory;
pub mod platform;
pub mod vm;

pub use error::{HvError, HvErrorNum, HvResult};
