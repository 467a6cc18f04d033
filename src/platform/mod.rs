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
use crate::arch::aarch64::s2pt::Vmid;
use crate::config::GuestMemoryMap;
use crate::error::HvResult;

#[cfg(feature = "platform_rtsm_vexpress")]
pub mod rtsm_vexpress;

#[cfg(feature = "platform_rtsm_vexpress")]
pub use rtsm_vexpress::*;

#[cfg(not(feature = "platform_rtsm_vexpress"))]
compile_error!("no platform selected");

/// Memory map of the guest `vmid`, image placeholder not yet patched.
pub fn guest_memory_map(vmid: Vmid) -> HvResult<GuestMemoryMap> {
    match GUEST_MEMMAPS.get(vmid as usize) {
        Some([devices, memory]) => GuestMemoryMap::from_lists(devices, memory),
        None => hv_result_err!(ENOENT, format!("no memory map for vm {}", vmid)),
    }
}
