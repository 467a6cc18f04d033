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
//! Hypervisor heap, backing `alloc` on bare metal.
use buddy_system_allocator::LockedHeap;
use spin::Once;

use crate::consts::HV_HEAP_SIZE;

#[cfg_attr(target_os = "none", global_allocator)]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::<32>::new();

static mut HEAP_SPACE: [u64; HV_HEAP_SIZE / 8] = [0; HV_HEAP_SIZE / 8];

/// Hand the static heap region to the allocator. Later calls do nothing.
pub fn init_heap() {
    static INIT: Once<()> = Once::new();
    INIT.call_once(|| {
        let heap_start = unsafe { core::ptr::addr_of_mut!(HEAP_SPACE) } as usize;
        unsafe { HEAP_ALLOCATOR.lock().init(heap_start, HV_HEAP_SIZE) };
        info!(
            "Heap allocator initialization finished: {:#x?}",
            heap_start..heap_start + HV_HEAP_SIZE
        );
    });
}
