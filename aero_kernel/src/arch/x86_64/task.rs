/*
 * Copyright (C) 2021 The Aero Project Developers.
 *
 * This file is part of The Aero Project.
 *
 * Aero is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Aero is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Aero. If not, see <https://www.gnu.org/licenses/>.
 */

use alloc::alloc::alloc_zeroed;
use core::alloc::Layout;

use crate::mem::paging::VirtAddr;
use crate::mem::AddressSpace;

use super::gdt::{get_task_state_segement, Ring};

const KERNEL_STACK_SIZE: usize = 0x1000 * 4;

/// The callee-saved registers a context switch has to preserve, laid out so
/// [`context_switch`] can push/pop them in lockstep with [`new_kernel`]'s
/// initial stack image. `rip` is last (highest address) because it is what
/// `ret` pops once every other register has been restored.
#[repr(C)]
#[derive(Default)]
struct Context {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rip: u64,
}

/// A thread's architecture-specific register state, kernel stack, and
/// address space handle. Owned by [`crate::sched::ThreadContext`]; nothing
/// outside that module is expected to touch this directly.
pub struct ArchTask {
    rsp: VirtAddr,
    address_space: AddressSpace,
    context_switch_rsp: VirtAddr,

    rpl: Ring,
}

impl ArchTask {
    /// The bootstrap task for a CPU's idle loop: no stack of its own is
    /// allocated since it never gets context-switched *into* through
    /// [`arch_task_spinup`] (it is simply what is running when a CPU starts
    /// scheduling), only switched *away from*.
    pub fn new_idle() -> Self {
        Self {
            rsp: VirtAddr::zero(),
            context_switch_rsp: VirtAddr::zero(),
            address_space: AddressSpace::this(),
            rpl: Ring::Ring0,
        }
    }

    /// Allocates a new kernel task stack and arranges it so the first switch
    /// into this task lands at `entry_point`.
    pub fn new_kernel(entry_point: VirtAddr) -> Self {
        let stack = unsafe {
            let layout = Layout::from_size_align_unchecked(KERNEL_STACK_SIZE, 0x10);
            alloc_zeroed(layout)
        };

        let stack_top = unsafe { stack.add(KERNEL_STACK_SIZE) };

        let context = unsafe {
            let ctx_addr = stack_top.cast::<Context>().sub(1);

            ctx_addr.write(Context {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                rbx: 0,
                rbp: 0,
                rip: entry_point.as_u64(),
            });

            ctx_addr
        };

        Self {
            rsp: VirtAddr::new(context as u64),
            context_switch_rsp: VirtAddr::new(stack_top as u64),
            address_space: AddressSpace::this(),
            rpl: Ring::Ring0,
        }
    }

    pub fn rpl(&self) -> Ring {
        self.rpl
    }

    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }
}

/// Switches from `from`'s register state to `to`'s, optionally loading `to`'s
/// page table (a pure context-to-context switch within the same address
/// space, e.g. two kernel threads, skips the `cr3` write).
///
/// On return, execution is back in `from` again - the caller that originally
/// switched *to* `from` has switched back. This mirrors every other
/// stack-swap kernel context switch: the function "returns" on a completely
/// different stack than the one it was called on.
pub fn arch_task_spinup(from: &mut ArchTask, to: &ArchTask, address_space_switch: bool) {
    unsafe {
        get_task_state_segement().rsp[0] = to.context_switch_rsp.as_u64();
    }

    let cr3 = if address_space_switch {
        to.address_space.cr3().start_address().as_u64()
    } else {
        0
    };

    unsafe {
        context_switch(&mut from.rsp as *mut VirtAddr, to.rsp.as_u64(), cr3);
    }
}

/// `rdi` = `&mut from.rsp`, `rsi` = `to.rsp`, `rdx` = `to`'s `cr3` or `0` to
/// keep the current one. Pushes the callee-saved registers Rust's calling
/// convention doesn't already preserve across this call, stashes the result
/// in `*rdi`, swaps to `rsi`, optionally reloads `cr3`, then pops the next
/// task's registers and `ret`s into whatever `rip` it left on its stack.
#[naked]
unsafe extern "C" fn context_switch(save_rsp: *mut VirtAddr, load_rsp: u64, cr3: u64) {
    asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "test rdx, rdx",
        "jz 2f",
        "mov cr3, rdx",
        "2:",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        options(noreturn)
    );
}
