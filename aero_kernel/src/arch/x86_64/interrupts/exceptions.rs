/*
 * Copyright (C) 2021-2022 The Aero Project Developers.
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

use super::InterruptErrorStack;

use crate::arch::controlregs;
use crate::mem::paging::PageFaultErrorCode;
use crate::mem::vm::{self, EventResult};
use crate::sched;
use crate::sched::process::ProgramException;

/// Faults taken from user mode are recoverable, just not by this kernel:
/// there is no signal-delivery mechanism a user process can register, so an
/// unhandled one always kills the raising thread via [`ProgramException`].
/// Faults taken from kernel mode have nowhere else to go and always panic.
fn fatal_exception(stack: &mut InterruptErrorStack, message: &str, kind: ProgramException) -> ! {
    if stack.stack.iret.is_user() {
        log::error!("EXCEPTION from userland: {}\nstack: {:#x?}", message, stack);
        sched::process::raise_program_exception(kind);
    }

    panic!("EXCEPTION: {}\nstack: {:#x?}", message, stack);
}

/// Exceptions with no more specific [`ProgramException`] variant are reported
/// as [`ProgramException::BadOperation`] when taken from user mode.
macro interrupt_exception(fn $name:ident() => $message:expr) {
    pub fn $name(stack: &mut InterruptErrorStack) {
        fatal_exception(stack, $message, ProgramException::BadOperation);
    }
}

/// Unconditionally fatal regardless of privilege level: these are the
/// "unrecoverable hardware errors" spec.md §7 calls out by name (double
/// fault, machine check) plus NMI, which this kernel never expects to
/// receive for a recoverable reason.
macro interrupt_exception_always_fatal(fn $name:ident() => $message:expr) {
    pub fn $name(stack: &mut InterruptErrorStack) {
        panic!("EXCEPTION: {}\nstack: {:#x?}", $message, stack);
    }
}

interrupt_exception!(fn divide_by_zero() => "Division by zero");
interrupt_exception!(fn debug() => "Debug");
interrupt_exception_always_fatal!(fn non_maskable() => "Non Maskable");
interrupt_exception!(fn overflow() => "Stack Overflow");
interrupt_exception!(fn bound_range() => "Out of Bounds");
interrupt_exception!(fn device_not_available() => "Device not Avaliable");
interrupt_exception_always_fatal!(fn double_fault() => "Double Fault");
interrupt_exception!(fn invalid_tss() => "Invalid TSS");
interrupt_exception!(fn segment_not_present() => "Segment not Present");
interrupt_exception!(fn stack_segment() => "Stack Segment Fault");
interrupt_exception!(fn protection() => "Protection Fault");
interrupt_exception!(fn fpu_fault() => "FPU floating point fault");
interrupt_exception!(fn alignment_check() => "Alignment check fault");
interrupt_exception_always_fatal!(fn machine_check() => "Machine check fault");
interrupt_exception!(fn simd() => "SIMD floating point fault");
interrupt_exception!(fn virtualization() => "Virtualization fault");
interrupt_exception!(fn security() => "Security exception");

pub fn invalid_opcode(stack: &mut InterruptErrorStack) {
    fatal_exception(stack, "Invalid Opcode", ProgramException::InvalidInstruction);
}

pub fn breakpoint(stack: &mut InterruptErrorStack) {
    if stack.stack.iret.is_user() {
        log::error!("unhandled breakpoint from userland\nstack: {:#x?}", stack);
        sched::process::raise_program_exception(ProgramException::Breakpoint);
    }

    // Kernel-mode int3: prevent RIP from going out of sync with
    // instructions by setting it to RIP - 1, pointing back at the int3.
    (*stack).stack.iret.rip -= 1;
}

pub(super) fn page_fault(stack: &mut InterruptErrorStack) {
    let accessed_address = controlregs::read_cr2();
    let reason = PageFaultErrorCode::from_bits_truncate(stack.code);
    let write = reason.contains(PageFaultErrorCode::CAUSED_BY_WRITE);
    let from_user = stack.stack.iret.is_user();

    let current = sched::current();
    let vm = current.process().address_space();
    let result = vm::dispatch_page_fault(vm, accessed_address, write);

    match result {
        EventResult::Continue => {}

        // No `VmDriver` in this tree ever returns `Blocked` today -- there is
        // no async page-in source (no file-backed or swap-backed region) that
        // would need to park the faulting thread and resume it later. This
        // arm only exists so `dispatch_page_fault`'s return type stays
        // exhaustive for the day such a driver shows up; until then it is
        // unreachable in practice, not a case that's silently mishandled.
        EventResult::Blocked => {}

        EventResult::Fatal => {
            log::error!("");
            log::error!("accessed address: {:#x}", accessed_address.as_u64());
            log::error!("reason: {:?}", reason);
            log::error!("stack: {:#x?}", stack);

            if from_user {
                log::error!("process: (pid={})", current.process().id().as_u32());
                sched::process::raise_program_exception(ProgramException::MemoryAccess);
            }

            panic!("unhandled page fault at {:#x}", accessed_address.as_u64());
        }
    }
}
