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

use x86_64::instructions::tlb;

use super::interrupt_stack;
use crate::apic;

/// Every core that receives this IPI halts for good. Sent once, by the panicking
/// core, right before it prints its own backtrace.
interrupt_stack!(
    pub unsafe fn abort(stack: &mut InterruptStack) {
        let _ = stack;

        apic::get_local_apic().eoi();

        loop {
            super::halt();
        }
    }
);

/// Nudges a core out of `hlt` so it re-enters the scheduler and notices whatever
/// made it runnable (a new thread enqueued on its run queue, a DPC, ...). Does no
/// work itself: the actual reschedule happens back at Dispatch level.
interrupt_stack!(
    pub unsafe fn reschedule(stack: &mut InterruptStack) {
        let _ = stack;

        apic::get_local_apic().eoi();
        crate::interrupts::dpc::mark_reschedule_pending();
    }
);

interrupt_stack!(
    pub unsafe fn wakeup(stack: &mut InterruptStack) {
        let _ = stack;

        apic::get_local_apic().eoi();
        crate::interrupts::ipi::process_local_mail();
    }
);

/// TLB shootdown IPI: flush this core's TLB for the range the initiator queued in
/// its per-CPU mailbox before the DPC that drains it gets a chance to run.
interrupt_stack!(
    pub unsafe fn tlb(stack: &mut InterruptStack) {
        let _ = stack;

        apic::get_local_apic().eoi();
        tlb::flush_all();

        crate::interrupts::ipi::ack_shootdown();
    }
);
