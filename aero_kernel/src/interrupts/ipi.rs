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

//! Inter-processor interrupts: the MPSC mailbox, the TLB shootdown queue, and
//! the `PanicAllCores` broadcast.
//!
//! The four IPI vectors themselves (`Abort`, `Reschedule`, `Wakeup`,
//! `TlbShootdown`) are fixed and pre-claimed below [`super::DYNAMIC_BASE`]; the
//! naked stubs that receive them live in `arch::x86_64::interrupts::ipi` and
//! call back into the functions here.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::Ordering;
use spin::Once;

use crate::apic;
use crate::arch::interrupts::{IPI_ABORT, IPI_RESCHEDULE, IPI_TLB_SHOOTDOWN, IPI_WAKEUP};
use crate::mem::paging::VirtAddr;
use crate::mem::vm::ShootdownDetails;
use crate::utils::sync::Mutex;
use crate::utils::PerCpu;

type MailFn = fn(usize);

unsafe impl Sync for PerCpu<Mutex<VecDeque<(MailFn, usize)>>> {}

static MAILBOXES: Once<PerCpu<Mutex<VecDeque<(MailFn, usize)>>>> = Once::new();
static SHOOTDOWNS: Mutex<Vec<Arc<ShootdownDetails>>> = Mutex::new(Vec::new());

fn mailboxes() -> &'static PerCpu<Mutex<VecDeque<(MailFn, usize)>>> {
    MAILBOXES.call_once(|| PerCpu::new(|| Mutex::new(VecDeque::new())))
}

fn send_to(cpu: usize, vector: u8) {
    // Grounded in the AP bring-up path in `acpi::madt::Madt::init`, which
    // hands the local APIC id straight through as the logical cpu id passed
    // to `cpu_local::init`: CPU index and local APIC id are the same number.
    unsafe {
        apic::get_local_apic().send_ipi(cpu as u32, vector);
    }
}

/// Queues `f(arg)` on `cpu`'s mailbox and nudges it with the `Wakeup` IPI.
/// Ordering between two calls targeting the same `cpu` from the same caller
/// is preserved; no ordering is implied across different callers.
pub fn send_smp_mail(cpu: usize, f: MailFn, arg: usize) {
    let target = unsafe { &*mailboxes().as_mut_ptr_for(cpu) };
    target.lock().push_back((f, arg));

    send_to(cpu, IPI_WAKEUP);
}

/// Drains the current CPU's mailbox. Called from the `Wakeup` IPI handler.
pub fn process_local_mail() {
    loop {
        let next = mailboxes().get().lock().pop_front();

        match next {
            Some((f, arg)) => f(arg),
            None => break,
        }
    }
}

/// Sends the `Reschedule` IPI to `cpu`, causing it to re-enter the scheduler
/// the next time it drains DPCs.
pub fn send_reschedule(cpu: usize) {
    send_to(cpu, IPI_RESCHEDULE);
}

/// Queues a TLB shootdown for every CPU set in `cpu_mask` covering
/// `[base, base + length)` and blocks until each one has acknowledged it.
/// `cpu_mask` is a bitmap with bit `n` meaning "CPU `n` has this range
/// mapped and must flush it"; a CPU never needs to shoot down its own TLB
/// through this path, it just flushes locally before calling this.
pub fn shootdown_tlb(cpu_mask: u64, base: VirtAddr, length: u64) {
    if cpu_mask == 0 {
        return;
    }

    let request = Arc::new(ShootdownDetails::new(base, length, cpu_mask));
    SHOOTDOWNS.lock().push(request.clone());

    for cpu in 0..64 {
        if cpu_mask & (1 << cpu) != 0 {
            send_to(cpu, IPI_TLB_SHOOTDOWN);
        }
    }

    while !request.is_complete() {
        core::hint::spin_loop();
    }

    SHOOTDOWNS.lock().retain(|r| !Arc::ptr_eq(r, &request));
}

/// Clears the current CPU's bit in every in-flight shootdown request. Called
/// by the `TlbShootdown` IPI handler after it has flushed its own TLB.
pub fn ack_shootdown() {
    let cpu_bit = 1u64 << crate::arch::this_cpu_id();

    for request in SHOOTDOWNS.lock().iter() {
        request.pending.fetch_and(!cpu_bit, Ordering::AcqRel);
    }
}

/// Sends the `Abort` IPI to every other CPU. Each recipient disables
/// interrupts, EOIs, and halts for good; used once by a panicking core right
/// before it prints its own backtrace, so no other core keeps running (and
/// possibly corrupting shared state) while the panic message is on its way
/// out.
pub fn panic_all_cores() {
    unsafe {
        apic::get_local_apic().send_ipi_all_but_self(IPI_ABORT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ORDER: Mutex<Vec<usize>> = Mutex::new(Vec::new());

    fn record_first(_: usize) {
        ORDER.lock().push(1);
    }

    fn record_second(_: usize) {
        ORDER.lock().push(2);
    }

    /// Property 6: two callbacks queued on the same mailbox in order `A, B`
    /// must run in that order when the mailbox is drained. `send_smp_mail`
    /// itself also raises a real IPI, which isn't exercised here -- this
    /// checks the queue discipline underneath it directly.
    #[test]
    fn mailbox_drains_in_fifo_order() {
        ORDER.lock().clear();
        let cpu = crate::arch::this_cpu_id();

        let target = unsafe { &*mailboxes().as_mut_ptr_for(cpu) };
        target.lock().push_back((record_first as MailFn, 0));
        target.lock().push_back((record_second as MailFn, 0));

        process_local_mail();

        assert_eq!(&*ORDER.lock(), &[1, 2]);
    }

    #[test]
    fn shootdown_of_empty_mask_is_a_no_op() {
        // Mask 0 means no CPU holds the translation; must return immediately
        // rather than queuing a request nothing will ever acknowledge.
        shootdown_tlb(0, VirtAddr::new(0x1000), 0x1000);
        assert!(SHOOTDOWNS.lock().is_empty());
    }
}
