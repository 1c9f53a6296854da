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

//! Kernel-level interrupt vector management.
//!
//! The architecture layer owns the IDT and a fixed pool of interchangeable naked
//! stubs (`arch::x86_64::interrupts::generic`) covering vectors
//! `[GENERIC_BASE, GENERIC_BASE + GENERIC_COUNT)`. Everything below that floor is
//! claimed once at boot for CPU exceptions, legacy IRQs and the four IPI vectors.
//! Drivers and other subsystems that need a real interrupt line go through
//! [`alloc`] to get one of the dynamic vectors and [`attach`] to install their
//! handler; [`dispatch`] is what the generic stubs actually call.

pub mod dpc;
pub mod ipi;

use core::sync::atomic::{AtomicBool, Ordering};

use crate::arch::interrupts::InterruptStack;
use crate::error::{KernelError, Result};
use crate::utils::sync::Mutex;

/// First vector below which everything is reserved by the architecture layer
/// (CPU exceptions, legacy IRQs, IPIs). Kept in sync with
/// `arch::x86_64::interrupts::generic::GENERIC_BASE`.
pub const DYNAMIC_BASE: u8 = crate::arch::interrupts::GENERIC_BASE;
pub const DYNAMIC_COUNT: usize = crate::arch::interrupts::GENERIC_COUNT;

type Handler = fn(usize);

#[derive(Clone, Copy)]
struct Slot {
    claimed: bool,
    handler: Option<Handler>,
    arg: usize,
}

impl Slot {
    const EMPTY: Self = Self {
        claimed: false,
        handler: None,
        arg: 0,
    };
}

static TABLE: Mutex<[Slot; DYNAMIC_COUNT]> = Mutex::new([Slot::EMPTY; DYNAMIC_COUNT]);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

fn index_of(vector: u8) -> Option<usize> {
    let base = DYNAMIC_BASE;

    if vector < base {
        return None;
    }

    let index = (vector - base) as usize;

    if index >= DYNAMIC_COUNT {
        return None;
    }

    Some(index)
}

/// Marks the dynamic vector range ready to hand out. Called once, after the IDT
/// has been loaded.
pub fn init() {
    INITIALIZED.store(true, Ordering::Release);
}

/// Reserves a specific dynamic vector, failing if it is already claimed. Used by
/// callers that were handed a fixed vector number out of band (ACPI routing
/// tables, a fixed MSI allocation scheme, ...).
pub fn claim(vector: u8) -> Result<()> {
    let index = index_of(vector).ok_or(KernelError::InvalidArgument)?;
    let mut table = TABLE.lock();

    if table[index].claimed {
        return Err(KernelError::Busy);
    }

    table[index].claimed = true;
    Ok(())
}

/// Allocates the next free dynamic vector.
pub fn alloc() -> Result<u8> {
    let mut table = TABLE.lock();

    for (index, slot) in table.iter_mut().enumerate() {
        if !slot.claimed {
            slot.claimed = true;
            return Ok(DYNAMIC_BASE + index as u8);
        }
    }

    Err(KernelError::OutOfVectors)
}

/// Installs `handler` on a previously claimed or allocated vector. `arg` is
/// passed back to the handler verbatim on every dispatch; it is typically a
/// pointer to whatever device state the handler needs.
///
/// ## Panics
/// * If `vector` was never claimed via [`claim`] or [`alloc`].
pub fn attach(vector: u8, handler: Handler, arg: usize) -> Result<()> {
    let index = index_of(vector).ok_or(KernelError::InvalidArgument)?;
    let mut table = TABLE.lock();

    if !table[index].claimed {
        panic!("interrupts::attach: vector {} was never claimed", vector);
    }

    table[index].handler = Some(handler);
    table[index].arg = arg;
    Ok(())
}

/// Removes whatever handler is installed on `vector`, leaving the vector
/// claimed (it is not handed back to [`alloc`]).
pub fn detach(vector: u8) -> Result<()> {
    let index = index_of(vector).ok_or(KernelError::InvalidArgument)?;
    let mut table = TABLE.lock();

    table[index].handler = None;
    table[index].arg = 0;
    Ok(())
}

/// Entry point for every dynamically-claimed vector's naked stub. Runs with
/// interrupts disabled and must not block; long-running work belongs in a DPC
/// queued from the handler, not in the handler itself.
#[no_mangle]
pub extern "C" fn dispatch(vector: u8, _stack: &mut InterruptStack) {
    let slot = {
        let table = TABLE.lock();

        match index_of(vector) {
            Some(index) => table[index],
            None => {
                log::warn!("interrupts::dispatch: vector {} out of range", vector);
                return;
            }
        }
    };

    match slot.handler {
        Some(handler) => handler(slot.arg),
        None => log::warn!("interrupts::dispatch: unhandled vector {}", vector),
    }

    unsafe {
        crate::arch::interrupts::INTERRUPT_CONTROLLER.eoi();
    }

    dpc::drain_if_pending();
}
