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

//! The single `Panic(msg)` path: disable interrupts, tell every other core
//! to stop, drain whatever was logged, print a backtrace, halt forever.
//!
//! Symbol resolution goes through `services::symbols::backtrace`, so this
//! file owns only the panic sequence itself.

use core::panic::PanicInfo;

use crate::arch::interrupts;
use crate::interrupts::ipi;
use crate::{logger, rendy, services};

#[panic_handler]
extern "C" fn rust_begin_unwind(info: &PanicInfo) -> ! {
    unsafe {
        interrupts::disable_interrupts();
    }

    // Tell every other core to stop before we touch anything shared (the log
    // ring buffer, the framebuffer) that they might be mid-write on.
    ipi::panic_all_cores();

    unsafe {
        rendy::force_unlock();
        logger::force_unlock();
    }

    if rendy::is_initialized() {
        rendy::clear_screen();
    }

    let cpu_id = unsafe { crate::CPU_ID };
    let message = info.message().unwrap_or(&format_args!(""));

    log::error!("cpu '{}' panicked at '{}'", cpu_id, message);

    if let Some(location) = info.location() {
        log::error!("{}", location);
    }

    log::error!("");
    log::error!("{:━^80}", " BACKTRACE ");

    let frames = services::symbols::backtrace(64);

    if frames.is_empty() {
        log::error!("<empty backtrace>");
    } else {
        for (depth, (addr, symbol)) in frames.iter().enumerate() {
            match symbol {
                Some(name) => log::error!("{:>2}: 0x{:016x} - {}", depth, addr, name),
                None => log::error!("{:>2}: 0x{:016x} - <unknown>", depth, addr),
            }
        }
    }

    logger::drain_to_serial();

    unsafe {
        loop {
            interrupts::halt();
        }
    }
}

/// Called after each unwinding cleanup routine finishes; this kernel never
/// unwinds (every panic is fatal), so this just halts.
#[allow(non_snake_case)]
#[no_mangle]
extern "C" fn _Unwind_Resume(_unwind_context_ptr: usize) -> ! {
    unsafe {
        interrupts::disable_interrupts();

        loop {
            interrupts::halt();
        }
    }
}

#[lang = "eh_personality"]
#[no_mangle]
extern "C" fn rust_eh_personality() -> ! {
    log::error!("rust_eh_personality invoked; this kernel never unwinds");

    unsafe {
        interrupts::disable_interrupts();

        loop {
            interrupts::halt();
        }
    }
}
