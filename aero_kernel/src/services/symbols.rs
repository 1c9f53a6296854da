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

//! The kernel's own `.symtab`, parsed lazily out of the running image so
//! [`crate::panic`] can print a demangled backtrace. Extracted out of what
//! used to be `unwind::unwind_stack_trace`'s inline parsing so the symbol
//! lookup has a home independent of the panic path itself.

use alloc::string::String;
use alloc::vec::Vec;

use spin::Once;
use xmas_elf::sections::{SectionData, ShType};
use xmas_elf::symbol_table::Entry;
use xmas_elf::ElfFile;

use crate::mem::paging::VirtAddr;

static KERNEL_IMAGE: Once<&'static [u8]> = Once::new();

/// Records where the running kernel's own ELF image lives in memory. Called
/// once at boot with the bounds `main.rs` already computes for the PMM
/// bootstrap (`kernel_base` / `KERNEL_IMAGE_MAX_SIZE`).
pub fn init(base: VirtAddr, size: u64) {
    KERNEL_IMAGE.call_once(|| unsafe {
        core::slice::from_raw_parts(base.as_ptr(), size as usize)
    });
}

fn image() -> Option<ElfFile<'static>> {
    ElfFile::new(*KERNEL_IMAGE.get()?).ok()
}

/// Resolves `addr` to the symbol containing it, if any: `(demangled name,
/// symbol start, symbol size)`.
pub fn resolve(addr: usize) -> Option<(String, usize, usize)> {
    let elf = image()?;

    for section in elf.section_iter() {
        if section.get_type() != Ok(ShType::SymTab) {
            continue;
        }

        let section_data = match section.get_data(&elf) {
            Ok(data) => data,
            Err(_) => continue,
        };

        if let SectionData::SymbolTable64(symtab) = section_data {
            for entry in symtab {
                let start = entry.value() as usize;
                let size = entry.size() as usize;

                if addr >= start && addr < start + size {
                    let name = entry.get_name(&elf).unwrap_or("<unknown>");
                    return Some((alloc::format!("{}", rustc_demangle::demangle(name)), start, size));
                }
            }
        }
    }

    None
}

/// Walks the RBP chain starting at the caller's frame, resolving up to
/// `max_frames` return addresses. Returns an empty backtrace (rather than
/// erroring) if frame pointers were not emitted for this build.
pub fn backtrace(max_frames: usize) -> Vec<(usize, Option<String>)> {
    let mut frames = Vec::new();
    let mut rbp: usize;

    unsafe {
        asm!("mov {}, rbp", out(reg) rbp);
    }

    if rbp == 0 {
        return frames;
    }

    for _ in 0..max_frames {
        let rip_slot = match rbp.checked_add(core::mem::size_of::<usize>()) {
            Some(slot) => slot,
            None => break,
        };

        let rip = unsafe { *(rip_slot as *const usize) };

        if rip == 0 {
            break;
        }

        let symbol = resolve(rip).map(|(name, _, _)| name);
        frames.push((rip, symbol));

        rbp = unsafe { *(rbp as *const usize) };

        if rbp == 0 {
            break;
        }
    }

    frames
}
