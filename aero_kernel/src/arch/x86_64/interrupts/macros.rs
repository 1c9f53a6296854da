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

//! Naked entry-point generators for interrupt gates.
//!
//! Every IDT gate installed through [`super::idt::IdtEntry::set_function`] is invoked
//! directly by the CPU: there is no calling convention that saves the interrupted
//! context's registers for us, and the handler must finish with `iretq` rather than
//! `ret`. These two macros build that stub around an ordinary Rust function body,
//! using the exact push/pop order that makes the resulting stack layout line up with
//! [`super::idt::InterruptStack`]'s field order.
//!
//! `push rax` first, then [`crate::utils::push_scratch`] (which pushes the remaining
//! scratch registers, `r11` last) and [`crate::utils::push_preserved`] (`r15` last)
//! leaves `rsp` pointing at a `PreservedRegisters` immediately followed by a
//! `ScratchRegisters`, matching `InterruptStack`'s declared field order. Unwinding is
//! the exact mirror: `pop_preserved!()` then `pop_scratch!()`, the latter restoring
//! `rax` as its final pop.

/// Defines an interrupt handler that does not need the saved register state.
pub macro interrupt {
    (
        $(#[$outer:meta])*
        $v:vis unsafe fn $name:ident() $body:block
    ) => {
        $(#[$outer])*
        #[naked]
        #[no_mangle]
        $v unsafe extern "C" fn $name() {
            #[inline(never)]
            unsafe extern "C" fn inner() {
                $body
            }

            asm!(
                "push rax",
                $crate::utils::push_scratch!(),
                $crate::utils::push_preserved!(),
                "call {inner}",
                $crate::utils::pop_preserved!(),
                $crate::utils::pop_scratch!(),
                "iretq",
                inner = sym inner,
                options(noreturn),
            );
        }
    }
}

/// Defines an interrupt handler that is handed a `&mut InterruptStack` pointing at
/// the register state saved on entry, for handlers that need to inspect or patch it
/// (for example `breakpoint`-style handlers that rewrite `rip`).
pub macro interrupt_stack {
    (
        $(#[$outer:meta])*
        $v:vis unsafe fn $name:ident($stack:ident : &mut InterruptStack) $body:block
    ) => {
        $(#[$outer])*
        #[naked]
        #[no_mangle]
        $v unsafe extern "C" fn $name() {
            #[inline(never)]
            unsafe extern "C" fn inner(stack: &mut super::idt::InterruptStack) {
                let $stack = stack;
                $body
            }

            asm!(
                "push rax",
                $crate::utils::push_scratch!(),
                $crate::utils::push_preserved!(),
                "mov rdi, rsp",
                "call {inner}",
                $crate::utils::pop_preserved!(),
                $crate::utils::pop_scratch!(),
                "iretq",
                inner = sym inner,
                options(noreturn),
            );
        }
    }
}
