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

//! Dynamically-allocated interrupt vectors all land on one of these stubs.
//!
//! `idt::init` cannot generate a fresh naked handler per call to
//! `crate::interrupts::alloc`, since the IDT is built once at boot. Instead a fixed
//! pool of interchangeable stubs is installed ahead of time; each one only differs in
//! the literal vector number it hands to `crate::interrupts::dispatch`, which owns the
//! actual handler table.

use super::interrupt_stack;

pub const GENERIC_BASE: u8 = 0x50;
pub const GENERIC_COUNT: usize = 48;
interrupt_stack!(
    pub unsafe fn generic_stub_0(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 0, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_1(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 1, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_2(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 2, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_3(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 3, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_4(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 4, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_5(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 5, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_6(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 6, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_7(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 7, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_8(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 8, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_9(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 9, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_10(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 10, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_11(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 11, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_12(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 12, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_13(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 13, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_14(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 14, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_15(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 15, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_16(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 16, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_17(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 17, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_18(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 18, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_19(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 19, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_20(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 20, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_21(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 21, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_22(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 22, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_23(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 23, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_24(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 24, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_25(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 25, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_26(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 26, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_27(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 27, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_28(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 28, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_29(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 29, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_30(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 30, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_31(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 31, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_32(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 32, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_33(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 33, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_34(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 34, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_35(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 35, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_36(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 36, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_37(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 37, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_38(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 38, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_39(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 39, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_40(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 40, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_41(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 41, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_42(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 42, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_43(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 43, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_44(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 44, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_45(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 45, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_46(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 46, stack);
    }
);
interrupt_stack!(
    pub unsafe fn generic_stub_47(stack: &mut InterruptStack) {
        crate::interrupts::dispatch(GENERIC_BASE + 47, stack);
    }
);
pub static STUBS: [super::idt::InterruptHandlerFn; GENERIC_COUNT] = [
    generic_stub_0,
    generic_stub_1,
    generic_stub_2,
    generic_stub_3,
    generic_stub_4,
    generic_stub_5,
    generic_stub_6,
    generic_stub_7,
    generic_stub_8,
    generic_stub_9,
    generic_stub_10,
    generic_stub_11,
    generic_stub_12,
    generic_stub_13,
    generic_stub_14,
    generic_stub_15,
    generic_stub_16,
    generic_stub_17,
    generic_stub_18,
    generic_stub_19,
    generic_stub_20,
    generic_stub_21,
    generic_stub_22,
    generic_stub_23,
    generic_stub_24,
    generic_stub_25,
    generic_stub_26,
    generic_stub_27,
    generic_stub_28,
    generic_stub_29,
    generic_stub_30,
    generic_stub_31,
    generic_stub_32,
    generic_stub_33,
    generic_stub_34,
    generic_stub_35,
    generic_stub_36,
    generic_stub_37,
    generic_stub_38,
    generic_stub_39,
    generic_stub_40,
    generic_stub_41,
    generic_stub_42,
    generic_stub_43,
    generic_stub_44,
    generic_stub_45,
    generic_stub_46,
    generic_stub_47,
];
