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

//! Both boot protocols this kernel supports hand each AP its entry point
//! already running in long mode (Limine's and Stivale2's SMP tags both take
//! a `goto_address`), so there is no real-mode trampoline to assemble at
//! build time; `main.rs`'s `kernel_ap_startup` is the whole AP entry path.

fn main() {
    println!("cargo:rerun-if-changed=.cargo/kernel.ld");
}
