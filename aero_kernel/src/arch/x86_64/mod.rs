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

pub mod controlregs;
pub mod cpu_local;
pub mod gdt;
pub mod interrupts;
pub mod task;
pub mod tls;

pub use cpu_local::this_cpu_id;

use raw_cpuid::CpuId;

use crate::utils::io;

/// `main.rs` is the sole kernel entry point (Stivale2 header, `kernel_main`,
/// AP startup); this module only provides the primitives every CPU needs
/// once it is running: feature enablement, the GDT/TSS, the IDT, per-CPU
/// storage and the context switch.
pub fn init_cpu() {
    unsafe {
        // Enable the no-execute page protection feature.
        io::wrmsr(io::IA32_EFER, io::rdmsr(io::IA32_EFER) | 1 << 11);

        // Check if SSE is supported. SSE support is a requirement for running Aero.
        let has_sse = CpuId::new()
            .get_feature_info()
            .map_or(false, |i| i.has_sse());

        assert!(has_sse);

        {
            let mut cr0 = controlregs::read_cr0();

            cr0.remove(controlregs::Cr0Flags::EMULATE_COPROCESSOR);
            cr0.insert(controlregs::Cr0Flags::MONITOR_COPROCESSOR);

            controlregs::write_cr0(cr0);
        }

        {
            let mut cr4 = controlregs::read_cr4();

            cr4.insert(controlregs::Cr4Flags::OSFXSR);
            cr4.insert(controlregs::Cr4Flags::OSXMMEXCPT_ENABLE);

            controlregs::write_cr4(cr4);
        }
    }
}
