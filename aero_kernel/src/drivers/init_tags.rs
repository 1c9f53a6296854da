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

//! The init-tag chain a hardware probe hands to [`super::manager`]: a
//! heterogeneous list describing how a device was found and where its
//! resources live, so a driver's entry point doesn't need to know which
//! enumeration path (PCI, MMIO platform device, ...) produced it.

use alloc::vec::Vec;

/// One resource/identity fact about a probed device. `machine_name` matching
/// in [`super::manager`] only ever looks at the variants it understands for
/// a given manifest; unrecognized tags are simply skipped.
#[derive(Debug, Clone, Copy)]
pub enum InitTag {
    /// `vendor_id`/`device_id` are the raw PCI configuration-space registers
    /// (offsets `0x00`/`0x02`), not [`super::pci::Vendor`]/[`super::pci::DeviceType`]'s
    /// class-code classification -- matching a manifest is a vendor/device
    /// tuple lookup, not a device-class one.
    Pci {
        bus: u8,
        device: u8,
        function: u8,
        vendor_id: u16,
        device_id: u16,
    },
    Mmio {
        base: usize,
        size: usize,
    },
    Acpi {
        hardware_id: [u8; 8],
    },
}

/// The chain itself. Built once per probed device by [`super::manager`] and
/// borrowed by the matched manifest's entry point; never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct InitTagChain(Vec<InitTag>);

impl InitTagChain {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, tag: InitTag) -> &mut Self {
        self.0.push(tag);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &InitTag> {
        self.0.iter()
    }

    pub fn pci(&self) -> Option<(u8, u8, u8, u16, u16)> {
        self.0.iter().find_map(|tag| match *tag {
            InitTag::Pci {
                bus,
                device,
                function,
                vendor_id,
                device_id,
            } => Some((bus, device, function, vendor_id, device_id)),
            _ => None,
        })
    }

    pub fn mmio(&self) -> Option<(usize, usize)> {
        self.0.iter().find_map(|tag| match *tag {
            InitTag::Mmio { base, size } => Some((base, size)),
            _ => None,
        })
    }
}
