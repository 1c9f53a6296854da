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

//! Driver manifest registry, device binding, and the device-API table the
//! stable `npk_*` ABI (`crate::abi`) publishes into and dispatches events
//! out of.
//!
//! Manifests are registered from the `.kernel_modules.init` linker section
//! [`super`] already walks at boot -- drivers are linked directly into the
//! kernel image, kept here as the *loading* path since dynamic ELF module
//! loading is out of scope -- each registered
//! `fn()` calls [`register_manifest`] instead of touching a driver-specific
//! table directly, so one registry serves every bus a probe walks.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use uapi::device_api::{DeviceApiHeader, DeviceId};

use crate::error::{KernelError, Result};
use crate::utils::sync::Mutex;

use super::init_tags::InitTagChain;

/// A driver's entry point: given the init-tag chain that identified its
/// device, returns the `DeviceApi*` it wants published, or `None` if the
/// device turned out not to be usable (e.g. a later register read disagreed
/// with the probe).
pub type DriverEntryFn = fn(&InitTagChain) -> Option<*mut DeviceApiHeader>;

/// Torn down once for every `DeviceApi*` the driver had published, right
/// before that device-API entry is actually unpublished.
pub type DriverDeinitFn = fn(*mut DeviceApiHeader);

/// An event-subscribed driver's handler, see [`handle_event`].
pub type DriverEventFn = fn(DeviceId, u32, usize);

/// A statically-registered driver, matched against a probed device's
/// [`InitTagChain`] by `machine_name`: an opaque byte pattern compared
/// against a PCI vendor/device tuple, an MMIO platform id, or an ACPI
/// hardware id, depending on which tag a manifest's [`matches`] cares about.
pub struct DriverManifest {
    pub machine_name: &'static [u8],
    pub friendly_name: &'static str,
    pub entry: DriverEntryFn,
    pub deinit: DriverDeinitFn,
    pub on_event: Option<DriverEventFn>,
}

unsafe impl Sync for DriverManifest {}

static MANIFESTS: Mutex<Vec<&'static DriverManifest>> = Mutex::new(Vec::new());

/// Adds `manifest` to the registry. Called once per driver from the module
/// init function the `.kernel_modules.init` linker section invokes at boot.
pub fn register_manifest(manifest: &'static DriverManifest) {
    MANIFESTS.lock().push(manifest);
}

fn matches(manifest: &DriverManifest, tags: &InitTagChain) -> bool {
    if let Some((_, _, _, vendor_id, device_id)) = tags.pci() {
        let pattern = [
            (vendor_id & 0xff) as u8,
            (vendor_id >> 8) as u8,
            (device_id & 0xff) as u8,
            (device_id >> 8) as u8,
        ];

        if manifest.machine_name == &pattern[..] {
            return true;
        }
    }

    if let Some(InitTagChainAcpi(hardware_id)) = tags.acpi_id() {
        return manifest.machine_name == &hardware_id[..];
    }

    false
}

/// Local helper type so [`matches`] can destructure [`InitTagChain::acpi_id`]'s
/// result the same way it does the PCI tuple above.
struct InitTagChainAcpi([u8; 8]);

impl InitTagChain {
    fn acpi_id(&self) -> Option<InitTagChainAcpi> {
        self.iter().find_map(|tag| match tag {
            super::init_tags::InitTag::Acpi { hardware_id } => Some(InitTagChainAcpi(*hardware_id)),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct DriverId(u32);

static NEXT_DRIVER_ID: AtomicU32 = AtomicU32::new(1);

struct LoadedDriver {
    manifest: &'static DriverManifest,
    /// Drivers here are linked directly into the kernel image (see the
    /// module doc comment), so there is no separate image to map/unmap; this
    /// is a placeholder for the day a driver can be loaded from the VFS as a
    /// standalone ELF object.
    exported_symbols: BTreeMap<&'static str, usize>,
    /// Device-API ids this driver has published, so [`remove_device_api`]
    /// can tell when the last one has gone and the record can be dropped.
    published: Mutex<Vec<DeviceId>>,
}

static LOADED_DRIVERS: Mutex<BTreeMap<DriverId, Arc<LoadedDriver>>> = Mutex::new(BTreeMap::new());

struct DeviceApiEntry {
    header: *mut DeviceApiHeader,
    owner: DriverId,
}

unsafe impl Send for DeviceApiEntry {}
unsafe impl Sync for DeviceApiEntry {}

static DEVICE_API_TABLE: Mutex<BTreeMap<DeviceId, DeviceApiEntry>> = Mutex::new(BTreeMap::new());
static NEXT_DEVICE_ID: AtomicU32 = AtomicU32::new(1);

/// The [`LoadedDriver`] currently running inside its own `entry`, if any, so
/// [`add_device_api`] can attribute a device published mid-bind to the right
/// driver without threading an extra argument through every call site. Set
/// only around [`bind`]'s call into `entry`; `crate::abi::npk_add_device_api`
/// reads it the same way when a driver calls it directly, which is why
/// `add_device_api` itself never takes a driver argument.
#[thread_local]
static mut CURRENT_SHADOW: u32 = 0;

/// Finds the manifest matching `tags`, runs its entry point, and publishes
/// the `DeviceApi*` it returns. Returns [`KernelError::NotFound`] if no
/// registered manifest's `machine_name` matches.
pub fn bind(tags: InitTagChain) -> Result<DeviceId> {
    let manifest = {
        let manifests = MANIFESTS.lock();
        manifests
            .iter()
            .find(|m| matches(*m, &tags))
            .copied()
            .ok_or(KernelError::NotFound)?
    };

    let driver = Arc::new(LoadedDriver {
        manifest,
        exported_symbols: BTreeMap::new(),
        published: Mutex::new(Vec::new()),
    });

    let id = DriverId(NEXT_DRIVER_ID.fetch_add(1, Ordering::Relaxed));
    LOADED_DRIVERS.lock().insert(id, driver.clone());

    unsafe {
        CURRENT_SHADOW = id.0;
    }

    let published = (manifest.entry)(&tags);

    unsafe {
        CURRENT_SHADOW = 0;
    }

    let header = match published {
        Some(header) => header,
        None => {
            LOADED_DRIVERS.lock().remove(&id);
            return Err(KernelError::NotFound);
        }
    };

    log::info!(
        "drivers::manager: bound `{}` ({} exported symbols)",
        manifest.friendly_name,
        driver.exported_symbols.len()
    );

    Ok(publish(header, id))
}

fn publish(header: *mut DeviceApiHeader, owner: DriverId) -> DeviceId {
    let id = NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed);

    unsafe {
        (*header).id = id;
    }

    DEVICE_API_TABLE.lock().insert(id, DeviceApiEntry { header, owner });

    if let Some(driver) = LOADED_DRIVERS.lock().get(&owner) {
        driver.published.lock().push(id);
    }

    id
}

/// Publishes a `DeviceApi*` on behalf of whichever driver is currently
/// running -- either inside [`bind`]'s call into `entry`, or later from
/// `crate::abi::npk_add_device_api`.
pub fn add_device_api(header: *mut DeviceApiHeader) -> Result<DeviceId> {
    let owner = DriverId(unsafe { CURRENT_SHADOW });

    if owner.0 == 0 {
        return Err(KernelError::PermissionDenied);
    }

    Ok(publish(header, owner))
}

/// Tears down the device-API entry, calls the owning driver's `Deinit`, and
/// drops the [`LoadedDriver`] record once it has published nothing else.
pub fn remove_device_api(id: DeviceId) -> Result<()> {
    let entry = DEVICE_API_TABLE.lock().remove(&id).ok_or(KernelError::NotFound)?;

    let driver = LOADED_DRIVERS.lock().get(&entry.owner).cloned().ok_or(KernelError::NotFound)?;

    (driver.manifest.deinit)(entry.header);

    let mut published = driver.published.lock();
    published.retain(|&d| d != id);
    let remaining = published.len();
    drop(published);

    if remaining == 0 {
        LOADED_DRIVERS.lock().remove(&entry.owner);
    }

    Ok(())
}

/// Dispatches `(type, arg)` to whichever driver owns `device_id`, if it
/// registered an event handler.
pub fn handle_event(device_id: DeviceId, event_type: u32, arg: usize) -> Result<()> {
    let owner = {
        let table = DEVICE_API_TABLE.lock();
        table.get(&device_id).ok_or(KernelError::NotFound)?.owner
    };

    let driver = LOADED_DRIVERS.lock().get(&owner).cloned().ok_or(KernelError::NotFound)?;

    if let Some(handler) = driver.manifest.on_event {
        handler(device_id, event_type, arg);
    }

    Ok(())
}

/// Looks up a published device-API header by id, for `crate::abi` entry
/// points that operate on an existing device (e.g. reading back a summary).
pub fn device_api(id: DeviceId) -> Option<*mut DeviceApiHeader> {
    DEVICE_API_TABLE.lock().get(&id).map(|entry| entry.header)
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    #[test]
    fn machine_name_matches_pci_vendor_device_pair() {
        fn entry(_: &InitTagChain) -> Option<*mut DeviceApiHeader> {
            None
        }
        fn deinit(_: *mut DeviceApiHeader) {}

        let manifest = Box::leak(Box::new(DriverManifest {
            machine_name: &[0x34, 0x12, 0x11, 0x11],
            friendly_name: "synthetic-test-device",
            entry,
            deinit,
            on_event: None,
        }));

        let mut tags = InitTagChain::new();
        tags.push(super::super::init_tags::InitTag::Pci {
            bus: 0,
            device: 1,
            function: 0,
            vendor_id: 0x1234,
            device_id: 0x1111,
        });

        assert!(matches(manifest, &tags));
    }
}
