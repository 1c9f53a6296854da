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

//! The `DeviceApi` tagged-union family a driver's entry point publishes via
//! `npk_add_device_api`. Every concrete variant leads with [`DeviceApiHeader`]
//! at a fixed offset, so a `*mut DeviceApiHeader` handed back across the ABI
//! boundary can be widened to the concrete type once `api_type` is checked.

use core::ffi::c_void;

pub type DeviceId = u32;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceApiType {
    SysPower = 0,
    Framebuffer = 1,
    Block = 2,
}

/// The fields every `*Api` struct below must lead with, in this order.
/// `id` is filled in by `npk_add_device_api`, not the driver; a driver
/// publishes a header with `id` left at `0`.
#[repr(C)]
pub struct DeviceApiHeader {
    pub id: DeviceId,
    pub api_type: DeviceApiType,
    pub driver_data: *mut c_void,
    pub get_summary: extern "C" fn(*mut c_void, *mut u8, usize) -> usize,
}

#[repr(C)]
pub struct SysPowerApi {
    pub header: DeviceApiHeader,
    pub power_off: extern "C" fn(*mut c_void) -> !,
    pub reboot: extern "C" fn(*mut c_void) -> !,
}

#[repr(C)]
pub struct FramebufferApi {
    pub header: DeviceApiHeader,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bpp: u32,
    pub map: extern "C" fn(*mut c_void) -> *mut u8,
}

#[repr(C)]
pub struct BlockApi {
    pub header: DeviceApiHeader,
    pub block_size: u32,
    pub block_count: u64,
    pub read: extern "C" fn(*mut c_void, u64, *mut u8, usize) -> isize,
    pub write: extern "C" fn(*mut c_void, u64, *const u8, usize) -> isize,
}
