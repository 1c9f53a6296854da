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

//! A tiny keyboard-chord-to-callback registry. Kept as its own minimal
//! service because it's part of the driver ABI surface
//! (`crate::abi::npk_send_magic_key`) even though no concrete keyboard
//! driver ships with this core.

use alloc::vec::Vec;

use crate::utils::sync::Mutex;

static CALLBACKS: Mutex<Vec<(u32, fn(u32))>> = Mutex::new(Vec::new());

/// Registers `callback` to run whenever [`handle_key`] is called with `key`.
/// Replaces any existing registration for the same key.
pub fn add(key: u32, callback: fn(u32)) {
    let mut callbacks = CALLBACKS.lock();
    callbacks.retain(|&(k, _)| k != key);
    callbacks.push((key, callback));
}

/// Removes `key`'s registration, if any. Returns whether one was removed.
pub fn remove(key: u32) -> bool {
    let mut callbacks = CALLBACKS.lock();
    let before = callbacks.len();
    callbacks.retain(|&(k, _)| k != key);
    callbacks.len() != before
}

/// Dispatches `key` to its registered callback, if any. A driver's input
/// handler calls this whenever it recognizes a magic-key chord; most keys
/// have no registration and this is a no-op.
pub fn handle_key(key: u32) {
    let callback = CALLBACKS.lock().iter().find(|&&(k, _)| k == key).map(|&(_, cb)| cb);

    if let Some(callback) = callback {
        callback(key);
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    static SEEN: AtomicU32 = AtomicU32::new(0);

    fn record(key: u32) {
        SEEN.store(key, Ordering::SeqCst);
    }

    #[test]
    fn registered_callback_runs_on_matching_key() {
        add(42, record);
        handle_key(42);
        assert_eq!(SEEN.load(Ordering::SeqCst), 42);

        assert!(remove(42));
        SEEN.store(0, Ordering::SeqCst);
        handle_key(42);
        assert_eq!(SEEN.load(Ordering::SeqCst), 0);
    }
}
