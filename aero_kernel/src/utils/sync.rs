// Copyright (C) 2021-2024 The Aero Project Developers.
//
// This file is part of The Aero Project.
//
// Aero is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Aero is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Aero. If not, see <https://www.gnu.org/licenses/>.

use core::cell::UnsafeCell;
use core::sync::atomic::Ordering;

use crate::arch::interrupts;

/// Helper guard structure used to lock interrupts. When dropped, interrupts
/// are enabled again. This is useful for volatile operations where we don't
/// want to be interrupted.
pub struct IrqGuard {
    locked: bool,
}

impl IrqGuard {
    /// Creates a new IRQ guard. See the [`IrqGuard`] documentation for more.
    pub fn new() -> Self {
        let locked = interrupts::is_enabled();

        unsafe {
            interrupts::disable_interrupts();
        }

        Self { locked }
    }
}

impl Drop for IrqGuard {
    /// Drops the IRQ guard, enabling interrupts again. See the [`IrqGuard`]
    /// documentation for more.
    fn drop(&mut self) {
        if self.locked {
            unsafe { interrupts::enable_interrupts() }
        }
    }
}

/// A spin-based lock providing mutually exclusive access to data.
pub struct Mutex<T: ?Sized> {
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new [`Mutex`] wrapping the supplied data.
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Locks the [`Mutex`] and returns a guard that permits access to the inner data.
    ///
    /// The returned value may be dereferenced for data access and the lock will be dropped
    /// when the guard falls out of scope.
    pub fn lock(&self) -> MutexGuard<T> {
        MutexGuard {
            guard: core::mem::ManuallyDrop::new(self.inner.lock()),
            irq_lock: false,
        }
    }

    /// Locks the [`Mutex`] and returns a IRQ guard that permits access to the inner data and
    /// disables interrupts while the lock is held.
    ///
    /// The returned value may be dereferenced for data access and the lock will be dropped and
    /// interrupts will be re-enabled when the guard falls out of scope. Deadlocks occur if a thread
    /// tries to acquire a lock that will never become free. Thus, locking interrupts is useful for
    /// volatile operations where we might be interrupted.
    pub fn lock_irq(&self) -> MutexGuard<T> {
        let irq_lock = interrupts::is_enabled();

        unsafe {
            interrupts::disable_interrupts();
        }

        MutexGuard {
            guard: core::mem::ManuallyDrop::new(self.inner.lock()),
            irq_lock,
        }
    }

    /// Force unlock this [`Mutex`].
    ///
    /// # Safety
    ///
    /// This is *extremely* unsafe if the lock is not held by the current thread. However, this
    /// can be useful in some instances for exposing the lock to FFI that doesn't know how to deal
    /// with RAII.
    pub unsafe fn force_unlock(&self) {
        self.inner.force_unlock()
    }
}

pub struct MutexGuard<'a, T: ?Sized + 'a> {
    guard: core::mem::ManuallyDrop<spin::MutexGuard<'a, T>>,
    irq_lock: bool,
}

impl<T: ?Sized> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> core::ops::DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        unsafe {
            core::mem::ManuallyDrop::drop(&mut self.guard);
        }

        if self.irq_lock {
            unsafe {
                interrupts::enable_interrupts();
            }
        }
    }
}

/// A fair, FIFO-ordered spin lock used for the hot allocator paths (PMM
/// domain free lists, the wired heap's central slabs, the driver registry)
/// where an unfair [`Mutex`] could starve a CPU under contention.
pub struct TicketLock<T: ?Sized> {
    next: core::sync::atomic::AtomicUsize,
    now_serving: core::sync::atomic::AtomicUsize,
    value: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for TicketLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for TicketLock<T> {}

impl<T> TicketLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            next: core::sync::atomic::AtomicUsize::new(0),
            now_serving: core::sync::atomic::AtomicUsize::new(0),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> TicketLockGuard<T> {
        let ticket = self.next.fetch_add(1, Ordering::AcqRel);

        while self.now_serving.load(Ordering::Acquire) != ticket {
            core::hint::spin_loop();
        }

        TicketLockGuard { lock: self }
    }
}

pub struct TicketLockGuard<'a, T: ?Sized> {
    lock: &'a TicketLock<T>,
}

impl<T: ?Sized> core::ops::Deref for TicketLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: ?Sized> core::ops::DerefMut for TicketLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: ?Sized> Drop for TicketLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

/// Reader-writer lock restricted by convention to Passive-level callers (the
/// VFS node cache and the kernel map's region tree are the only users: both
/// are only ever touched with a thread context, never from an interrupt or a
/// DPC). Thin wrapper over [`spin::RwLock`] so the lock-order checker below
/// has a single type to track regardless of which primitive backs it.
pub struct RwLock<T: ?Sized> {
    inner: spin::RwLock<T>,
}

impl<T> RwLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::RwLock::new(value),
        }
    }

    pub fn read(&self) -> spin::RwLockReadGuard<T> {
        self.inner.read()
    }

    pub fn write(&self) -> spin::RwLockWriteGuard<T> {
        self.inner.write()
    }
}

/// Lock ranks, outermost to innermost, per the documented order:
/// `process.vmm -> region.lock -> scheduler.lock -> pmm.domain.lock -> wiredheap.lock`.
/// A lower rank must never be acquired while a higher rank from this list is
/// already held by the same CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LockRank {
    ProcessVmm = 0,
    Region = 1,
    Scheduler = 2,
    PmmDomain = 3,
    WiredHeap = 4,
}

/// Debug-only per-CPU stack of currently held lock ranks. Compiled out
/// entirely when `debug_assertions` is off so release builds pay nothing for
/// it; `wired_heap`/`pmm` are on the hot path and cannot afford a runtime
/// check in release mode.
#[cfg(debug_assertions)]
pub mod lock_order {
    use super::LockRank;
    use crate::utils::PerCpu;

    struct HeldLocks {
        stack: [Option<LockRank>; 8],
        len: usize,
    }

    unsafe impl Sync for PerCpu<HeldLocks> {}

    static HELD: spin::Once<PerCpu<HeldLocks>> = spin::Once::new();

    fn held() -> &'static PerCpu<HeldLocks> {
        HELD.call_once(|| {
            PerCpu::new(|| HeldLocks {
                stack: [None; 8],
                len: 0,
            })
        })
    }

    /// Call immediately before taking a lock of rank `rank`. Panics if a
    /// lower-ranked (more inner) lock is already held by this CPU, which
    /// would violate the documented acquisition order.
    pub fn acquire(rank: LockRank) {
        let locks = held().get_mut();

        if let Some(top) = locks.stack[..locks.len].last() {
            if let Some(top) = top {
                if *top > rank {
                    panic!("Fatal: lock order violation: tried to acquire {:?} while holding {:?}", rank, top);
                }
            }
        }

        assert!(locks.len < locks.stack.len(), "lock_order: held-lock stack overflow");
        locks.stack[locks.len] = Some(rank);
        locks.len += 1;
    }

    /// Call immediately after releasing a lock of rank `rank`.
    pub fn release(rank: LockRank) {
        let locks = held().get_mut();

        assert!(locks.len > 0, "lock_order: release with no locks held");
        locks.len -= 1;

        debug_assert_eq!(locks.stack[locks.len], Some(rank), "lock_order: release/acquire mismatch");
        locks.stack[locks.len] = None;
    }
}

#[cfg(not(debug_assertions))]
pub mod lock_order {
    use super::LockRank;

    #[inline(always)]
    pub fn acquire(_rank: LockRank) {}

    #[inline(always)]
    pub fn release(_rank: LockRank) {}
}
