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

//! The address-space-owning container a [`super::ThreadContext`] runs inside.
//! Thin by design: everything about *what* runs belongs to `ThreadContext`,
//! everything about *where it can touch memory* belongs here.

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use spin::Once;

use crate::mem::vm::AddressSpaceVm;
use crate::utils::sync::Mutex;

use super::thread::ThreadContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(u32);

static NEXT_PROCESS_ID: AtomicU32 = AtomicU32::new(1);

impl ProcessId {
    fn allocate() -> Self {
        Self(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// `ProcessId(0)` is reserved for the kernel's own address space (every
/// kernel-only thread, including the per-CPU idle threads) so it never
/// collides with a user-facing process id handed out by [`ProcessId::allocate`].
pub const KERNEL_PROCESS_ID: ProcessId = ProcessId(0);

pub struct Process {
    id: ProcessId,
    address_space: Arc<AddressSpaceVm>,
    threads: Mutex<Vec<Weak<ThreadContext>>>,
    exit_code: Once<i32>,
    thread_count: AtomicUsize,
}

impl Process {
    fn new_with_id(id: ProcessId, address_space: Arc<AddressSpaceVm>) -> Arc<Self> {
        Arc::new(Self {
            id,
            address_space,
            threads: Mutex::new(Vec::new()),
            exit_code: Once::new(),
            thread_count: AtomicUsize::new(0),
        })
    }

    pub fn new(address_space: Arc<AddressSpaceVm>) -> Arc<Self> {
        Self::new_with_id(ProcessId::allocate(), address_space)
    }

    /// The single process every kernel thread not bound to a specific user
    /// process belongs to: the raw kernel address space, wrapped so it fits
    /// [`ThreadContext`]'s `Arc<Process>` requirement.
    pub fn kernel(address_space: Arc<AddressSpaceVm>) -> Arc<Self> {
        Self::new_with_id(KERNEL_PROCESS_ID, address_space)
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn address_space(&self) -> &Arc<AddressSpaceVm> {
        &self.address_space
    }

    pub(super) fn add_thread(&self, thread: &Arc<ThreadContext>) {
        self.thread_count.fetch_add(1, Ordering::AcqRel);
        self.threads.lock().push(Arc::downgrade(thread));
    }

    /// Called by the reaper once a thread belonging to this process reaches
    /// [`super::thread::ThreadState::Dead`]. The last thread to leave a
    /// process with an exit code set drops this process's `Arc`, which in
    /// turn drops its [`AddressSpaceVm`] and everything mapped in it.
    pub(super) fn remove_thread(&self) -> usize {
        self.thread_count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    pub fn set_exit_code(&self, code: i32) {
        self.exit_code.call_once(|| code);
    }
}

/// A fault a user program raised (or triggered) that nothing in the program
/// itself handled. There is no signal-delivery mechanism in this core (no
/// `sigaction`-equivalent a user process can register), so every variant is
/// unconditionally fatal to the raising thread: the exception kind becomes
/// its exit code and the kernel continues running everything else, per
/// spec.md §7.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramException {
    MemoryAccess = 1,
    InvalidInstruction = 2,
    BadOperation = 3,
    Breakpoint = 4,
}

/// Kills the calling thread with `exception`'s code as its exit status.
/// Called from the arch exception handlers (`arch::x86_64::interrupts::exceptions`)
/// once they've determined a fault came from user mode and nothing else will
/// resolve it; never called for a fault taken in kernel mode, which instead
/// always panics.
pub fn raise_program_exception(exception: ProgramException) -> ! {
    let current = super::current();

    log::error!(
        "process: (pid={}) unhandled ProgramException::{:?}, killing thread",
        current.process().id().as_u32(),
        exception
    );

    super::exit(exception as i32)
}
