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

//! A schedulable thread and the stable handle ([`ThreadId`]) other subsystems
//! use to name it without holding a strong reference.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use intrusive_collections::{intrusive_adapter, LinkedListLink};

use crate::arch::task::ArchTask;
use crate::mem::paging::VirtAddr;
use crate::utils::sync::Mutex;

use super::process::Process;

/// Real-time threads occupy `[REALTIME_MIN, 255]` and are scheduled strictly
/// by priority: the highest non-empty bucket always wins, no matter how long
/// a lower one has been waiting. Time-sharing threads occupy
/// `[TIME_SHARE_MIN, REALTIME_MIN)` and round-robin within their bucket, with
/// a transient boost that decays a point per tick. `0` is reserved for each
/// CPU's idle thread and is never a valid priority to hand to
/// [`super::enqueue`].
pub const REALTIME_MIN: u8 = 128;
pub const TIME_SHARE_MIN: u8 = 1;
pub const IDLE_PRIORITY: u8 = 0;

/// A time-sharing thread's quantum, in scheduler ticks, before it is forced
/// back onto the run queue behind threads of the same effective priority.
pub const TIME_SHARE_QUANTUM: u8 = 4;

/// `Setup -> Runnable -> Running -> Blocked -> Dead` (and `Blocked ->
/// Runnable` on wakeup). Every other transition is a bug in the caller and
/// is treated as fatal rather than silently clamped, per the state machine
/// this implements.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Setup = 0,
    Runnable = 1,
    Running = 2,
    Blocked = 3,
    Dead = 4,
}

impl ThreadState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Setup,
            1 => Self::Runnable,
            2 => Self::Running,
            3 => Self::Blocked,
            4 => Self::Dead,
            _ => unreachable!("corrupt ThreadState"),
        }
    }

    fn can_transition_to(self, next: Self) -> bool {
        use ThreadState::*;

        matches!(
            (self, next),
            (Setup, Runnable)
                | (Runnable, Running)
                // A CPU's idle thread is its own permanent fallback: it is
                // re-selected as `Running` every time the run queue goes
                // empty without ever passing back through `Runnable`.
                | (Running, Running)
                | (Running, Runnable)
                | (Running, Blocked)
                | (Running, Dead)
                | (Blocked, Runnable)
                | (Blocked, Dead)
        )
    }
}

/// A stable, reusable name for a thread. `epoch` is bumped every time `index`
/// is recycled so a stale [`ThreadId`] held past its thread's death can never
/// silently resolve to whatever thread was later given the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId {
    index: u32,
    epoch: u32,
}

struct Slot {
    epoch: u32,
    thread: Option<Arc<ThreadContext>>,
}

struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    slots: Vec::new(),
    free: Vec::new(),
});

/// Allocates a [`ThreadId`] and publishes `thread` under it. Called once by
/// [`ThreadContext::new`]; nothing outside this module constructs a
/// [`ThreadId`] directly.
fn register(thread: Arc<ThreadContext>) -> ThreadId {
    let mut registry = REGISTRY.lock();

    if let Some(index) = registry.free.pop() {
        let slot = &mut registry.slots[index as usize];
        slot.thread = Some(thread);

        ThreadId { index, epoch: slot.epoch }
    } else {
        let index = registry.slots.len() as u32;
        registry.slots.push(Slot { epoch: 0, thread: Some(thread) });

        ThreadId { index, epoch: 0 }
    }
}

/// Drops the registry's reference to `id`'s thread and bumps the slot's
/// epoch so the id can never be confused with whatever reuses the slot.
/// Called by the reaper once a [`ThreadContext`] reaches [`ThreadState::Dead`].
pub fn unregister(id: ThreadId) {
    let mut registry = REGISTRY.lock();
    let slot = &mut registry.slots[id.index as usize];

    if slot.epoch == id.epoch {
        slot.thread = None;
        slot.epoch = slot.epoch.wrapping_add(1);
        registry.free.push(id.index);
    }
}

/// Looks a thread up by id, returning `None` if it has already been reaped
/// or the epoch no longer matches (a stale id from a dead thread's old
/// slot).
pub fn lookup(id: ThreadId) -> Option<Arc<ThreadContext>> {
    let registry = REGISTRY.lock();
    let slot = registry.slots.get(id.index as usize)?;

    if slot.epoch == id.epoch {
        slot.thread.clone()
    } else {
        None
    }
}

/// A single schedulable flow of control: architecture register state and
/// kernel stack (via [`ArchTask`]), scheduling state, and the [`Process`] it
/// belongs to. Reference-counted: the scheduler's run queues, the owning
/// [`Process`]'s thread list, and anyone blocked waiting on it all hold an
/// `Arc`. Only the reaper (see [`super::reaper`]) is allowed to observe the
/// final drop of a `Dead` thread's `Arc` and reclaim its stack.
pub struct ThreadContext {
    pub(super) link: LinkedListLink,
    id: UnsafeCell<ThreadId>,
    arch: UnsafeCell<ArchTask>,
    state: AtomicU8,
    priority: u8,
    boost: AtomicU8,
    quantum: AtomicU8,
    queued_bucket: AtomicU8,
    process: Arc<Process>,
    home_cpu: AtomicUsize,
}

unsafe impl Send for ThreadContext {}
unsafe impl Sync for ThreadContext {}

intrusive_adapter!(pub ThreadAdapter = Arc<ThreadContext>: ThreadContext { link: LinkedListLink });

impl ThreadContext {
    fn new(arch: ArchTask, priority: u8, process: Arc<Process>, initial_state: ThreadState) -> Arc<Self> {
        let this = Arc::new(Self {
            link: LinkedListLink::new(),
            id: UnsafeCell::new(ThreadId { index: 0, epoch: 0 }),
            arch: UnsafeCell::new(arch),
            state: AtomicU8::new(initial_state as u8),
            priority,
            boost: AtomicU8::new(0),
            quantum: AtomicU8::new(TIME_SHARE_QUANTUM),
            queued_bucket: AtomicU8::new(0),
            process,
            home_cpu: AtomicUsize::new(usize::MAX),
        });

        let id = register(this.clone());
        unsafe {
            *this.id.get() = id;
        }

        this.process.add_thread(&this);
        this
    }

    /// The CPU's bootstrap idle thread. Starts `Running` rather than `Setup`:
    /// it is not switched *into* through the normal dispatch path, it is just
    /// what the CPU is already executing before the first real schedule.
    pub fn new_idle(process: Arc<Process>) -> Arc<Self> {
        Self::new(ArchTask::new_idle(), IDLE_PRIORITY, process, ThreadState::Running)
    }

    /// A new kernel thread ready to run `entry`, in [`ThreadState::Setup`]
    /// until [`super::enqueue`] makes it runnable.
    pub fn new_kernel(entry: VirtAddr, priority: u8, process: Arc<Process>) -> Arc<Self> {
        assert!(priority >= TIME_SHARE_MIN, "priority 0 is reserved for the idle thread");
        Self::new(ArchTask::new_kernel(entry), priority, process, ThreadState::Setup)
    }

    pub fn id(&self) -> ThreadId {
        unsafe { *self.id.get() }
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Enforces the state machine: panics (fatal, per the spec this
    /// implements) on any transition not in [`ThreadState::can_transition_to`].
    pub(super) fn set_state(&self, next: ThreadState) {
        let prev = self.state();

        assert!(
            prev.can_transition_to(next),
            "Fatal: illegal thread state transition {:?} -> {:?}",
            prev,
            next
        );

        self.state.store(next as u8, Ordering::Release);
    }

    pub fn base_priority(&self) -> u8 {
        self.priority
    }

    pub fn boost(&self) -> u8 {
        self.boost.load(Ordering::Relaxed)
    }

    /// `base priority + transient boost`, clamped to `255`. This is the value
    /// a thread is actually queued under; raising `boost` does not retroactively
    /// move an already-queued thread.
    pub fn effective_priority(&self) -> u8 {
        (self.priority as u16 + self.boost.load(Ordering::Relaxed) as u16).min(255) as u8
    }

    pub(super) fn add_boost(&self, amount: u8) {
        self.boost.fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
            Some(b.saturating_add(amount))
        }).ok();
    }

    /// Decays this thread's transient boost by one tick's worth. Called only
    /// for the thread currently `Running` on a given CPU.
    pub(super) fn decay_boost(&self) {
        self.boost.fetch_update(Ordering::AcqRel, Ordering::Acquire, |b| {
            Some(b.saturating_sub(1))
        }).ok();
    }

    pub(super) fn reset_quantum(&self) {
        self.quantum.store(TIME_SHARE_QUANTUM, Ordering::Relaxed);
    }

    /// Ticks the time-sharing quantum down, returning `true` once it has run
    /// out (real-time threads never expire their quantum: they only yield the
    /// CPU voluntarily or to a higher-priority thread).
    pub(super) fn tick_quantum(&self) -> bool {
        if self.priority >= REALTIME_MIN {
            return false;
        }

        self.quantum.fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
            Some(q.saturating_sub(1))
        }).ok();

        self.quantum.load(Ordering::Acquire) == 0
    }

    /// The priority bucket this thread is currently linked into, recorded at
    /// enqueue time so [`super::dequeue`] can find it again even if `boost`
    /// has since decayed (queued threads are never re-bucketed in place).
    pub(super) fn queued_bucket(&self) -> u8 {
        self.queued_bucket.load(Ordering::Acquire)
    }

    pub(super) fn set_queued_bucket(&self, bucket: u8) {
        self.queued_bucket.store(bucket, Ordering::Release);
    }

    pub(super) fn home_cpu(&self) -> Option<usize> {
        match self.home_cpu.load(Ordering::Acquire) {
            usize::MAX => None,
            cpu => Some(cpu),
        }
    }

    pub(super) fn set_home_cpu(&self, cpu: usize) {
        self.home_cpu.store(cpu, Ordering::Release);
    }

    /// Only [`super`]'s context-switch path calls these, and only while
    /// holding the run queue lock that keeps this thread from being switched
    /// to concurrently on another CPU.
    pub(super) fn arch_task(&self) -> &ArchTask {
        unsafe { &*self.arch.get() }
    }

    #[allow(clippy::mut_from_ref)]
    pub(super) fn arch_task_mut(&self) -> &mut ArchTask {
        unsafe { &mut *self.arch.get() }
    }
}

impl Drop for ThreadContext {
    fn drop(&mut self) {
        debug_assert_eq!(self.state(), ThreadState::Dead, "ThreadContext dropped while still schedulable");
    }
}
