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

//! Per-CPU, priority-banded, cooperative scheduler.
//!
//! Every CPU owns its own run queue (no cross-CPU work-stealing: a thread
//! picked up by [`enqueue`] stays on whichever CPU's queue it landed on until
//! it blocks or dies). Threads occupy one priority bucket in `[1, 255]`;
//! `[128, 255]` is the real-time band and is scheduled by strict priority,
//! `[1, 127]` is the time-sharing band and round-robins within a bucket with
//! a boost that decays a point per tick. Priority `0` is reserved for each
//! CPU's idle thread, which never goes through a run queue at all: it is
//! simply what [`pick_next`] falls back to when every bucket is empty.
//!
//! Run queues are intrusive doubly-linked lists per priority bucket;
//! `arch::task::arch_task_spinup` is the `SwitchExecFrame` primitive this
//! module is the sole owner of.

pub mod process;
pub mod thread;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Once;

use intrusive_collections::LinkedList;

use crate::mem::paging::VirtAddr;
use crate::mem::vm::AddressSpaceVm;
use crate::mem::AddressSpace;
use crate::utils::sync::{lock_order, IrqGuard, LockRank, Mutex};
use crate::utils::PerCpu;

pub use process::{Process, ProcessId};
pub use thread::{ThreadContext, ThreadId, ThreadState, IDLE_PRIORITY, REALTIME_MIN, TIME_SHARE_MIN};

use thread::ThreadAdapter;

/// Lazily constructed: the address space every kernel-only thread (including
/// each CPU's idle thread) shares.
static KERNEL_PROCESS: Once<Arc<Process>> = Once::new();

fn kernel_process() -> Arc<Process> {
    KERNEL_PROCESS
        .call_once(|| Process::kernel(Arc::new(AddressSpaceVm::new(AddressSpace::this()))))
        .clone()
}

struct RunQueue {
    buckets: [LinkedList<ThreadAdapter>; 256],
    /// Bitmap over the 256 buckets, four 64-bit words, so the highest
    /// non-empty priority can be found without scanning every bucket.
    nonempty: [u64; 4],
    idle: Arc<ThreadContext>,
    current: Option<Arc<ThreadContext>>,
}

impl RunQueue {
    fn new() -> Self {
        Self {
            buckets: core::array::from_fn(|_| LinkedList::new(ThreadAdapter::new())),
            nonempty: [0; 4],
            idle: ThreadContext::new_idle(kernel_process()),
            current: None,
        }
    }

    fn set_bit(&mut self, priority: u8) {
        self.nonempty[priority as usize / 64] |= 1 << (priority as usize % 64);
    }

    fn clear_bit(&mut self, priority: u8) {
        self.nonempty[priority as usize / 64] &= !(1u64 << (priority as usize % 64));
    }

    fn highest_nonempty(&self) -> Option<u8> {
        for word in (0..4).rev() {
            let bits = self.nonempty[word];

            if bits != 0 {
                let bit = 63 - bits.leading_zeros() as usize;
                return Some((word * 64 + bit) as u8);
            }
        }

        None
    }

    fn push(&mut self, thread: Arc<ThreadContext>) {
        let priority = thread.effective_priority();
        debug_assert!(priority >= TIME_SHARE_MIN, "idle priority threads are never queued");

        thread.set_queued_bucket(priority);
        self.set_bit(priority);
        self.buckets[priority as usize].push_back(thread);
    }

    fn pop_highest(&mut self) -> Option<Arc<ThreadContext>> {
        let priority = self.highest_nonempty()?;
        let bucket = &mut self.buckets[priority as usize];
        let thread = bucket.pop_front();

        if bucket.is_empty() {
            self.clear_bit(priority);
        }

        thread
    }

    /// Unlinks `thread` from whichever bucket it is currently queued in.
    /// Returns `false` if it was not actually queued (e.g. it is the
    /// currently running thread, or already removed).
    fn remove(&mut self, thread: &Arc<ThreadContext>) -> bool {
        if !thread.link.is_linked() {
            return false;
        }

        let priority = thread.queued_bucket();
        let bucket = &mut self.buckets[priority as usize];
        let mut cursor = unsafe { bucket.cursor_mut_from_ptr(thread.as_ref()) };

        let removed = cursor.remove().is_some();

        if removed && bucket.is_empty() {
            self.clear_bit(priority);
        }

        removed
    }
}

unsafe impl Sync for PerCpu<Mutex<RunQueue>> {}

static QUEUES: Once<PerCpu<Mutex<RunQueue>>> = Once::new();
static DEAD: Mutex<VecDeque<Arc<ThreadContext>>> = Mutex::new(VecDeque::new());

fn queues() -> &'static PerCpu<Mutex<RunQueue>> {
    QUEUES.get().expect("sched::init was never called")
}

/// Called once, after [`crate::apic::init`] has established the CPU count
/// (`PerCpu`'s backing allocation is sized off it) and before any CPU calls
/// [`init_cpu`] or [`enqueue`].
pub fn init() {
    QUEUES.call_once(|| PerCpu::new(|| Mutex::new(RunQueue::new())));
    spawn_kernel(reaper, TIME_SHARE_MIN);
}

/// Called once per CPU (BSP and every AP) after `gs`-relative per-CPU storage
/// is live. Nothing to do beyond making sure the queue exists: the idle
/// thread was already constructed by [`RunQueue::new`].
pub fn init_cpu() {
    let _ = queues().get();
}

/// Spawns a new kernel thread in [`ThreadState::Setup`] belonging to the
/// shared kernel process, then immediately enqueues it with no wake boost.
pub fn spawn_kernel(entry: fn(), priority: u8) -> Arc<ThreadContext> {
    let thread = ThreadContext::new_kernel(VirtAddr::new(entry as usize as u64), priority, kernel_process());
    enqueue(&thread, 0);
    thread
}

/// Moves `thread` from `Setup` or `Blocked` into `Runnable` and pushes it
/// onto the current CPU's run queue, applying a one-shot `boost` to its
/// effective priority (used by wakeups: the thread that unblocked it decides
/// how urgently it should run).
pub fn enqueue(thread: &Arc<ThreadContext>, boost: u8) {
    let _guard = IrqGuard::new();
    lock_order::acquire(LockRank::Scheduler);

    thread.add_boost(boost);
    thread.set_state(ThreadState::Runnable);

    let queue = queues().get_mut();
    let mut queue = queue.lock();
    thread.reset_quantum();
    queue.push(thread.clone());

    lock_order::release(LockRank::Scheduler);
}

/// Removes `thread` from whatever run queue it is on, if any, without
/// transitioning its state. Used to pull a thread back off the queue when
/// something else needs to synchronously take it over (e.g. delivering a
/// wake-requiring event).  If `thread` is currently running on a different
/// CPU, this only dequeues it if it happens to be sitting in a run queue
/// (was in the middle of requeuing); a running thread is never forcibly
/// evicted out from under the CPU executing it by this call; request a
/// reschedule via [`crate::interrupts::ipi::send_reschedule`] instead.
pub fn dequeue(thread: &Arc<ThreadContext>) -> bool {
    let _guard = IrqGuard::new();
    lock_order::acquire(LockRank::Scheduler);

    let removed = queues().get_mut().lock().remove(thread);

    lock_order::release(LockRank::Scheduler);
    removed
}

/// The thread currently running on this CPU.
pub fn current() -> Arc<ThreadContext> {
    let _guard = IrqGuard::new();
    let queue = queues().get().lock();

    queue
        .current
        .clone()
        .unwrap_or_else(|| queue.idle.clone())
}

/// Voluntarily gives up the CPU. The calling thread is requeued as
/// `Runnable` (unless it has just transitioned to `Blocked` by some other
/// means before calling this, in which case the caller is responsible for
/// having already queued it elsewhere, e.g. a wait queue) and the next
/// highest-priority thread is switched to.
pub fn yield_now() {
    let outgoing = current();

    if outgoing.state() == ThreadState::Running {
        outgoing.set_state(ThreadState::Runnable);
    }

    reschedule();
}

/// Re-enters the dispatcher from a DPC or the clock tick: drains nothing
/// itself (the caller already drained DPCs), just picks whatever the
/// highest-priority runnable thread is and switches to it if it isn't
/// already what's running.
pub fn preempt() {
    reschedule();
}

/// Drains this CPU's DPC queue, then re-enters the dispatcher. Spec's
/// `OnPassiveRunLevel`: called on the way back down to Passive level after an
/// interrupt, so DPCs queued by the handler run before the next thread is
/// picked.
pub fn on_passive_run_level() {
    crate::interrupts::dpc::drain_if_pending();
    reschedule();
}

/// Called once per timer tick for the thread currently running on this CPU:
/// decays its transient boost and, for time-sharing threads, ticks down its
/// quantum. Returns `true` if the quantum expired and a reschedule should
/// happen (the caller, `time::tick`, is expected to call [`preempt`] then).
pub fn tick() -> bool {
    let current = current();

    if current.base_priority() == IDLE_PRIORITY {
        return false;
    }

    current.decay_boost();
    current.tick_quantum()
}

/// Marks the calling thread `Dead` and switches away from it for good. Its
/// `ThreadContext` (stack, registers) is reclaimed by [`reaper`], never by
/// the thread itself, since a thread cannot free the stack it is still
/// running on.
pub fn exit(status: i32) -> ! {
    let outgoing = current();
    outgoing.process().set_exit_code(status);
    outgoing.set_state(ThreadState::Dead);

    DEAD.lock().push_back(outgoing);
    reschedule();

    unreachable!("exited thread was switched back into")
}

/// The actual dispatch step: requeue the outgoing thread if it is still
/// `Runnable` (a thread that moved to `Blocked` or `Dead` before calling this
/// has already been parked somewhere else -- a wait queue, [`DEAD`] -- and
/// must not be requeued here), pick the next thread (or the idle thread if
/// nothing is runnable), and context-switch into it if it differs from
/// what's already running. No bounce through a dedicated preempter thread --
/// nothing here needs to run on its own stack, so the outgoing thread's own
/// call frame is used directly as `from`.
fn reschedule() {
    let _guard = IrqGuard::new();
    lock_order::acquire(LockRank::Scheduler);

    let run_queue = queues().get_mut();
    let mut queue = run_queue.lock();

    let outgoing = queue.current.take();

    if let Some(outgoing) = &outgoing {
        if outgoing.state() == ThreadState::Runnable {
            outgoing.reset_quantum();
            queue.push(outgoing.clone());
        }
    }

    let next = queue.pop_highest().unwrap_or_else(|| queue.idle.clone());

    if let Some(outgoing) = &outgoing {
        if Arc::ptr_eq(outgoing, &next) {
            queue.current = Some(outgoing.clone());
            lock_order::release(LockRank::Scheduler);
            return;
        }
    }

    next.set_state(ThreadState::Running);
    next.set_home_cpu(crate::arch::this_cpu_id());

    let address_space_switch = match &outgoing {
        Some(outgoing) => !Arc::ptr_eq(outgoing.process(), next.process()),
        None => true,
    };

    let idle = queue.idle.clone();
    queue.current = Some(next.clone());
    core::mem::drop(queue);
    lock_order::release(LockRank::Scheduler);

    let from_arch = match &outgoing {
        Some(outgoing) => outgoing.arch_task_mut(),
        None => idle.arch_task_mut(),
    };

    crate::arch::task::arch_task_spinup(from_arch, next.arch_task(), address_space_switch);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives a freshly constructed `ThreadContext` through the only state
    /// path that reaches `Dead`, so dropping it at the end of a test doesn't
    /// trip the "dropped while still schedulable" debug assertion.
    fn retire(thread: &Arc<ThreadContext>) {
        thread.set_state(ThreadState::Runnable);
        thread.set_state(ThreadState::Running);
        thread.set_state(ThreadState::Dead);
    }

    fn dummy_thread(priority: u8) -> Arc<ThreadContext> {
        fn entry() {}
        ThreadContext::new_kernel(VirtAddr::new(entry as usize as u64), priority, kernel_process())
    }

    #[test]
    fn run_queue_picks_highest_priority_first() {
        let mut queue = RunQueue::new();

        let low = dummy_thread(TIME_SHARE_MIN);
        let high = dummy_thread(REALTIME_MIN);

        queue.push(low.clone());
        queue.push(high.clone());

        let picked = queue.pop_highest().expect("one of two pushed threads");
        assert!(Arc::ptr_eq(&picked, &high), "real-time band must win over time-sharing");

        let remaining = queue.pop_highest().expect("the other pushed thread");
        assert!(Arc::ptr_eq(&remaining, &low));

        retire(&low);
        retire(&high);
    }

    #[test]
    fn run_queue_is_fifo_within_a_priority_bucket() {
        let mut queue = RunQueue::new();

        let a = dummy_thread(50);
        let b = dummy_thread(50);
        let c = dummy_thread(50);

        queue.push(a.clone());
        queue.push(b.clone());
        queue.push(c.clone());

        assert!(Arc::ptr_eq(&queue.pop_highest().unwrap(), &a));
        assert!(Arc::ptr_eq(&queue.pop_highest().unwrap(), &b));
        assert!(Arc::ptr_eq(&queue.pop_highest().unwrap(), &c));
        assert!(queue.pop_highest().is_none());

        retire(&a);
        retire(&b);
        retire(&c);
    }

    #[test]
    fn run_queue_bitmap_clears_once_bucket_drains() {
        let mut queue = RunQueue::new();
        let t = dummy_thread(90);

        queue.push(t.clone());
        assert_eq!(queue.highest_nonempty(), Some(90));

        queue.pop_highest();
        assert_eq!(queue.highest_nonempty(), None);

        retire(&t);
    }
}

/// The sole thread allowed to observe the final `Arc<ThreadContext>` drop of
/// a `Dead` thread and free its kernel stack. Runs at the lowest
/// time-sharing priority so it never competes with real work.
fn reaper() {
    loop {
        let dead = DEAD.lock().pop_front();

        match dead {
            Some(thread) => {
                let process = thread.process().clone();
                let id = thread.id();

                debug_assert_eq!(thread.state(), ThreadState::Dead);
                core::mem::drop(thread);

                thread::unregister(id);

                if process.remove_thread() == 0 && process.exit_code().is_some() {
                    core::mem::drop(process);
                }
            }
            None => yield_now(),
        }
    }
}
