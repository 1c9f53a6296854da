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

//! Deferred Procedure Calls.
//!
//! A hardware handler runs at the highest IRQL with interrupts masked and must
//! finish fast; anything that needs to touch the scheduler's run queues, block,
//! or otherwise take a sleeping lock is queued here instead and drained once the
//! CPU drops back to Dispatch level (the end of [`super::dispatch`], or the
//! return-to-scheduler path after an exception).

use alloc::collections::VecDeque;
use spin::Once;

use crate::utils::sync::Mutex;
use crate::utils::PerCpu;

type DpcFn = fn(usize);

struct Queue {
    pending: VecDeque<(DpcFn, usize)>,
    reschedule: bool,
}

impl Queue {
    const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            reschedule: false,
        }
    }
}

// `PerCpu<T>` is built on raw pointer arithmetic keyed by `this_cpu_id`, so a
// `Mutex`-wrapped payload is `Sync` in the same sense the wired heap's
// per-CPU magazines are.
unsafe impl Sync for PerCpu<Mutex<Queue>> {}

static QUEUES: Once<PerCpu<Mutex<Queue>>> = Once::new();

fn queue() -> &'static PerCpu<Mutex<Queue>> {
    QUEUES.call_once(|| PerCpu::new(|| Mutex::new(Queue::new())))
}

/// Queues `f(arg)` to run on the *current* CPU the next time DPCs are drained.
/// Safe to call from a hardware handler.
pub fn queue_dpc(f: DpcFn, arg: usize) {
    queue().get().lock().pending.push_back((f, arg));
}

/// Set by the reschedule IPI handler: nudges the next DPC drain into also
/// invoking the scheduler's preemption check.
pub fn mark_reschedule_pending() {
    queue().get().lock().reschedule = true;
}

/// Drains the current CPU's DPC queue if anything is pending. Called at the
/// tail of [`super::dispatch`] and after returning from an exception, i.e. at
/// Dispatch level with interrupts enabled.
pub fn drain_if_pending() {
    loop {
        let next = {
            let mut q = queue().get().lock();
            q.pending.pop_front()
        };

        match next {
            Some((f, arg)) => f(arg),
            None => break,
        }
    }

    let reschedule = {
        let mut q = queue().get().lock();
        core::mem::replace(&mut q.reschedule, false)
    };

    if reschedule {
        crate::sched::preempt();
    }
}
