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

//! Monotonic clock built on the PIT tick [`crate::time::tick`] already
//! drives, plus a deadline queue for one-shot and periodic callbacks.
//!
//! Events always fire on whichever CPU's tick happens to call
//! [`advance_tick`] (the BSP, since only it is wired to the legacy PIT IRQ);
//! `core` is accepted for API parity with per-CPU timer arming but is not
//! used to route delivery to another CPU -- doing that properly needs a
//! LAPIC one-shot/periodic timer per core, which `apic::LocalApic` does not
//! expose yet.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::interrupts::dpc;
use crate::utils::sync::Mutex;

const TICK_HZ: u64 = 1000;
const NS_PER_TICK: u64 = 1_000_000_000 / TICK_HZ;

static TICKS: AtomicU64 = AtomicU64::new(0);

struct ClockEvent {
    deadline_tick: u64,
    period_ticks: Option<u64>,
    callback: fn(usize),
    arg: usize,
    core: Option<usize>,
}

static QUEUE: Mutex<Vec<ClockEvent>> = Mutex::new(Vec::new());

/// Called once per PIT tick by [`crate::time::tick`].
pub fn advance_tick() {
    let now = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    dispatch_due(now);
}

/// Ticks elapsed since boot.
pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

/// Nanoseconds elapsed since boot, derived from the tick count.
pub fn now_ns() -> u64 {
    ticks() * NS_PER_TICK
}

pub fn frequency_hz() -> u64 {
    TICK_HZ
}

/// Schedules `callback(arg)` to run `delay_ns` nanoseconds from now, and
/// every `period_ns` nanoseconds after that if `period_ns` is given.
pub fn queue_clock_event(
    delay_ns: u64,
    callback: fn(usize),
    arg: usize,
    period_ns: Option<u64>,
    core: Option<usize>,
) {
    let delay_ticks = (delay_ns / NS_PER_TICK).max(1);
    let period_ticks = period_ns.map(|p| (p / NS_PER_TICK).max(1));

    QUEUE.lock().push(ClockEvent {
        deadline_tick: ticks() + delay_ticks,
        period_ticks,
        callback,
        arg,
        core,
    });
}

fn dispatch_due(now: u64) {
    let due = {
        let mut queue = QUEUE.lock();
        let mut due = Vec::new();
        let mut i = 0;

        while i < queue.len() {
            if queue[i].deadline_tick <= now {
                due.push(queue.swap_remove(i));
            } else {
                i += 1;
            }
        }

        due
    };

    for mut event in due {
        // `dispatch_due` runs off the PIT tick at Interrupt level; callbacks
        // may need the scheduler's run-queue lock, so they're deferred to
        // Dispatch level instead of called straight from here.
        dpc::queue_dpc(event.callback, event.arg);

        if let Some(period) = event.period_ticks {
            event.deadline_tick = now + period;
            QUEUE.lock().push(event);
        }
    }
}
