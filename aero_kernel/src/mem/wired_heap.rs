/*
 * Copyright (C) 2021 The Aero Project Developers.
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

//! The kernel's own heap: safe to call with interrupts disabled, backs every
//! `Box`/`Vec`/`Arc` the kernel allocates for itself.
//!
//! Small requests (up to [`MAX_SLAB_CLASS`]) are served by a central slab per
//! size class, each slab built out of a single page obtained from
//! [`crate::mem::pmm`] (header at the tail of the page, free list threaded
//! inline through the unused buffers). A small per-CPU magazine sits in
//! front of each class so the common alloc/free pair on a hot path doesn't
//! have to take the central slab's lock.
//!
//! Requests above [`MAX_SLAB_CLASS`] and up to 2 MiB are satisfied directly
//! by a single order-1 page run from the PMM; the direct map means no page
//! table work is needed; the whole run is handed to one allocation; there is
//! no packing of multiple large objects into a run. Anything larger than
//! that is out of scope for this allocator.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::NonNull;

use intrusive_collections::UnsafeRef;
use spin::Once;

use crate::mem::paging::Size4KiB;
use crate::mem::pmm;
use crate::utils::sync::{lock_order, LockRank, Mutex};
use crate::utils::PerCpu;

/// Power-of-two size classes, 16 B up to one eighth of a page.
const SIZE_CLASSES: [usize; 8] = [16, 32, 64, 128, 256, 512, 1024, 2048];
const MAX_SLAB_CLASS: usize = 2048;

/// Number of freed objects a per-CPU magazine holds before it spills back to
/// the central slab.
const MAGAZINE_CAPACITY: usize = 32;

#[repr(C)]
struct SlabHeader {
    owner: UnsafeRef<CentralSlab>,
}

unsafe impl Send for SlabHeader {}
unsafe impl Sync for SlabHeader {}

impl SlabHeader {
    fn from_object(ptr: *const u8) -> &'static Self {
        assert!(!ptr.is_null());

        let header_ptr = (ptr as usize & !(Size4KiB::SIZE as usize - 1)) as *const SlabHeader;
        unsafe { &*header_ptr }
    }
}

struct BufCtl(Option<NonNull<BufCtl>>);

impl BufCtl {
    const NULL: Self = Self(None);
}

unsafe impl Send for BufCtl {}

/// A central pool for one size class: a page-backed free list shared by all
/// CPUs, protected by a single lock. Magazines exist so this lock is rarely
/// contended.
struct CentralSlab {
    class: usize,
    first_free: Mutex<BufCtl>,
}

impl CentralSlab {
    const fn new(class: usize) -> Self {
        Self {
            class,
            first_free: Mutex::new(BufCtl::NULL),
        }
    }

    fn alloc(&self) -> *mut u8 {
        lock_order::acquire(LockRank::WiredHeap);
        let mut first_free = self.first_free.lock_irq();

        if let Some(entry) = first_free.0 {
            *first_free = BufCtl(unsafe { entry.as_ref() }.0);
            let ptr = entry.as_ptr().cast();
            drop(first_free);
            lock_order::release(LockRank::WiredHeap);
            ptr
        } else {
            drop(first_free);
            lock_order::release(LockRank::WiredHeap);
            self.grow();
            self.alloc()
        }
    }

    fn dealloc(&self, ptr: *mut u8) {
        lock_order::acquire(LockRank::WiredHeap);
        let mut first_free = self.first_free.lock_irq();

        let new_head = ptr.cast::<BufCtl>();
        unsafe { new_head.write(BufCtl(first_free.0)) };
        *first_free = BufCtl(Some(unsafe { NonNull::new_unchecked(new_head) }));

        drop(first_free);
        lock_order::release(LockRank::WiredHeap);
    }

    /// Pulls one zeroed page from the PMM, carves a [`SlabHeader`] out of its
    /// start, and threads the remainder into the free list as equally sized
    /// buffers of `self.class` bytes.
    fn grow(&self) {
        let info = pmm::alloc().expect("wired_heap: out of physical memory");
        let paddr = pmm::rev_lookup(info);
        let virt = unsafe { crate::PHYSICAL_MEMORY_OFFSET } + paddr.as_u64();

        let base = virt.as_mut_ptr::<u8>();
        let header_size = core::mem::size_of::<SlabHeader>().next_multiple_of(self.class);

        unsafe {
            let header = base.cast::<SlabHeader>();
            header.write(SlabHeader {
                owner: UnsafeRef::from_raw(self as *const _),
            });
        }

        let usable = Size4KiB::SIZE as usize - header_size;
        let count = usable / self.class;

        assert!(count > 0, "wired_heap: size class {} too large for a page", self.class);

        let mut first_free = self.first_free.lock_irq();

        for i in 0..count {
            let entry = unsafe { base.add(header_size + i * self.class) }.cast::<BufCtl>();
            let next = if i + 1 < count {
                Some(unsafe { NonNull::new_unchecked(base.add(header_size + (i + 1) * self.class).cast()) })
            } else {
                None
            };

            unsafe { entry.write(BufCtl(next)) };
        }

        *first_free = BufCtl(Some(unsafe { NonNull::new_unchecked(base.add(header_size).cast()) }));
    }
}

/// Fixed-capacity LIFO cache of recently freed objects for one (CPU, size
/// class) pair.
struct Magazine {
    slots: [Option<NonNull<u8>>; MAGAZINE_CAPACITY],
    len: usize,
}

unsafe impl Send for Magazine {}

impl Magazine {
    const fn empty() -> Self {
        Self {
            slots: [None; MAGAZINE_CAPACITY],
            len: 0,
        }
    }

    fn pop(&mut self) -> Option<*mut u8> {
        if self.len == 0 {
            return None;
        }

        self.len -= 1;
        self.slots[self.len].take().map(|p| p.as_ptr())
    }

    fn push(&mut self, ptr: *mut u8) -> bool {
        if self.len == MAGAZINE_CAPACITY {
            return false;
        }

        self.slots[self.len] = NonNull::new(ptr);
        self.len += 1;
        true
    }
}

struct PerCpuMagazines {
    magazines: [Mutex<Magazine>; SIZE_CLASSES.len()],
}

// `PerCpu<T>` does not implement `Sync` on its own (it is built for
// scheduler-local use where the borrow is already known to be CPU-exclusive);
// here each slot is additionally guarded by its own `Mutex`, so sharing the
// table itself across CPUs is sound.
unsafe impl Sync for PerCpu<PerCpuMagazines> {}

impl PerCpuMagazines {
    fn new_empty() -> Self {
        Self {
            magazines: core::array::from_fn(|_| Mutex::new(Magazine::empty())),
        }
    }
}

pub struct WiredHeap {
    centrals: [CentralSlab; SIZE_CLASSES.len()],
    magazines: Once<PerCpu<PerCpuMagazines>>,
}

unsafe impl Sync for WiredHeap {}

fn class_index(size: usize) -> Option<usize> {
    SIZE_CLASSES.iter().position(|&class| size <= class)
}

impl WiredHeap {
    pub const fn new() -> Self {
        Self {
            centrals: [
                CentralSlab::new(SIZE_CLASSES[0]),
                CentralSlab::new(SIZE_CLASSES[1]),
                CentralSlab::new(SIZE_CLASSES[2]),
                CentralSlab::new(SIZE_CLASSES[3]),
                CentralSlab::new(SIZE_CLASSES[4]),
                CentralSlab::new(SIZE_CLASSES[5]),
                CentralSlab::new(SIZE_CLASSES[6]),
                CentralSlab::new(SIZE_CLASSES[7]),
            ],
            magazines: Once::new(),
        }
    }

    /// Per-CPU magazines need to know the CPU count, which is not known at
    /// `const fn new()` time; call this once after SMP topology is known and
    /// before any thread but the boot CPU allocates.
    pub fn init_percpu(&self) {
        self.magazines.call_once(|| PerCpu::new(PerCpuMagazines::new_empty));
    }

    fn alloc_small(&self, index: usize) -> *mut u8 {
        if let Some(percpu) = self.magazines.get() {
            let mut magazine = percpu.get().magazines[index].lock_irq();

            if let Some(ptr) = magazine.pop() {
                return ptr;
            }
        }

        self.centrals[index].alloc()
    }

    fn dealloc_small(&self, ptr: *mut u8, index: usize) {
        if let Some(percpu) = self.magazines.get() {
            let mut magazine = percpu.get().magazines[index].lock_irq();

            if magazine.push(ptr) {
                return;
            }
        }

        self.centrals[index].dealloc(ptr);
    }

    fn alloc_large(&self, layout: Layout) -> *mut u8 {
        if layout.size() > crate::mem::paging::Size2MiB::SIZE as usize {
            return core::ptr::null_mut();
        }

        match pmm::domain().alloc_order(1) {
            Some(info) => {
                let paddr = pmm::domain().rev_lookup(info);
                let virt = unsafe { crate::PHYSICAL_MEMORY_OFFSET } + paddr.as_u64();
                virt.as_mut_ptr::<u8>()
            }
            None => core::ptr::null_mut(),
        }
    }

    fn dealloc_large(&self, ptr: *mut u8) {
        let virt = crate::mem::paging::VirtAddr::new(ptr as u64);
        let offset = unsafe { crate::PHYSICAL_MEMORY_OFFSET };
        let paddr = crate::mem::paging::PhysAddr::new(virt - offset);

        if let Some(info) = pmm::lookup(paddr) {
            pmm::domain().free(info);
        }
    }
}

unsafe impl GlobalAlloc for WiredHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match class_index(layout.size().max(layout.align())) {
            Some(index) => self.alloc_small(index),
            None => self.alloc_large(layout),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        match class_index(layout.size().max(layout.align())) {
            Some(index) => {
                debug_assert_eq!(SlabHeader::from_object(ptr).owner.class, SIZE_CLASSES[index]);
                self.dealloc_small(ptr, index);
            }
            None => self.dealloc_large(ptr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_index_picks_smallest_fit() {
        assert_eq!(class_index(1), Some(0));
        assert_eq!(class_index(16), Some(0));
        assert_eq!(class_index(17), Some(1));
        assert_eq!(class_index(2048), Some(7));
        assert_eq!(class_index(2049), None);
    }
}
