//! Virtual memory regions, fault dispatch and TLB shootdown.
//!
//! The region tree extends the bare [`super::AddressSpace`] (a CR3 handle)
//! with the bookkeeping needed to decide *what* lives at a given virtual
//! address and *how* a fault against it should be serviced. The region tree
//! is keyed by base address and walked on fault, reworked around a
//! pluggable [`VmDriver`] trait instead of a single `Mapping` enum, so
//! kernel-only mappings, anonymous user memory and (eventually) file-backed
//! memory share one fault-dispatch path instead of three.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::apic;
use crate::error::{KernelError, Result};
use crate::mem::paging::{OffsetPageTable, Page, PageTableFlags, PhysFrame, Size4KiB, VirtAddr};
use crate::mem::pmm;
use crate::utils::sync::{LockRank, Mutex};

bitflags! {
    /// Protection and placement flags for a [`Region`], independent of any
    /// particular architecture's page table format.
    pub struct VmFlags: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const EXEC    = 1 << 2;
        const USER    = 1 << 3;
        const SHARED  = 1 << 4;
    }
}

impl VmFlags {
    /// Translates region-level flags into the architecture's page table
    /// flags, always setting `PRESENT`.
    pub fn to_mmu_flags(self) -> PageTableFlags {
        let mut out = PageTableFlags::PRESENT;

        if self.contains(VmFlags::WRITE) {
            out.insert(PageTableFlags::WRITABLE);
        }

        if self.contains(VmFlags::USER) {
            out.insert(PageTableFlags::USER_ACCESSIBLE);
        }

        if !self.contains(VmFlags::EXEC) {
            out.insert(PageTableFlags::NO_EXECUTE);
        }

        out
    }
}

/// Outcome of dispatching a fault to a [`VmDriver`].
pub enum EventResult {
    /// The fault was serviced; the faulting instruction can be retried.
    Continue,
    /// The fault requires the caller to block (e.g. paging in from a file)
    /// and will be resolved asynchronously.
    Blocked,
    /// The fault is not resolvable (access outside any region, permission
    /// violation against a non-COW mapping, ...); the caller should deliver
    /// a fault to the faulting thread or panic if it came from kernel code.
    Fatal,
}

/// Backing implementation for a [`Region`]. One instance is shared by every
/// region it backs (e.g. a `Vfs` driver instance is shared by every mapping
/// of the same file, keeping a single backing object behind potentially
/// several co-resident mappings).
pub trait VmDriver: Send + Sync {
    /// Human-readable name, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Services a page fault at `addr` (already known to fall inside
    /// `region`'s range). `write` is true for a write-caused fault.
    fn handle_fault(
        &self,
        offset_table: &mut OffsetPageTable,
        region: &Region,
        addr: VirtAddr,
        write: bool,
    ) -> EventResult;

    /// Called when `region` is removed from an address space (munmap, or the
    /// address space itself is torn down). Drivers that hold resources (file
    /// references, physical frames) release them here.
    fn detach(&self, region: &Region);

    /// Updates the driver's view of `region` after its flags changed via
    /// `mprotect`-style modification. Most drivers don't need to do
    /// anything; the page table update itself is performed by the caller.
    fn modify_range(&self, _region: &Region, _new_flags: VmFlags) {}
}

/// A single contiguous mapping inside an [`AddressSpace`].
pub struct Region {
    pub base: VirtAddr,
    pub length: u64,
    pub flags: VmFlags,
    pub driver: Arc<dyn VmDriver>,
}

impl Region {
    pub fn end(&self) -> VirtAddr {
        self.base + self.length
    }

    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr < self.end()
    }
}

/// Anonymous, zero-fill-on-demand memory. Each fault allocates a fresh
/// zeroed order-0 frame from the PMM -- the usual lazily-populated
/// behaviour for private anonymous mmaps.
pub struct AnonVmDriver;

impl VmDriver for AnonVmDriver {
    fn name(&self) -> &'static str {
        "anon"
    }

    fn handle_fault(
        &self,
        offset_table: &mut OffsetPageTable,
        region: &Region,
        addr: VirtAddr,
        _write: bool,
    ) -> EventResult {
        let aligned = addr.align_down(Size4KiB::SIZE);

        let info = match pmm::domain().alloc() {
            Some(info) => info,
            None => return EventResult::Fatal,
        };

        let frame = PhysFrame::containing_address(pmm::domain().rev_lookup(info));
        let page = Page::containing_address(aligned);

        let mut frame_allocator = pmm::PmmFrameAllocator;

        let result = unsafe {
            offset_table.map_to(page, frame, region.flags.to_mmu_flags(), &mut frame_allocator)
        };

        match result {
            Ok(flush) => {
                flush.flush();
                EventResult::Continue
            }
            Err(_) => EventResult::Fatal,
        }
    }

    fn detach(&self, _region: &Region) {}
}

/// Eagerly-mapped kernel memory (the kernel image, the wired heap's backing
/// store, device MMIO apertures). Never faults under normal operation; a
/// fault against a `Kernel` region is always [`EventResult::Fatal`].
pub struct KernelVmDriver;

impl VmDriver for KernelVmDriver {
    fn name(&self) -> &'static str {
        "kernel"
    }

    fn handle_fault(
        &self,
        _offset_table: &mut OffsetPageTable,
        _region: &Region,
        _addr: VirtAddr,
        _write: bool,
    ) -> EventResult {
        EventResult::Fatal
    }

    fn detach(&self, _region: &Region) {}
}

/// File-backed memory. Page-in is not yet wired to a real page cache (the
/// VFS rewrite only exposes whole-file reads today); a fault is serviced by
/// allocating a frame and copying the covered range out of the backing
/// slice, covering the common private, non-shared case.
pub struct VfsVmDriver {
    pub data: &'static [u8],
    pub offset: usize,
}

impl VmDriver for VfsVmDriver {
    fn name(&self) -> &'static str {
        "vfs"
    }

    fn handle_fault(
        &self,
        offset_table: &mut OffsetPageTable,
        region: &Region,
        addr: VirtAddr,
        _write: bool,
    ) -> EventResult {
        let aligned = addr.align_down(Size4KiB::SIZE);
        let page_offset = (aligned - region.base) as usize;

        let info = match pmm::domain().alloc() {
            Some(info) => info,
            None => return EventResult::Fatal,
        };

        let frame = PhysFrame::containing_address(pmm::domain().rev_lookup(info));
        let page = Page::containing_address(aligned);

        let dst = unsafe {
            core::slice::from_raw_parts_mut(
                (crate::PHYSICAL_MEMORY_OFFSET + frame.start_address().as_u64()).as_mut_ptr::<u8>(),
                Size4KiB::SIZE as usize,
            )
        };

        let src_start = self.offset + page_offset;
        let copy_len = self.data.len().saturating_sub(src_start).min(dst.len());

        dst.fill(0);

        if copy_len > 0 {
            dst[..copy_len].copy_from_slice(&self.data[src_start..src_start + copy_len]);
        }

        let mut frame_allocator = pmm::PmmFrameAllocator;

        let result = unsafe {
            offset_table.map_to(page, frame, region.flags.to_mmu_flags(), &mut frame_allocator)
        };

        match result {
            Ok(flush) => {
                flush.flush();
                EventResult::Continue
            }
            Err(_) => EventResult::Fatal,
        }
    }

    fn detach(&self, _region: &Region) {}
}

/// Pending cross-CPU TLB invalidation for a single [`AddressSpaceVm`]. Set by
/// the CPU performing the unmap/modify, cleared by each remote CPU as it
/// services the `Tlb` IPI (see [`crate::interrupts::ipi`]).
pub struct ShootdownDetails {
    pub base: VirtAddr,
    pub length: u64,
    /// Bitmap of CPU ids that still need to flush, one bit per CPU.
    pub pending: AtomicU64,
}

impl ShootdownDetails {
    pub fn new(base: VirtAddr, length: u64, cpu_mask: u64) -> Self {
        Self {
            base,
            length,
            pending: AtomicU64::new(cpu_mask),
        }
    }

    /// Called by a remote CPU once it has flushed the range locally.
    pub fn ack(&self, cpu_id: usize) {
        self.pending.fetch_and(!(1 << cpu_id), Ordering::AcqRel);
    }

    pub fn is_complete(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

/// The region tree for a single address space, layered on top of the raw
/// [`super::AddressSpace`] CR3 handle. Regions are ordered by base address
/// so a fault address can be resolved with a single range query.
pub struct AddressSpaceVm {
    address_space: Mutex<super::AddressSpace>,
    regions: Mutex<BTreeMap<u64, Region>>,
    /// Bitmap of CPU ids that have ever run a thread in this address space;
    /// a shootdown IPI is only sent to CPUs that could hold stale TLB
    /// entries for it.
    active_cpus: AtomicU64,
}

impl AddressSpaceVm {
    pub fn new(address_space: super::AddressSpace) -> Self {
        Self {
            address_space: Mutex::new(address_space),
            regions: Mutex::new(BTreeMap::new()),
            active_cpus: AtomicU64::new(0),
        }
    }

    pub fn note_active_on(&self, cpu_id: usize) {
        self.active_cpus.fetch_or(1 << cpu_id, Ordering::AcqRel);
    }

    /// A copy of the raw CR3 handle, for threads being spun up into this
    /// address space. Cheap: see the note on [`super::AddressSpace`]'s
    /// `Clone` impl.
    pub fn raw_handle(&self) -> super::AddressSpace {
        *self.address_space.lock()
    }

    /// Inserts a new region, rejecting any overlap with an existing one.
    pub fn attach(
        &self,
        base: VirtAddr,
        length: u64,
        flags: VmFlags,
        driver: Arc<dyn VmDriver>,
    ) -> Result<()> {
        crate::utils::sync::lock_order::acquire(LockRank::Region);
        let mut regions = self.regions.lock();

        let new_end = base.as_u64() + length;

        for region in regions.values() {
            let region_end = region.end().as_u64();

            if base.as_u64() < region_end && region.base.as_u64() < new_end {
                crate::utils::sync::lock_order::release(LockRank::Region);
                return Err(KernelError::Overlap);
            }
        }

        regions.insert(
            base.as_u64(),
            Region {
                base,
                length,
                flags,
                driver,
            },
        );

        crate::utils::sync::lock_order::release(LockRank::Region);
        Ok(())
    }

    /// Removes the region starting at `base`, invoking its driver's
    /// `detach` hook and requesting a TLB shootdown across the CPUs this
    /// address space has run on.
    pub fn detach(&self, base: VirtAddr) -> Result<()> {
        crate::utils::sync::lock_order::acquire(LockRank::Region);
        let removed = self.regions.lock().remove(&base.as_u64());
        crate::utils::sync::lock_order::release(LockRank::Region);

        let region = removed.ok_or(KernelError::NotFound)?;
        region.driver.detach(&region);

        let mask = self.active_cpus.load(Ordering::Acquire);
        crate::interrupts::ipi::shootdown_tlb(mask, region.base, region.length);

        Ok(())
    }

    /// Finds the region (if any) covering `addr`.
    pub fn query(&self, addr: VirtAddr) -> Option<(VirtAddr, u64, VmFlags)> {
        crate::utils::sync::lock_order::acquire(LockRank::Region);
        let regions = self.regions.lock();

        let found = regions
            .range(..=addr.as_u64())
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr))
            .map(|r| (r.base, r.length, r.flags));

        crate::utils::sync::lock_order::release(LockRank::Region);
        found
    }

    /// Dispatches a page fault at `addr` to the owning region's driver.
    /// Returns [`EventResult::Fatal`] if `addr` is not covered by any
    /// region.
    pub fn dispatch_page_fault(&self, addr: VirtAddr, write: bool) -> EventResult {
        crate::utils::sync::lock_order::acquire(LockRank::ProcessVmm);
        let mut address_space = self.address_space.lock();
        let mut offset_table = address_space.offset_page_table();

        crate::utils::sync::lock_order::acquire(LockRank::Region);
        let regions = self.regions.lock();

        let region = regions
            .range(..=addr.as_u64())
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(addr));

        let result = match region {
            Some(region) => {
                if write && !region.flags.contains(VmFlags::WRITE) {
                    EventResult::Fatal
                } else {
                    region.driver.handle_fault(&mut offset_table, region, addr, write)
                }
            }
            None => EventResult::Fatal,
        };

        crate::utils::sync::lock_order::release(LockRank::Region);
        crate::utils::sync::lock_order::release(LockRank::ProcessVmm);
        result
    }
}

/// Dispatches a page fault to the correct address space's region tree.
/// Thin free function wrapper kept for parity with the interrupt handler's
/// calling convention (it has an `AddressSpaceVm` handle, not a `self`).
pub fn dispatch_page_fault(vm: &AddressSpaceVm, addr: VirtAddr, write: bool) -> EventResult {
    vm.dispatch_page_fault(addr, write)
}

/// Broadcasts a `PanicAllCores`-style bitmap of CPUs believed to have
/// mappings for `addr`; used by [`AddressSpaceVm::detach`] today and
/// reusable by a future `mprotect`.
pub fn shootdown_mask_for_all_cpus() -> u64 {
    let count = apic::get_cpu_count();

    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmu_flags_translation() {
        let flags = VmFlags::READ | VmFlags::WRITE | VmFlags::USER;
        let mmu = flags.to_mmu_flags();

        assert!(mmu.contains(PageTableFlags::PRESENT));
        assert!(mmu.contains(PageTableFlags::WRITABLE));
        assert!(mmu.contains(PageTableFlags::USER_ACCESSIBLE));
        assert!(mmu.contains(PageTableFlags::NO_EXECUTE));
    }

    #[test]
    fn exec_clears_no_execute() {
        let flags = VmFlags::READ | VmFlags::EXEC;
        assert!(!flags.to_mmu_flags().contains(PageTableFlags::NO_EXECUTE));
    }

    /// Property 3: after any sequence of attach/detach, no two regions in a
    /// map overlap and the tree stays ordered by base (the latter is free --
    /// it's a `BTreeMap` keyed by base -- so this exercises the overlap
    /// rejection directly).
    #[test]
    fn attach_rejects_overlap_and_detach_frees_the_slot() {
        let space = AddressSpaceVm::new(super::super::AddressSpace::this());

        space
            .attach(VirtAddr::new(0x1000), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver))
            .expect("first region attaches cleanly");

        // Fully contained, left-overlapping, and right-overlapping attempts
        // must all be rejected.
        assert!(matches!(
            space.attach(VirtAddr::new(0x1000), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver)),
            Err(KernelError::Overlap)
        ));
        assert!(matches!(
            space.attach(VirtAddr::new(0x1800), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver)),
            Err(KernelError::Overlap)
        ));
        assert!(matches!(
            space.attach(VirtAddr::new(0x800), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver)),
            Err(KernelError::Overlap)
        ));

        // Adjacent, non-overlapping regions on either side are fine.
        space
            .attach(VirtAddr::new(0x2000), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver))
            .expect("adjacent region attaches cleanly");

        assert!(space.query(VirtAddr::new(0x1500)).is_some());
        assert!(space.query(VirtAddr::new(0x2500)).is_some());
        assert!(space.query(VirtAddr::new(0x3500)).is_none());

        // Detaching the first region frees its slot: re-attaching at the
        // same base, which was rejected as an overlap above, now succeeds.
        space.detach(VirtAddr::new(0x1000)).expect("region was attached");
        assert!(space.query(VirtAddr::new(0x1500)).is_none());
        space
            .attach(VirtAddr::new(0x1000), 0x1000, VmFlags::READ, Arc::new(KernelVmDriver))
            .expect("slot is free again after detach");
    }
}
