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

//! # Aero
//! Aero is a new modern, unix based operating system. It is being developed for educational purposes.
//!
//! ## Code organization and architecture
//! The code is divided into different *modules*, each representing a *subsystem* of the kernel.
//!
//! ## Notes:
//! * <https://en.wikipedia.org/wiki/Unix>

#![feature(
    custom_test_frameworks,
    core_intrinsics,
    asm,
    alloc_error_handler,
    lang_items,
    panic_info_message,
    thread_local,
    decl_macro,
    global_asm,
    ptr_internals,
    const_fn_trait_bound,
    linked_list_cursors,
    extern_types,
    new_uninit,
    box_syntax,
    const_fn_fn_ptr_basics,
    arc_new_cyclic,
    step_trait,
    const_btree_new
)]
#![deny(trivial_numeric_casts, unused_allocation)]
#![test_runner(crate::tests::test_runner)]
#![no_std]
#![no_main]

extern crate alloc;

mod abi;
mod acpi;
mod apic;
mod arch;
mod cmdline;
mod drivers;
mod error;
mod fs;
mod interrupts;
mod logger;
mod mem;
mod modules;
mod panic;
mod rendy;
mod sched;
mod services;
mod tests;
mod time;
mod tls;
mod utils;
mod prelude {
    pub use crate::drivers::uart_16550::{serial_print, serial_println};
    pub use crate::rendy::{print, println};
    pub use crate::utils::{
        const_unsafe, intel_asm, intel_fn, pop_fs, pop_preserved, pop_scratch, push_fs,
        push_preserved, push_scratch,
    };
}

use stivale_boot::v2::*;

use self::mem::paging::{PhysAddr, VirtAddr};
use self::mem::wired_heap::WiredHeap;

use self::arch::interrupts;

#[global_allocator]
static AERO_SYSTEM_ALLOCATOR: WiredHeap = WiredHeap::new();

static mut PHYSICAL_MEMORY_OFFSET: VirtAddr = VirtAddr::zero();

#[repr(C, align(4096))]
struct P2Align12<T>(T);

const STACK_SIZE: usize = 4096 * 16;

/// Upper bound on the kernel image's physical footprint, used to keep the
/// PMM bootstrap from handing out pages the running kernel still occupies.
const KERNEL_IMAGE_MAX_SIZE: u64 = 64 * 1024 * 1024;

/// Matches the cap `GlobalFrameAllocator` used to hardcode for its own
/// memory map scratch array; kept the same so both allocators agree on how
/// many usable ranges a sane memory map can produce.
const MAX_MEMORY_MAP_ENTRIES: usize = 256;

/// We need to tell the stivale bootloader where we want our stack to be.
/// We are going to allocate our stack as an uninitialised array in .bss.
static STACK: P2Align12<[u8; STACK_SIZE]> = P2Align12([0; STACK_SIZE]);

/// We are now going to define a framebuffer header tag. This tag tells the bootloader that
/// we want a graphical framebuffer instead of a CGA-compatible text mode. Omitting this tag will
/// make the bootloader default to text mode, if available.
static FRAMEBUFFER_TAG: StivaleFramebufferHeaderTag = StivaleFramebufferHeaderTag::new()
    .framebuffer_bpp(24)
    .next((&PAGING_TAG as *const Stivale5LevelPagingHeaderTag).cast());

/// We are now going to define a level 5 paging header tag. This tag tells the bootloader to
/// enable the LEVEL_5_PAGING bit in the Cr4 register. This is not possible to implement in the kernel
/// as we can only enable it in protected mode.
static PAGING_TAG: Stivale5LevelPagingHeaderTag =
    Stivale5LevelPagingHeaderTag::new().next((&SMP_TAG as *const StivaleSmpHeaderTag).cast());

/// Asks the bootloader to start every other logical CPU and park it in long
/// mode; `apic::start_aps` hands each one `kernel_ap_startup` as its
/// `goto_address` once the bootloader reports back with the `cpus()` tag.
static SMP_TAG: StivaleSmpHeaderTag = StivaleSmpHeaderTag::new();

/// The stivale2 specification says we need to define a "header structure".
/// This structure needs to reside in the .stivale2hdr ELF section in order
/// for the bootloader to find it. We use the #[linker_section] and #[used] macros to
/// tell the compiler to put the following structure in said section.
#[link_section = ".stivale2hdr"]
#[no_mangle]
#[used]
static STIVALE_HDR: StivaleHeader = StivaleHeader::new()
    .stack(&STACK.0[STACK_SIZE - 4096] as *const u8)
    .tags((&FRAMEBUFFER_TAG as *const StivaleFramebufferHeaderTag).cast());

#[thread_local]
static mut CPU_ID: u64 = 0x00;

#[no_mangle]
extern "C" fn kernel_main(boot_info: &'static StivaleStruct) -> ! {
    let mmap_tag = boot_info
        .memory_map()
        .expect("Aero requires the bootloader to provide a non-null memory map tag");

    let rsdp_tag = boot_info
        .rsdp()
        .expect("Aero requires the bootloader to provided a non-null rsdp tag");

    let framebuffer_tag = boot_info
        .framebuffer()
        .expect("Aero requires the bootloader to provide a non-null framebuffer tag");

    let rsdp_address = PhysAddr::new(rsdp_tag.rsdp);

    let kernel_base_tag = boot_info
        .kernel_base_address()
        .expect("Aero requires the bootloader to provide a non-null kernel base address tag");

    let smp_tag = boot_info.cpus();

    let kernel_base = PhysAddr::new(kernel_base_tag.physical_base_address);
    // The kernel image's on-disk/physical footprint; this is an approximation
    // (actual size comes from the ELF headers) but is always at least as
    // large as the real image, which is all the PMM bootstrap needs to avoid
    // handing out pages under the running kernel.
    let kernel_end = kernel_base + KERNEL_IMAGE_MAX_SIZE;

    // Note: STACK_SIZE - 1 points to the last u8 in the array, i.e.
    // it's guaranteed to be at an address with its least significant bit
    // being a 1, i.e. it never has an alignment greater than 1. STACK_SIZE - 4096
    // points to the last u8 in STACK, that is aligned to 4096.
    let stack_top_addr = VirtAddr::new((&STACK.0[STACK_SIZE - 4096] as *const u8) as _);

    /*
     * NOTE: In this function we only want to initialize essential serivces, including
     * the task scheduler. Rest of the initializing (including kernel modules) should go
     * into the kernel main thread function instead.
     *
     * First of all make sure interrupts are disabled.
     */
    unsafe {
        interrupts::disable_interrupts();
    }

    if mem::paging::level_5_paging_enabled() {
        unsafe { PHYSICAL_MEMORY_OFFSET = VirtAddr::new(0xff00000000000000) }
    } else {
        unsafe { PHYSICAL_MEMORY_OFFSET = VirtAddr::new(0xffff800000000000) }
    }

    arch::init_cpu();

    /*
     * Initialize the COM ports before doing anything else.
     *
     * This will help printing panics and logs before or when the debug renderer
     * is initialized if serial output is avaliable.
     */
    drivers::uart_16550::init();
    logger::init();

    let command_line: &'static str = boot_info
        .command_line()
        .map_or("", |cmd| unsafe { utils::c_str_as_str(cmd.command_line as *const u8) });
    let command_line = cmdline::parse(command_line, &[]);
    log::info!("Parsed kernel command line (rendy-dbg={})", command_line.rendy_debug);

    rendy::init(framebuffer_tag);

    arch::gdt::init_boot();
    log::info!("Loaded bootstrap GDT");

    interrupts::init();
    log::info!("Loaded IDT");

    let apic_type = apic::init();
    log::info!(
        "Loaded local apic (x2apic={})",
        apic_type.supports_x2_apic()
    );

    {
        let mut regions = [mem::pmm::MemoryRegion {
            base: PhysAddr::new(0),
            length: 0,
        }; MAX_MEMORY_MAP_ENTRIES];
        let mut count = 0usize;

        for entry in mmap_tag.iter() {
            if entry.entry_type == StivaleMemoryMapEntryType::Usable && count < MAX_MEMORY_MAP_ENTRIES {
                regions[count] = mem::pmm::MemoryRegion {
                    base: PhysAddr::new(entry.base),
                    length: entry.length,
                };
                count += 1;
            }
        }

        mem::pmm::init(&regions[..count], kernel_base, kernel_end);
    }
    log::info!("Loaded page-frame database");

    tls::init();
    log::info!("Loaded TLS");

    arch::gdt::init(stack_top_addr);
    log::info!("Loaded GDT");

    acpi::init(rsdp_address, unsafe { PHYSICAL_MEMORY_OFFSET });
    log::info!("Loaded ACPI");

    match smp_tag {
        Some(smp) => apic::start_aps(smp),
        None => log::warn!("Bootloader did not provide an SMP tag; running single-core"),
    }
    log::info!("Loaded SMP (cpu_count={})", apic::get_cpu_count());

    time::init();
    log::info!("Loaded PIT");

    services::symbols::init(
        unsafe { PHYSICAL_MEMORY_OFFSET } + kernel_base.as_u64(),
        KERNEL_IMAGE_MAX_SIZE,
    );
    log::info!("Loaded symbol store");

    sched::init();
    sched::init_cpu();
    log::info!("Loaded scheduler");

    fs::vfs::init();
    log::info!("Loaded filesystem");

    apic::mark_bsp_ready(true);

    log::info!("Initialized kernel");

    /*
     * Now that all of the essential initialization is done we are going to schedule
     * the kernel main thread.
     */
    sched::spawn_kernel(kernel_main_thread, sched::thread::TIME_SHARE_MIN);

    /*
     * NOTE: We need to enable interrupts after we have initialized TLS and GDT
     * as the PTI context switch functions depend on thread local globals.
     */
    unsafe {
        interrupts::enable_interrupts();
    }

    // Pre-scheduler init done. Now we are waiting for the main kernel
    // thread to be scheduled.
    loop {
        unsafe { interrupts::halt() }
    }
}

fn kernel_main_thread() {
    modules::init();
    log::info!("Loaded kernel modules");

    loop {
        sched::yield_now();
    }
}

#[no_mangle]
extern "C" fn kernel_ap_startup(ap_id: u64, stack_top_addr: VirtAddr) -> ! {
    log::debug!("Booting CPU {}", ap_id);

    tls::init();
    log::info!("AP{}: Loaded TLS", ap_id);

    arch::gdt::init(stack_top_addr);
    log::info!("AP{}: Loaded GDT", ap_id);

    unsafe {
        CPU_ID = ap_id; // Set the local cpu id global to the AP id provided in the AP bootinfo
    }

    apic::mark_ap_ready(true);

    while !apic::is_bsp_ready() {
        interrupts::pause();
    }

    sched::init_cpu();
    log::info!("AP{}: Loaded scheduler", ap_id);

    unsafe {
        interrupts::enable_interrupts();
    }

    loop {
        unsafe { interrupts::halt() }
    }
}
