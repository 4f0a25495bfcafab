//! Memory management: the physical frame allocator and the page tables
//! built on top of it. No demand paging, swap, or copy-on-write — every
//! mapping is resident and fork deep-copies data rather than sharing it.

pub mod paging;
pub mod pmm;

pub use pmm::PAGE_SIZE;

/// Brings up the PMM from the detected RAM top and the loader-provided
/// kernel end address, then builds and enables the kernel identity map.
///
/// # Safety
/// Must run once, after the TTY and trap plane are initialized, before any
/// process is created.
pub unsafe fn init(kernel_end: u32, ram_bytes: u32) {
    let pmm_base = (kernel_end + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
    let frame_count = (ram_bytes - pmm_base) / PAGE_SIZE;
    pmm::initialize(pmm_base, frame_count);
    crate::info!("pmm: {} frames free starting at {:#x}", frame_count, pmm_base);

    paging::kernel_page_init(ram_bytes);
    paging::page_enable();
    crate::info!("paging: kernel identity map enabled, {} PD slots", paging::kernel_area_pd_end_index());
}
