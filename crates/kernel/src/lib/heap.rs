//! Kernel heap: a fixed BSS-backed arena handed to `linked_list_allocator`.
//!
//! Every `alloc::vec::Vec`/`Box` used by the address-space-copy and rollback
//! paths in `mm::paging` draws from this pool. There is no growth story —
//! teaching-scale workloads (a handful of tasks, each with a handful of
//! mapped segments) never come close to exhausting it.

use linked_list_allocator::LockedHeap;

const HEAP_SIZE: usize = 256 * 1024;

static mut HEAP_ARENA: [u8; HEAP_SIZE] = [0; HEAP_SIZE];

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(test)]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Hands the static arena to the allocator.
///
/// # Safety
/// Must run exactly once, before any `alloc`-crate type is touched.
pub unsafe fn init() {
    let base = core::ptr::addr_of_mut!(HEAP_ARENA) as *mut u8;
    ALLOCATOR.lock().init(base, HEAP_SIZE);
}

#[cfg(not(test))]
#[alloc_error_handler]
fn alloc_error(layout: core::alloc::Layout) -> ! {
    panic!("heap: allocation of {} bytes (align {}) failed", layout.size(), layout.align());
}
