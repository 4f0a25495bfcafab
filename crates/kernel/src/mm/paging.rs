//! Address-space construction and the page tables that back it.
//!
//! The kernel page directory identity-maps every byte of installed RAM and
//! is shared *by reference* into every user address space: a user PD's
//! lower entries are bitwise copies of the kernel PD's entries, pointing at
//! the very same page-table frames, so the kernel is always reachable no
//! matter which address space is current.

use super::pmm;
use crate::arch::x86::port::{invlpg, read_cr0, write_cr0, write_cr3};
use crate::lib::error::KernelError;

pub const ENTRIES_PER_TABLE: usize = 1024;

bitflags::bitflags! {
    #[derive(Clone, Copy)]
    pub struct EntryFlags: u32 {
        const PRESENT  = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER     = 1 << 2;
        const PWT      = 1 << 3;
        const PCD      = 1 << 4;
        const ACCESSED = 1 << 5;
        const DIRTY    = 1 << 6;
        const PS       = 1 << 7;
        const GLOBAL   = 1 << 8;
    }
}

const FRAME_MASK: u32 = 0xFFFF_F000;

#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct Entry(u32);

impl Entry {
    const fn empty() -> Self {
        Self(0)
    }

    fn new(frame: u32, flags: EntryFlags) -> Self {
        Self((frame & FRAME_MASK) | (flags | EntryFlags::PRESENT).bits())
    }

    pub fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    pub fn frame(self) -> u32 {
        self.0 & FRAME_MASK
    }

    pub fn is_writable(self) -> bool {
        self.0 & EntryFlags::WRITABLE.bits() != 0
    }

    pub fn is_user(self) -> bool {
        self.0 & EntryFlags::USER.bits() != 0
    }
}

#[repr(C, align(4096))]
pub struct Table {
    pub entries: [Entry; ENTRIES_PER_TABLE],
}

impl Table {
    const fn empty() -> Self {
        Self { entries: [Entry::empty(); ENTRIES_PER_TABLE] }
    }
}

/// Index of the first page-directory slot not covered by the kernel
/// identity map; user code must never touch PD slots below this.
static mut KERNEL_AREA_PD_END_INDEX: usize = 0;

static mut KERNEL_PD: Table = Table::empty();
// Worst case for a 4 GiB identity map is 1024 page tables; this kernel only
// targets teaching-scale RAM (tens of MiB), so a much smaller static pool
// covers every realistic boot configuration without dynamic allocation.
const MAX_KERNEL_PAGE_TABLES: usize = 64;
static mut KERNEL_PAGE_TABLES: [Table; MAX_KERNEL_PAGE_TABLES] =
    [const { Table::empty() }; MAX_KERNEL_PAGE_TABLES];

pub fn kernel_area_pd_end_index() -> usize {
    unsafe { KERNEL_AREA_PD_END_INDEX }
}

pub fn kernel_pd_phys() -> u32 {
    unsafe { core::ptr::addr_of!(KERNEL_PD) as u32 }
}

/// Identity-maps `[0, ram_bytes)` with `us=0, rw=1` using a static pool of
/// page tables (this kernel never dynamically grows the kernel map).
///
/// # Safety
/// Must run exactly once, before [`page_enable`], and before any other code
/// reads `KERNEL_PD`/`KERNEL_PAGE_TABLES`.
pub unsafe fn kernel_page_init(ram_bytes: u32) {
    let frames = ram_bytes.div_ceil(pmm::PAGE_SIZE);
    let pd_slots_needed = (frames as usize).div_ceil(ENTRIES_PER_TABLE);
    assert!(
        pd_slots_needed <= MAX_KERNEL_PAGE_TABLES,
        "mm: ram_bytes requires more kernel page tables than the static pool holds"
    );

    let flags = EntryFlags::WRITABLE;
    let mut frame_addr: u32 = 0;
    for pd_index in 0..pd_slots_needed {
        let table = &mut KERNEL_PAGE_TABLES[pd_index];
        for entry in table.entries.iter_mut() {
            if frame_addr >= ram_bytes {
                break;
            }
            *entry = Entry::new(frame_addr, flags);
            frame_addr += pmm::PAGE_SIZE;
        }
        let table_phys = core::ptr::addr_of!(*table) as u32;
        KERNEL_PD.entries[pd_index] = Entry::new(table_phys, flags);
    }

    KERNEL_AREA_PD_END_INDEX = pd_slots_needed;
}

/// Loads the kernel page directory and sets CR0.PG.
///
/// # Safety
/// Must run after [`kernel_page_init`]; every linear address the kernel
/// touches after this call must already be mapped.
pub unsafe fn page_enable() {
    write_cr3(kernel_pd_phys());
    let cr0 = read_cr0();
    write_cr0(cr0 | (1 << 31));
}

/// Builds a new user page directory sharing the kernel half by reference.
///
/// # Safety
/// Requires the kernel PD to already be initialized.
pub unsafe fn create_user_page_dir() -> Result<u32, KernelError> {
    let pd_phys = pmm::try_alloc_frame()?;
    let pd = &mut *(pd_phys as *mut Table);
    for entry in pd.entries.iter_mut() {
        *entry = Entry::empty();
    }
    let end = KERNEL_AREA_PD_END_INDEX;
    pd.entries[..end].copy_from_slice(&KERNEL_PD.entries[..end]);
    Ok(pd_phys)
}

fn table_at(phys: u32) -> &'static mut Table {
    unsafe { &mut *(phys as *mut Table) }
}

/// Finds the first unmapped linear address in the user half and binds it
/// to `phys`. Returns `None` if the user half is exhausted.
///
/// # Safety
/// `pd` must be a valid page directory built by [`create_user_page_dir`].
pub unsafe fn map_physical_page(pd: u32, phys: u32, us: bool, rw: bool) -> Option<u32> {
    let start_index = KERNEL_AREA_PD_END_INDEX;
    let directory = table_at(pd);
    for pd_index in start_index..ENTRIES_PER_TABLE {
        let pt_phys = ensure_page_table(directory, pd_index)?;
        let table = table_at(pt_phys);
        for (pt_index, entry) in table.entries.iter_mut().enumerate() {
            if !entry.is_present() {
                let mut flags = EntryFlags::empty();
                if us {
                    flags |= EntryFlags::USER;
                }
                if rw {
                    flags |= EntryFlags::WRITABLE;
                }
                *entry = Entry::new(phys, flags);
                return Some(((pd_index * ENTRIES_PER_TABLE) + pt_index) as u32 * pmm::PAGE_SIZE);
            }
        }
    }
    None
}

/// Maps `phys` at a caller-chosen `linear` address. Fails if `linear` falls
/// in the kernel half or is already mapped.
///
/// # Safety
/// `pd` must be a valid page directory built by [`create_user_page_dir`].
pub unsafe fn map_physical_page_to_linear(pd: u32, phys: u32, linear: u32, us: bool, rw: bool) -> bool {
    let pd_index = (linear >> 22) as usize;
    let pt_index = ((linear >> 12) & 0x3FF) as usize;

    if pd_index < KERNEL_AREA_PD_END_INDEX {
        panic!("mm: attempt to map into the kernel area at linear {:#x}", linear);
    }

    let directory = table_at(pd);
    let Some(pt_phys) = ensure_page_table(directory, pd_index) else {
        return false;
    };
    let table = table_at(pt_phys);
    if table.entries[pt_index].is_present() {
        panic!("mm: double map at linear {:#x}", linear);
    }

    let mut flags = EntryFlags::empty();
    if us {
        flags |= EntryFlags::USER;
    }
    if rw {
        flags |= EntryFlags::WRITABLE;
    }
    table.entries[pt_index] = Entry::new(phys, flags);
    invlpg(linear);
    true
}

/// Ensures PD slot `pd_index` has a backing page table, allocating one on
/// demand with `rw=1` (page-level protection is controlled per-PTE).
unsafe fn ensure_page_table(directory: &mut Table, pd_index: usize) -> Option<u32> {
    let pde = directory.entries[pd_index];
    if pde.is_present() {
        return Some(pde.frame());
    }
    let pt_phys = pmm::try_alloc_frame().ok()?;
    let table = table_at(pt_phys);
    for entry in table.entries.iter_mut() {
        *entry = Entry::empty();
    }
    directory.entries[pd_index] = Entry::new(pt_phys, EntryFlags::WRITABLE);
    Some(pt_phys)
}

/// Deep-copies every present user-half mapping from `src_pd` into `dst_pd`:
/// a fresh page table per present PDE, a fresh data frame per present PTE,
/// with the 4 KiB of data copied and flags replicated. Rolls back every
/// frame it allocated and returns `false` if the PMM runs out mid-copy.
///
/// # Safety
/// Must run with the kernel PD installed (CR3) so every allocated frame is
/// reachable at its identity address; `dst_pd`/`src_pd` must be valid.
pub unsafe fn copy_address_space(dst_pd: u32, src_pd: u32) -> bool {
    let mut allocated: alloc::vec::Vec<u32> = alloc::vec::Vec::new();
    let src = table_at(src_pd);
    let dst = table_at(dst_pd);

    for pd_index in KERNEL_AREA_PD_END_INDEX..ENTRIES_PER_TABLE {
        let src_pde = src.entries[pd_index];
        if !src_pde.is_present() {
            continue;
        }
        let new_pt_phys = match pmm::try_alloc_frame() {
            Ok(f) => f,
            Err(_) => {
                rollback(&allocated);
                return false;
            }
        };
        allocated.push(new_pt_phys);
        let new_pt = table_at(new_pt_phys);
        for entry in new_pt.entries.iter_mut() {
            *entry = Entry::empty();
        }

        let src_pt = table_at(src_pde.frame());
        for (pt_index, src_pte) in src_pt.entries.iter().enumerate() {
            if !src_pte.is_present() {
                continue;
            }
            let new_frame = match pmm::try_alloc_frame() {
                Ok(f) => f,
                Err(_) => {
                    rollback(&allocated);
                    return false;
                }
            };
            allocated.push(new_frame);
            core::ptr::copy_nonoverlapping(
                src_pte.frame() as *const u8,
                new_frame as *mut u8,
                pmm::PAGE_SIZE as usize,
            );
            let mut flags = EntryFlags::empty();
            if src_pte.is_writable() {
                flags |= EntryFlags::WRITABLE;
            }
            if src_pte.is_user() {
                flags |= EntryFlags::USER;
            }
            new_pt.entries[pt_index] = Entry::new(new_frame, flags);
        }

        let mut pde_flags = EntryFlags::WRITABLE;
        if src_pde.is_user() {
            pde_flags |= EntryFlags::USER;
        }
        dst.entries[pd_index] = Entry::new(new_pt_phys, pde_flags);
    }
    true
}

unsafe fn rollback(allocated: &[u32]) {
    for &frame in allocated {
        pmm::free_frame(frame);
    }
}

/// Frees every present user-half mapping in `pd` — each PTE's data frame,
/// each PDE's page-table frame — then frees `pd` itself. The mirror image of
/// [`copy_address_space`]'s walk; the kernel half is never touched since its
/// page tables are shared, not owned, by every user PD.
///
/// # Safety
/// `pd` must be a valid page directory with no other live reference (the
/// caller is done with this address space for good), and must not be the
/// directory currently installed in CR3.
pub unsafe fn free_user_address_space(pd: u32) {
    let directory = table_at(pd);
    for pd_index in KERNEL_AREA_PD_END_INDEX..ENTRIES_PER_TABLE {
        let pde = directory.entries[pd_index];
        if !pde.is_present() {
            continue;
        }
        let table = table_at(pde.frame());
        for pte in table.entries.iter() {
            if pte.is_present() {
                pmm::free_frame(pte.frame());
            }
        }
        pmm::free_frame(pde.frame());
    }
    pmm::free_frame(pd);
}

/// Writes `pd` to CR3, making it the active address space.
///
/// # Safety
/// `pd` must be a fully-built page directory.
pub unsafe fn switch_address_space(pd: u32) {
    write_cr3(pd);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset_pmm_and_kernel_map(base: u32, frames: u32) {
        pmm::initialize(base, frames);
        unsafe {
            KERNEL_PD = Table::empty();
            KERNEL_AREA_PD_END_INDEX = 0;
            kernel_page_init(ENTRIES_PER_TABLE as u32 * pmm::PAGE_SIZE);
        }
    }

    #[test]
    fn entry_round_trips_frame_and_flags() {
        let e = Entry::new(0x12_3000, EntryFlags::WRITABLE | EntryFlags::USER);
        assert_eq!(e.frame(), 0x12_3000);
        assert!(e.is_present());
        assert!(e.is_writable());
        assert!(e.is_user());
    }

    #[test]
    fn create_user_page_dir_shares_kernel_half_by_value_equality() {
        reset_pmm_and_kernel_map(0x40_0000, 64);
        unsafe {
            let pd = create_user_page_dir().unwrap();
            let user = table_at(pd);
            let end = kernel_area_pd_end_index();
            for i in 0..end {
                assert_eq!(user.entries[i].0, KERNEL_PD.entries[i].0);
            }
        }
    }

    #[test]
    #[should_panic(expected = "kernel area")]
    fn mapping_into_kernel_area_is_fatal() {
        reset_pmm_and_kernel_map(0x40_0000, 64);
        unsafe {
            let pd = create_user_page_dir().unwrap();
            map_physical_page_to_linear(pd, 0x50_0000, 0, true, true);
        }
    }

    #[test]
    fn freeing_address_space_returns_all_its_frames_to_the_pmm() {
        reset_pmm_and_kernel_map(0x40_0000, 64);
        unsafe {
            let pd = create_user_page_dir().unwrap();
            let mut mapped = alloc::vec::Vec::new();
            for _ in 0..4 {
                let frame = pmm::try_alloc_frame().unwrap();
                mapped.push(frame);
                map_physical_page(pd, frame, true, true).unwrap();
            }
            free_user_address_space(pd);
            // Every frame handed out above, plus the page tables and the PD
            // itself, must be back on the free list: re-allocating the same
            // count (data frames + pd + at least one page table) succeeds.
            for _ in 0..mapped.len() + 2 {
                pmm::try_alloc_frame().unwrap();
            }
        }
    }
}
