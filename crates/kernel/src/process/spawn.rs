//! Building a brand new task from an ELF image, used for `init` at boot and
//! for `execl` (which re-runs the address-space half of this against an
//! already-allocated task rather than a fresh one).

use super::task::{Pid, TaskState};
use super::{alloc_task, free_task, kernel_stack_top, link_child, task_mut};
use crate::arch::x86::context;
use crate::arch::x86::gdt::{USER_CODE_SEL, USER_DATA_SEL};
use crate::arch::x86::port::read_eflags;
use crate::arch::x86::trapframe::InterruptFrame;
use crate::fs::BlockFile;
use crate::lib::error::Result;
use crate::mm::paging;
use crate::mm::pmm;

const EFLAGS_IF: u32 = 1 << 9;

/// Maps a single zeroed page as the new task's user stack and returns its
/// top (the first mapping is always the lowest free slot in the user half,
/// so the stack ends up directly above wherever the ELF loader's segments
/// left off). Shared with `execl`, which maps a fresh stack the same way
/// when replacing a task's address space.
pub(super) unsafe fn map_user_stack(pd: u32) -> Result<u32> {
    let frame = pmm::try_alloc_frame()?;
    let base = paging::map_physical_page(pd, frame, true, true).ok_or_else(|| {
        pmm::free_frame(frame);
        crate::lib::error::Errno::ENOMEM
    })?;
    Ok(base + pmm::PAGE_SIZE)
}

/// Writes a synthetic ring-3 entry frame at the top of `pid`'s kernel stack,
/// as if `pid` had just trapped in from user mode at `entry` with `esp`
/// already at `user_stack_top`. Shared with `execl`, which rewrites an
/// already-running task's entry frame in place after a successful load.
pub(super) unsafe fn install_entry_frame(pid: Pid, entry: u32, user_stack_top: u32) -> *mut InterruptFrame {
    let stack_top = kernel_stack_top(pid);
    let frame_addr = stack_top - core::mem::size_of::<InterruptFrame>() as u32;
    let frame = frame_addr as *mut InterruptFrame;
    core::ptr::write(
        frame,
        InterruptFrame {
            gs: USER_DATA_SEL as u32,
            fs: USER_DATA_SEL as u32,
            es: USER_DATA_SEL as u32,
            ds: USER_DATA_SEL as u32,
            user_esp: user_stack_top,
            user_ss: USER_DATA_SEL as u32,
            esp_dummy: user_stack_top,
            eip: entry,
            cs: USER_CODE_SEL as u32,
            eflags: read_eflags() | EFLAGS_IF,
            ..InterruptFrame::default()
        },
    );
    frame
}

/// *create_task_from_elf*: allocates a TCB and fresh address space, loads
/// `path` into it, and leaves the task in state `None` on a synthetic
/// ring-3 entry frame. The caller (boot, for `init`; `fork`'s sibling
/// `execl` path, for everyone else) transitions it to `Ready`.
///
/// # Safety
/// Must run with the kernel PD installed so newly allocated frames are
/// reachable at their identity address.
pub unsafe fn create_task_from_elf<D: BlockFile>(disk: &mut D, path: &str, parent: Option<Pid>) -> Result<Pid> {
    let pid = alloc_task().map_err(|_| crate::lib::error::Errno::EAGAIN)?;

    let pd = match paging::create_user_page_dir() {
        Ok(pd) => pd,
        Err(e) => {
            free_task(pid);
            return Err(e.into());
        }
    };

    let entry = match crate::process::elf::load(disk, path, pd) {
        Ok(e) => e,
        Err(e) => {
            free_task(pid);
            return Err(e);
        }
    };

    let user_stack_top = match map_user_stack(pd) {
        Ok(top) => top,
        Err(e) => {
            free_task(pid);
            return Err(e);
        }
    };

    let stack_top = kernel_stack_top(pid);
    let frame = install_entry_frame(pid, entry, user_stack_top);
    let frame_addr = frame as u32;

    let task = task_mut(pid);
    task.page_dir = pd;
    task.interrupt_frame = frame;
    task.tss_image.esp0 = stack_top;
    task.kernel_esp = context::bootstrap_kernel_esp(frame_addr);
    task.state = TaskState::None;

    if let Some(parent) = parent {
        link_child(parent, pid);
    }

    Ok(pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::MemDisk;
    use alloc::vec;

    fn reset() {
        pmm::initialize(0x40_0000, 512);
        unsafe {
            paging::kernel_page_init(512 * pmm::PAGE_SIZE);
        }
    }

    fn tiny_elf() -> alloc::vec::Vec<u8> {
        // One PT_LOAD segment at 0x40_0000, one page, no file contents.
        #[repr(C)]
        struct Ehdr {
            ident: [u8; 16],
            e_type: u16,
            e_machine: u16,
            e_version: u32,
            e_entry: u32,
            e_phoff: u32,
            e_shoff: u32,
            e_flags: u32,
            e_ehsize: u16,
            e_phentsize: u16,
            e_phnum: u16,
            e_shentsize: u16,
            e_shnum: u16,
            e_shstrndx: u16,
        }
        #[repr(C)]
        struct Phdr {
            p_type: u32,
            p_offset: u32,
            p_vaddr: u32,
            p_paddr: u32,
            p_filesz: u32,
            p_memsz: u32,
            p_flags: u32,
            p_align: u32,
        }
        let mut ident = [0u8; 16];
        ident[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        let ehdr = Ehdr {
            ident,
            e_type: 2,
            e_machine: 3,
            e_version: 1,
            e_entry: 0x40_0000,
            e_phoff: core::mem::size_of::<Ehdr>() as u32,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: core::mem::size_of::<Ehdr>() as u16,
            e_phentsize: core::mem::size_of::<Phdr>() as u16,
            e_phnum: 1,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        let phdr = Phdr {
            p_type: 1,
            p_offset: 0,
            p_vaddr: 0x40_0000,
            p_paddr: 0x40_0000,
            p_filesz: 0,
            p_memsz: pmm::PAGE_SIZE,
            p_flags: 0x6,
            p_align: pmm::PAGE_SIZE,
        };
        let mut out = vec![0u8; core::mem::size_of::<Ehdr>() + core::mem::size_of::<Phdr>()];
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr() as *mut Ehdr, ehdr);
            core::ptr::write_unaligned(
                out.as_mut_ptr().add(core::mem::size_of::<Ehdr>()) as *mut Phdr,
                phdr,
            );
        }
        out
    }

    #[test]
    fn builds_task_born_in_none_state_with_ring3_frame() {
        reset();
        let mut disk = MemDisk::new();
        disk.add("/bin/init", tiny_elf());
        let pid = unsafe { create_task_from_elf(&mut disk, "/bin/init", None).unwrap() };
        unsafe {
            let t = task_mut(pid);
            assert_eq!(t.state, TaskState::None);
            assert_eq!((*t.interrupt_frame).eip, 0x40_0000);
            assert_eq!((*t.interrupt_frame).cs, USER_CODE_SEL as u32);
            assert!((*t.interrupt_frame).user_esp > 0);
        }
    }

    #[test]
    fn missing_file_frees_the_task_slot() {
        reset();
        let mut disk = MemDisk::new();
        let before = crate::process::task::NR_TASKS;
        let result = unsafe { create_task_from_elf(&mut disk, "/bin/missing", None) };
        assert!(result.is_err());
        // The slot is reusable: allocating NR_TASKS fresh tasks still succeeds.
        let mut spawned = 0;
        for _ in 0..before {
            if crate::process::alloc_task().is_ok() {
                spawned += 1;
            }
        }
        assert_eq!(spawned, before);
    }
}
