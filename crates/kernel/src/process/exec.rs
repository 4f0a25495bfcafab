//! `execl`: replace the calling task's address space and entry point
//! in place, keeping its pid and kernel stack.

use super::spawn::{install_entry_frame, map_user_stack};
use super::task::Pid;
use super::task_mut;
use crate::arch::x86::context;
use crate::fs::BlockFile;
use crate::lib::error::Result;
use crate::mm::paging;

/// Loads `path` into a fresh address space for `pid`, discards the old one,
/// and rewrites the kernel stack with a synthetic entry frame at the new
/// program's start — pid, parent, and children are all untouched.
///
/// # Safety
/// `pid` must be the current, running task; requires the kernel PD installed
/// so newly allocated frames are reachable at their identity address.
pub unsafe fn execl<D: BlockFile>(disk: &mut D, pid: Pid, path: &str) -> Result<()> {
    let new_pd = paging::create_user_page_dir()?;

    let entry = match crate::process::elf::load(disk, path, new_pd) {
        Ok(e) => e,
        Err(e) => {
            paging::free_user_address_space(new_pd);
            return Err(e);
        }
    };

    let user_stack_top = match map_user_stack(new_pd) {
        Ok(top) => top,
        Err(e) => {
            paging::free_user_address_space(new_pd);
            return Err(e);
        }
    };

    let old_pd = task_mut(pid).page_dir;
    paging::free_user_address_space(old_pd);

    let frame = install_entry_frame(pid, entry, user_stack_top);
    let frame_addr = frame as u32;

    let task = task_mut(pid);
    task.page_dir = new_pd;
    task.interrupt_frame = frame;
    task.kernel_esp = context::bootstrap_kernel_esp(frame_addr);
    paging::switch_address_space(new_pd);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::MemDisk;
    use crate::mm::pmm;
    use crate::process::task::TaskState;
    use crate::process::{alloc_task, kernel_stack_top, link_child};
    use alloc::vec;

    fn reset() {
        pmm::initialize(0x40_0000, 512);
        unsafe {
            paging::kernel_page_init(512 * pmm::PAGE_SIZE);
        }
    }

    fn tiny_elf(entry: u32) -> alloc::vec::Vec<u8> {
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
            e_entry: entry,
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
            p_vaddr: entry,
            p_paddr: entry,
            p_filesz: 0,
            p_memsz: pmm::PAGE_SIZE,
            p_flags: 0x6,
            p_align: pmm::PAGE_SIZE,
        };
        let mut out = vec![0u8; core::mem::size_of::<Ehdr>() + core::mem::size_of::<Phdr>()];
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr() as *mut Ehdr, ehdr);
            core::ptr::write_unaligned(out.as_mut_ptr().add(core::mem::size_of::<Ehdr>()) as *mut Phdr, phdr);
        }
        out
    }

    fn spawn_running() -> Pid {
        let pid = alloc_task().unwrap();
        unsafe {
            let pd = paging::create_user_page_dir().unwrap();
            let t = task_mut(pid);
            t.page_dir = pd;
            t.tss_image.esp0 = kernel_stack_top(pid);
            t.state = TaskState::Running;
        }
        pid
    }

    #[test]
    fn replaces_entry_point_and_keeps_pid_and_children() {
        reset();
        let parent = spawn_running();
        let child = spawn_running();
        unsafe {
            link_child(parent, child);
        }

        let mut disk = MemDisk::new();
        disk.add("/bin/hello", tiny_elf(0x50_0000));
        let old_pd = unsafe { task_mut(parent).page_dir };

        unsafe {
            execl(&mut disk, parent, "/bin/hello").unwrap();
            assert_eq!((*task_mut(parent).interrupt_frame).eip, 0x50_0000);
            assert_ne!(task_mut(parent).page_dir, old_pd);
            assert_eq!(task_mut(parent).child, Some(child));
        }
    }

    #[test]
    fn missing_file_leaves_old_address_space_intact() {
        reset();
        let pid = spawn_running();
        let old_pd = unsafe { task_mut(pid).page_dir };
        let mut disk = MemDisk::new();
        let result = unsafe { execl(&mut disk, pid, "/bin/missing") };
        assert!(result.is_err());
        assert_eq!(unsafe { task_mut(pid).page_dir }, old_pd);
    }
}
