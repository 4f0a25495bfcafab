//! ELF32 program loader.
//!
//! Given a path and a target address space, reads the ELF header and
//! program headers through a [`BlockFile`], maps each `PT_LOAD` segment at
//! its virtual address, copies `p_filesz` bytes from the file and
//! zero-fills the `p_memsz - p_filesz` tail, and returns the entry point.
//! Segments are assumed page-aligned, which holds for every binary this
//! teaching toolchain produces.

use crate::fs::BlockFile;
use crate::lib::error::{Errno, Result};
use crate::mm::paging;
use crate::mm::pmm::{self, PAGE_SIZE};

const EI_MAG: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const PT_LOAD: u32 = 1;
const PF_W: u32 = 0x2;

#[repr(C)]
#[derive(Clone, Copy, Default)]
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
#[derive(Clone, Copy, Default)]
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

fn read_exact<D: BlockFile>(disk: &mut D, handle: D::Handle, offset: u32, dst: &mut [u8]) -> Result<()> {
    let n = disk.file_read(handle, offset, dst)?;
    if n != dst.len() {
        return Err(Errno::EIO);
    }
    Ok(())
}

/// Loads `path` into `pd`'s user half and returns the entry virtual
/// address. `pd` must already carry the kernel half (built by
/// [`paging::create_user_page_dir`]).
///
/// # Safety
/// Mutates `pd`'s page tables and allocates frames from the PMM; must run
/// with the kernel PD installed so newly allocated frames are reachable at
/// their identity address.
pub unsafe fn load<D: BlockFile>(disk: &mut D, path: &str, pd: u32) -> Result<u32> {
    let handle = disk.file_open(path)?;

    let mut header_bytes = [0u8; core::mem::size_of::<Ehdr>()];
    read_exact(disk, handle, 0, &mut header_bytes)?;
    let ehdr: Ehdr = core::ptr::read_unaligned(header_bytes.as_ptr() as *const Ehdr);
    if ehdr.ident[0..4] != EI_MAG {
        return Err(Errno::ENOEXEC);
    }

    for i in 0..ehdr.e_phnum {
        let mut phdr_bytes = [0u8; core::mem::size_of::<Phdr>()];
        let offset = ehdr.e_phoff + (i as u32) * (ehdr.e_phentsize as u32);
        read_exact(disk, handle, offset, &mut phdr_bytes)?;
        let phdr: Phdr = core::ptr::read_unaligned(phdr_bytes.as_ptr() as *const Phdr);

        if phdr.p_type != PT_LOAD || phdr.p_memsz == 0 {
            continue;
        }
        load_segment(disk, handle, &phdr, pd)?;
    }

    Ok(ehdr.e_entry)
}

unsafe fn load_segment<D: BlockFile>(disk: &mut D, handle: D::Handle, phdr: &Phdr, pd: u32) -> Result<()> {
    let writable = phdr.p_flags & PF_W != 0;
    let page_count = phdr.p_memsz.div_ceil(PAGE_SIZE);
    let mut file_remaining = phdr.p_filesz;
    let mut file_offset = phdr.p_offset;

    for page_index in 0..page_count {
        let linear = phdr.p_vaddr + page_index * PAGE_SIZE;
        let frame = pmm::try_alloc_frame().map_err(|_| Errno::ENOMEM)?;

        let to_read = core::cmp::min(file_remaining, PAGE_SIZE);
        let frame_slice = core::slice::from_raw_parts_mut(frame as *mut u8, PAGE_SIZE as usize);
        frame_slice.fill(0);
        if to_read > 0 {
            read_exact(disk, handle, file_offset, &mut frame_slice[..to_read as usize])?;
        }
        file_offset += to_read;
        file_remaining = file_remaining.saturating_sub(to_read);

        if !paging::map_physical_page_to_linear(pd, frame, linear, true, writable) {
            pmm::free_frame(frame);
            return Err(Errno::ENOMEM);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::test_support::MemDisk;
    use alloc::vec;
    use alloc::vec::Vec;

    fn build_elf(entry: u32, segments: &[(u32, &[u8], u32)]) -> Vec<u8> {
        // (p_vaddr, file_contents, memsz)
        let ehdr_size = core::mem::size_of::<Ehdr>();
        let phdr_size = core::mem::size_of::<Phdr>();
        let phoff = ehdr_size as u32;
        let mut data_offset = phoff + phdr_size as u32 * segments.len() as u32;

        let mut out = vec![0u8; data_offset as usize];
        let ehdr = Ehdr {
            ident: {
                let mut id = [0u8; 16];
                id[0..4].copy_from_slice(&EI_MAG);
                id
            },
            e_type: 2,
            e_machine: 3,
            e_version: 1,
            e_entry: entry,
            e_phoff: phoff,
            e_shoff: 0,
            e_flags: 0,
            e_ehsize: ehdr_size as u16,
            e_phentsize: phdr_size as u16,
            e_phnum: segments.len() as u16,
            e_shentsize: 0,
            e_shnum: 0,
            e_shstrndx: 0,
        };
        unsafe {
            core::ptr::write_unaligned(out.as_mut_ptr() as *mut Ehdr, ehdr);
        }

        for (i, (vaddr, contents, memsz)) in segments.iter().enumerate() {
            let phdr = Phdr {
                p_type: PT_LOAD,
                p_offset: data_offset,
                p_vaddr: *vaddr,
                p_paddr: *vaddr,
                p_filesz: contents.len() as u32,
                p_memsz: *memsz,
                p_flags: PF_W | 0x4,
                p_align: PAGE_SIZE,
            };
            unsafe {
                let p = out.as_mut_ptr().add((phoff as usize) + i * phdr_size) as *mut Phdr;
                core::ptr::write_unaligned(p, phdr);
            }
            out.extend_from_slice(contents);
            data_offset += contents.len() as u32;
        }
        out
    }

    fn fresh_pd() -> u32 {
        unsafe { paging::create_user_page_dir().unwrap() }
    }

    fn reset_env() {
        pmm::initialize(0x40_0000, 256);
        unsafe {
            paging::kernel_page_init(256 * PAGE_SIZE);
        }
    }

    #[test]
    fn rejects_non_elf_magic() {
        reset_env();
        let mut disk = MemDisk::new();
        disk.add("/bin/bad", vec![0u8; 64]);
        let pd = fresh_pd();
        let result = unsafe { load(&mut disk, "/bin/bad", pd) };
        assert_eq!(result, Err(Errno::ENOEXEC));
    }

    #[test]
    fn loads_single_segment_and_zero_fills_tail() {
        reset_env();
        let mut disk = MemDisk::new();
        let blob = build_elf(0x40_0000, &[(0x40_0000, &[1, 2, 3, 4], PAGE_SIZE)]);
        disk.add("/bin/init", blob);
        let pd = fresh_pd();
        let entry = unsafe { load(&mut disk, "/bin/init", pd).unwrap() };
        assert_eq!(entry, 0x40_0000);
    }

    #[test]
    fn no_pt_load_segments_yields_empty_user_half() {
        reset_env();
        let mut disk = MemDisk::new();
        disk.add("/bin/empty", build_elf(0x1000, &[]));
        let pd = fresh_pd();
        let entry = unsafe { load(&mut disk, "/bin/empty", pd).unwrap() };
        assert_eq!(entry, 0x1000);
    }
}
