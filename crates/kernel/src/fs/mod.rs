//! The filesystem surface the ELF loader depends on.
//!
//! The real stack — ATA PIO block reads and a FAT16 directory walk — is an
//! external collaborator with a defined interface only: this module
//! specifies that interface as a [`BlockFile`] trait so the loader and the
//! process subsystem can be driven in host-side tests against an in-memory
//! fake, without pulling in real hardware access.

use crate::lib::error::{Errno, Result};

/// A located, openable file. Opaque to callers; only `BlockFile` methods
/// operate on it.
pub trait BlockFile {
    type Handle: Copy;

    /// Locates a file by absolute path, case-insensitive 8.3 names, `/`
    /// as separator.
    fn file_open(&mut self, path: &str) -> Result<Self::Handle>;

    /// Reads up to `dst.len()` bytes starting at `offset`. Returns fewer
    /// than `dst.len()` only near end-of-file.
    fn file_read(&mut self, handle: Self::Handle, offset: u32, dst: &mut [u8]) -> Result<usize>;
}

/// Stand-in for the real ATA/FAT16 stack until it is wired to hardware.
/// Every operation fails with `ENOSYS`, matching the "external
/// collaborator, referenced not specified" scoping of the boot contract.
pub struct UnimplementedDisk;

impl BlockFile for UnimplementedDisk {
    type Handle = ();

    fn file_open(&mut self, _path: &str) -> Result<()> {
        Err(Errno::ENOSYS)
    }

    fn file_read(&mut self, _handle: (), _offset: u32, _dst: &mut [u8]) -> Result<usize> {
        Err(Errno::ENOSYS)
    }
}
