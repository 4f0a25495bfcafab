//! Kernel-internal error type and the POSIX errno family used at the syscall boundary.

/// Failure reasons raised by kernel subsystems before they reach a syscall return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    OutOfMemory,
    InvalidArgument,
    PermissionDenied,
    NotFound,
    NoChildProcess,
    WouldBlock,
    NotSupported,
    BadAddress,
    NotInitialized,
}

#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    EPERM = 1,
    ENOENT = 2,
    ESRCH = 3,
    EIO = 5,
    ENOEXEC = 8,
    EBADF = 9,
    ECHILD = 10,
    EAGAIN = 11,
    ENOMEM = 12,
    EACCES = 13,
    EFAULT = 14,
    EEXIST = 17,
    EINVAL = 22,
    ENOSYS = 38,
}

impl From<KernelError> for Errno {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::OutOfMemory => Errno::ENOMEM,
            KernelError::InvalidArgument => Errno::EINVAL,
            KernelError::PermissionDenied => Errno::EACCES,
            KernelError::NotFound => Errno::ENOENT,
            KernelError::NoChildProcess => Errno::ECHILD,
            KernelError::WouldBlock => Errno::EAGAIN,
            KernelError::NotSupported => Errno::ENOSYS,
            KernelError::BadAddress => Errno::EFAULT,
            KernelError::NotInitialized => Errno::EINVAL,
        }
    }
}

impl Errno {
    /// Negated-errno convention: this is what lands in the saved `eax` of a failing syscall.
    pub fn as_isize(self) -> isize {
        -(self as i32 as isize)
    }
}

pub type Result<T> = core::result::Result<T, Errno>;
