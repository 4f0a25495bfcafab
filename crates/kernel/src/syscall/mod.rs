//! The syscall plane: `int 0x80` lands here with `eax` holding the syscall
//! number and `ebx/ecx/edx` holding up to three arguments. The return value
//! is written back into the saved frame's `eax`, which is what the user-mode
//! `iret` restores.

use crate::arch::x86::trapframe::InterruptFrame;
use crate::arch::x86::vga;
use crate::lib::error::Errno;
use crate::process::{current_pid, exec, exit, fork, wait};

const NR_SYSCALL: u32 = 16;
const STDOUT: u32 = 1;

const SYS_TEST: u32 = 0;
const SYS_WRITE: u32 = 1;
const SYS_FORK: u32 = 2;
const SYS_GETPID: u32 = 3;
const SYS_EXIT: u32 = 4;
const SYS_WAIT: u32 = 5;
const SYS_WAITPID: u32 = 6;
const SYS_EXECL: u32 = 7;

/// Reads a NUL-terminated string out of the caller's own address space
/// (already current, since a syscall trap never switches CR3 on entry).
/// Capped well short of a page; a runaway path is this kernel's problem to
/// bound, not the caller's to violate.
unsafe fn user_cstr(ptr: u32) -> &'static str {
    const MAX_LEN: usize = 256;
    let bytes = core::slice::from_raw_parts(ptr as *const u8, MAX_LEN);
    let len = bytes.iter().position(|&b| b == 0).unwrap_or(MAX_LEN);
    core::str::from_utf8(&bytes[..len]).unwrap_or("")
}

fn sys_write(fd: u32, buf: u32, count: u32) -> i32 {
    if fd != STDOUT {
        return Errno::EBADF.as_isize() as i32;
    }
    let bytes = unsafe { core::slice::from_raw_parts(buf as *const u8, count as usize) };
    match core::str::from_utf8(bytes) {
        Ok(s) => {
            vga::write_str(s);
            count as i32
        }
        Err(_) => Errno::EINVAL.as_isize() as i32,
    }
}

fn sys_fork() -> i32 {
    let Some(parent) = current_pid() else {
        return Errno::ESRCH.as_isize() as i32;
    };
    match unsafe { fork::fork_task(parent) } {
        Ok(child) => {
            // fork_task already leaves the child Ready and on the queue;
            // nothing further to do here.
            child as i32
        }
        Err(e) => e.as_isize() as i32,
    }
}

fn sys_getpid() -> i32 {
    current_pid().map(|p| p as i32).unwrap_or(Errno::ESRCH.as_isize() as i32)
}

fn sys_wait(wstatus: u32) -> i32 {
    let Some(pid) = current_pid() else {
        return Errno::ESRCH.as_isize() as i32;
    };
    match unsafe { wait::wait(pid, -1, wstatus as *mut i32, 0) } {
        Ok(reaped) => reaped as i32,
        Err(e) => e.as_isize() as i32,
    }
}

fn sys_waitpid(target: u32, wstatus: u32, options: u32) -> i32 {
    let Some(pid) = current_pid() else {
        return Errno::ESRCH.as_isize() as i32;
    };
    match unsafe { wait::wait(pid, target as i32, wstatus as *mut i32, options as i32) } {
        Ok(reaped) => reaped as i32,
        Err(e) => e.as_isize() as i32,
    }
}

fn sys_execl(path_ptr: u32) -> i32 {
    let Some(pid) = current_pid() else {
        return Errno::ESRCH.as_isize() as i32;
    };
    let path = unsafe { user_cstr(path_ptr) };
    let mut disk = crate::fs::UnimplementedDisk;
    match unsafe { exec::execl(&mut disk, pid, path) } {
        Ok(()) => 0,
        Err(e) => e.as_isize() as i32,
    }
}

/// Dispatches one syscall trap and writes its return value back into the
/// frame's `eax`. `SYS_EXIT` is the one entry that never returns here: it
/// falls all the way through to the scheduler instead.
///
/// # Safety
/// Called only from `trap_dispatch` on the syscall vector, with `frame`
/// pointing at the trapping task's own interrupt frame and that task's
/// address space still current.
pub unsafe fn dispatch(frame: &mut InterruptFrame) {
    let number = frame.eax;
    if number >= NR_SYSCALL {
        panic!("syscall: number {} out of range", number);
    }

    let result = match number {
        SYS_TEST => 2333,
        SYS_WRITE => sys_write(frame.ebx, frame.ecx, frame.edx),
        SYS_FORK => sys_fork(),
        SYS_GETPID => sys_getpid(),
        SYS_EXIT => {
            let Some(pid) = current_pid() else {
                panic!("syscall: exit with no current task");
            };
            exit::exit(pid, frame.ebx as i32);
        }
        SYS_WAIT => sys_wait(frame.ebx),
        SYS_WAITPID => sys_waitpid(frame.ebx, frame.ecx, frame.edx),
        SYS_EXECL => sys_execl(frame.ebx),
        other => panic!("syscall: unhandled syscall number {}", other),
    };
    frame.eax = result as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::set_current;

    #[test]
    fn test_syscall_returns_the_diagnostic_constant() {
        let mut frame = InterruptFrame { eax: SYS_TEST, ..InterruptFrame::default() };
        unsafe {
            dispatch(&mut frame);
        }
        assert_eq!(frame.eax, 2333);
    }

    #[test]
    fn write_to_a_non_stdout_fd_fails() {
        assert_eq!(sys_write(2, 0, 0), Errno::EBADF.as_isize() as i32);
    }

    #[test]
    fn getpid_fails_with_no_current_task() {
        set_current(None);
        assert_eq!(sys_getpid(), Errno::ESRCH.as_isize() as i32);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_syscall_number_panics() {
        let mut frame = InterruptFrame { eax: NR_SYSCALL, ..InterruptFrame::default() };
        unsafe {
            dispatch(&mut frame);
        }
    }
}
