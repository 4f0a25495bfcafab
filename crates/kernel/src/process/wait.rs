//! `wait`/`waitpid`: reap a zombie child, or give up the CPU and retry.
//!
//! Every wait request is the same scan over a child list; the only
//! differences are which children count as candidates and whether finding
//! none is a failure or a reason to yield and look again.

use super::task::Pid;
use super::{free_task, task_mut, unlink_child};
use crate::lib::error::{Errno, Result};
use crate::process::scheduler;

pub const WNOHANG: i32 = 1;

fn is_candidate(want: i32, child: Pid) -> bool {
    want <= 0 || want as u32 == child
}

/// One scan over `parent`'s children for a zombie matching `want` (`<= 0`
/// means any child). On a hit, unlinks and frees the zombie and returns its
/// pid and exit code.
fn reap_one(parent: Pid, want: i32) -> Option<(Pid, i32)> {
    let mut cursor = unsafe { task_mut(parent).child };
    while let Some(child) = cursor {
        let t = unsafe { task_mut(child) };
        let next = t.sibling;
        if is_candidate(want, child) && t.is_zombie() {
            let exit_code = t.exit_code;
            unsafe {
                unlink_child(parent, child);
            }
            free_task(child);
            return Some((child, exit_code));
        }
        cursor = next;
    }
    None
}

fn has_any_child(parent: Pid) -> bool {
    unsafe { task_mut(parent).child.is_some() }
}

/// `wait4`/`waitpid`. `want > 0` waits for that specific child, `want <= 0`
/// waits for any child. With `WNOHANG` set, returns `Ok(0)` instead of
/// yielding when nothing is ready yet; the non-blocking check happens before
/// any yield occurs, so `waitpid(pid, WNOHANG)` never parks the caller.
///
/// # Safety
/// Must run with `parent` as the current task and interrupts enabled for the
/// blocking path (the yield inside is what lets the timer resume this task).
pub unsafe fn wait(parent: Pid, want: i32, wstatus: *mut i32, options: i32) -> Result<Pid> {
    loop {
        if !has_any_child(parent) {
            return Err(Errno::ECHILD);
        }
        if let Some((pid, exit_code)) = reap_one(parent, want) {
            if !wstatus.is_null() {
                wstatus.write(exit_code);
            }
            return Ok(pid);
        }
        if options & WNOHANG != 0 {
            return Ok(0);
        }
        scheduler::schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86::trapframe::InterruptFrame;
    use crate::mm::paging;
    use crate::process::task::TaskState;
    use crate::process::{alloc_task, kernel_stack_top, link_child};

    fn reset() {
        crate::mm::pmm::initialize(0x40_0000, 512);
        unsafe {
            paging::kernel_page_init(512 * crate::mm::pmm::PAGE_SIZE);
        }
    }

    fn spawn(parent: Option<Pid>) -> Pid {
        let pid = alloc_task().unwrap();
        unsafe {
            let pd = paging::create_user_page_dir().unwrap();
            let stack_top = kernel_stack_top(pid);
            let frame_addr = stack_top - core::mem::size_of::<InterruptFrame>() as u32;
            core::ptr::write(frame_addr as *mut InterruptFrame, InterruptFrame::default());
            let t = task_mut(pid);
            t.page_dir = pd;
            t.interrupt_frame = frame_addr as *mut InterruptFrame;
            t.tss_image.esp0 = stack_top;
            t.state = TaskState::Ready;
            if let Some(p) = parent {
                link_child(p, pid);
            }
        }
        pid
    }

    #[test]
    fn no_children_is_echild() {
        reset();
        let parent = spawn(None);
        unsafe {
            assert_eq!(wait(parent, -1, core::ptr::null_mut(), 0), Err(Errno::ECHILD));
        }
    }

    #[test]
    fn wnohang_returns_zero_without_yielding_when_child_alive() {
        reset();
        let parent = spawn(None);
        let _child = spawn(Some(parent));
        unsafe {
            assert_eq!(wait(parent, -1, core::ptr::null_mut(), WNOHANG), Ok(0));
        }
    }

    #[test]
    fn reaps_zombie_child_and_writes_status() {
        reset();
        let parent = spawn(None);
        let child = spawn(Some(parent));
        unsafe {
            task_mut(child).state = TaskState::Zombie;
            task_mut(child).exit_code = 7;
        }
        let mut status: i32 = 0;
        let reaped = unsafe { wait(parent, -1, &mut status as *mut i32, WNOHANG) }.unwrap();
        assert_eq!(reaped, child);
        assert_eq!(status, 7);
        unsafe {
            assert!(task_mut(parent).child.is_none());
        }
    }

    #[test]
    fn waitpid_ignores_non_matching_sibling() {
        reset();
        let parent = spawn(None);
        let target = spawn(Some(parent));
        let other = spawn(Some(parent));
        unsafe {
            task_mut(other).state = TaskState::Zombie;
        }
        let result = unsafe { wait(parent, target as i32, core::ptr::null_mut(), WNOHANG) };
        assert_eq!(result, Ok(0));
    }
}
