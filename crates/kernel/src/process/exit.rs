//! `exit`: tear down a task's address space while leaving its TCB around
//! for a parent to reap.
//!
//! A zombie keeps its process-table slot, exit code, and kernel stack; only
//! the user-half address space it owned is given back to the PMM, since
//! nothing after this point ever runs in user mode again.

use super::task::{Pid, TaskState, INIT_PID};
use super::{reparent_children_to_init, task_mut};
use crate::mm::paging;
use crate::process::scheduler;

/// Marks `pid` a zombie with `exit_code`, frees its user address space,
/// reparents its children to init, and switches away for good. Never
/// returns to the caller.
///
/// init exiting is fatal: there is nothing left to reparent orphans to, so
/// the kernel has no way to keep running.
///
/// # Safety
/// `pid` must be the current, running task; must run with interrupts
/// disabled (the usual syscall/trap invariant) and the kernel PD reachable
/// so the freed frames are addressable at their identity mapping.
pub unsafe fn exit(pid: Pid, exit_code: i32) -> ! {
    if pid == INIT_PID {
        panic!("init task exit");
    }

    scheduler::switch_state(pid, TaskState::Zombie);
    task_mut(pid).exit_code = exit_code;

    let pd = task_mut(pid).page_dir;
    paging::free_user_address_space(pd);
    task_mut(pid).page_dir = 0;

    reparent_children_to_init(pid);

    scheduler::retire_current();
    unreachable!("process: exited task resumed after retire_current");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86::trapframe::InterruptFrame;
    use crate::mm::pmm;
    use crate::process::{alloc_task, kernel_stack_top, link_child, set_current};

    fn reset() {
        pmm::initialize(0x40_0000, 512);
        unsafe {
            paging::kernel_page_init(512 * pmm::PAGE_SIZE);
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

    /// Runs the address-space-teardown half of `exit` without the final
    /// `retire_current` (host-side tests have no second task to switch
    /// into, and this is the half under test here anyway).
    unsafe fn exit_without_retiring(pid: Pid, exit_code: i32) {
        scheduler::switch_state(pid, TaskState::Zombie);
        task_mut(pid).exit_code = exit_code;
        let pd = task_mut(pid).page_dir;
        paging::free_user_address_space(pd);
        task_mut(pid).page_dir = 0;
        reparent_children_to_init(pid);
    }

    #[test]
    #[should_panic(expected = "init task exit")]
    fn init_exiting_is_fatal() {
        reset();
        let init = spawn(None);
        assert_eq!(init, crate::process::task::INIT_PID);
        unsafe {
            set_current(Some(init));
            task_mut(init).state = TaskState::Running;
            exit(init, 0);
        }
    }

    #[test]
    fn marks_zombie_and_stores_exit_code() {
        reset();
        let pid = spawn(None);
        unsafe {
            set_current(Some(pid));
            task_mut(pid).state = TaskState::Running;
            exit_without_retiring(pid, 42);
            assert!(task_mut(pid).is_zombie());
            assert_eq!(task_mut(pid).exit_code, 42);
        }
    }

    #[test]
    fn children_are_reparented_to_init() {
        reset();
        // Slot 1 is INIT_PID; give it a real task so link_child has somewhere
        // sane to attach the reparented child.
        let init = spawn(None);
        assert_eq!(init, crate::process::task::INIT_PID);
        let parent = spawn(None);
        let child = spawn(Some(parent));
        unsafe {
            set_current(Some(parent));
            task_mut(parent).state = TaskState::Running;
            exit_without_retiring(parent, 0);
            assert_eq!(task_mut(child).parent, Some(init));
            assert_eq!(task_mut(init).child, Some(child));
        }
    }

    #[test]
    fn address_space_frames_return_to_the_pmm() {
        reset();
        let pid = spawn(None);
        unsafe {
            set_current(Some(pid));
            task_mut(pid).state = TaskState::Running;
            let pd = task_mut(pid).page_dir;
            let frame = pmm::try_alloc_frame().unwrap();
            paging::map_physical_page(pd, frame, true, true).unwrap();
            exit_without_retiring(pid, 0);
            // The mapped frame, the page table backing it, and the PD are
            // all back on the free list.
            pmm::try_alloc_frame().unwrap();
            pmm::try_alloc_frame().unwrap();
            pmm::try_alloc_frame().unwrap();
        }
    }
}
