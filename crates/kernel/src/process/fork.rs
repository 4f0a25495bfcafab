//! `fork`: duplicate a running task into a new, independent one.

use super::task::{Pid, TaskState};
use super::{alloc_task, free_task, kernel_stack_top, link_child, ready_queue_push_back, task_mut};
use crate::arch::x86::context;
use crate::arch::x86::trapframe::InterruptFrame;
use crate::lib::error::{Errno, Result};
use crate::mm::paging;

/// Deep-copies `parent`'s address space and register state into a new
/// task. Returns the child's pid; the parent's own `eax` (its syscall
/// return value) is left untouched here and is set by the normal syscall
/// return path once this call completes.
///
/// # Safety
/// Must run with the kernel PD installed and interrupts disabled; `parent`
/// must be a live, running task.
pub unsafe fn fork_task(parent: Pid) -> Result<Pid> {
    let child = alloc_task().map_err(|_| Errno::EAGAIN)?;

    let dst_pd = match paging::create_user_page_dir() {
        Ok(pd) => pd,
        Err(_) => {
            free_task(child);
            return Err(Errno::ENOMEM);
        }
    };

    let parent_pd = task_mut(parent).page_dir;
    if !paging::copy_address_space(dst_pd, parent_pd) {
        free_task(child);
        return Err(Errno::ENOMEM);
    }

    let stack_top = kernel_stack_top(child);
    let frame_size = core::mem::size_of::<InterruptFrame>() as u32;
    let child_frame_addr = stack_top - frame_size;
    let child_frame = child_frame_addr as *mut InterruptFrame;

    let parent_frame = &*task_mut(parent).interrupt_frame;
    core::ptr::write(child_frame, *parent_frame);
    (*child_frame).eax = 0; // the fork() return value seen by the child

    let child_task = task_mut(child);
    child_task.page_dir = dst_pd;
    child_task.interrupt_frame = child_frame;
    child_task.tss_image.esp0 = stack_top;
    child_task.kernel_esp = context::bootstrap_kernel_esp(child_frame_addr);
    child_task.state = TaskState::Ready;

    link_child(parent, child);
    ready_queue_push_back(child);

    Ok(child)
}
