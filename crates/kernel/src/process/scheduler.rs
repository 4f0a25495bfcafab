//! Round-robin scheduler: ready-queue management and the two places a
//! context switch is triggered from.
//!
//! [`on_timer_tick`] is called from the timer ISR; [`schedule`] is called
//! directly by `wait`/`waitpid` when they have nothing to do but give up the
//! CPU. Both end up in [`yield_to_next`], which is the only place that
//! actually moves a task out of `Running`. [`switch_state`] mirrors the
//! legality checks a production scheduler runs on every switch: a task can
//! only become `Running` from `Ready`, and only `Running` tasks get demoted
//! back to `Ready`.

use super::task::{Pid, TaskState};
use super::{current_pid, ready_queue_pop_front, ready_queue_push_back, set_current, task_mut};
use crate::arch::x86::context;
use crate::arch::x86::gdt;
use crate::arch::x86::trapframe::InterruptFrame;
use crate::mm::paging;

/// Validates and applies a state transition, panicking on one this scheduler
/// never expects to make, so a logic bug trips immediately instead of
/// quietly corrupting the ready queue.
pub fn switch_state(pid: Pid, new_state: TaskState) {
    let task = unsafe { task_mut(pid) };
    let legal = matches!(
        (task.state, new_state),
        (TaskState::None, TaskState::Ready)
            | (TaskState::Ready, TaskState::Running)
            | (TaskState::Running, TaskState::Ready)
            | (TaskState::Running, TaskState::Zombie)
            | (TaskState::Zombie, TaskState::Dead)
    );
    if !legal {
        panic!("scheduler: illegal transition {:?} -> {:?} for pid {}", task.state, new_state, pid);
    }
    task.state = new_state;
}

/// Dummy save slot for the one-time handoff out of the boot stack into the
/// first task. Nothing ever switches back into it.
static mut BOOT_ESP: u32 = 0;

/// Installs `pid` as the running task and performs the one-way switch off
/// the boot stack. Never returns.
///
/// # Safety
/// Must be called exactly once, after `pid`'s address space and kernel stack
/// (including a bootstrapped `kernel_esp`) are fully set up, with interrupts
/// disabled.
pub unsafe fn start(pid: Pid) -> ! {
    let task = task_mut(pid);
    task.state = TaskState::Running;
    gdt::set_kernel_stack(task.tss_image.esp0);
    paging::switch_address_space(task.page_dir);
    set_current(Some(pid));

    let next_esp = task.kernel_esp;
    context::switch_to(core::ptr::addr_of_mut!(BOOT_ESP), next_esp);
    unreachable!("scheduler: boot context resumed, which never happens")
}

/// Switches the hardware state (TSS `esp0`, CR3, `current`) to `next`, then
/// parks the caller's kernel stack and resumes `next`'s. Returns once some
/// later switch hands control back to the caller.
fn context_switch(current: Pid, next: Pid) {
    unsafe {
        switch_state(next, TaskState::Running);
        let next_task = task_mut(next);
        gdt::set_kernel_stack(next_task.tss_image.esp0);
        paging::switch_address_space(next_task.page_dir);
        set_current(Some(next));
        let next_esp = next_task.kernel_esp;

        let cur = task_mut(current);
        context::switch_to(core::ptr::addr_of_mut!(cur.kernel_esp), next_esp);
    }
}

/// Picks the next ready task and switches to it, requeueing the caller as
/// `Ready` first when `requeue_self` is set. If the ready queue is empty,
/// this is a no-op and the caller just keeps running — there's no idle
/// task, so "nothing else to do" and "stay running" are the same thing.
fn yield_to_next(requeue_self: bool) {
    let Some(cur) = current_pid() else {
        return;
    };
    let Some(next) = ready_queue_pop_front() else {
        return;
    };
    if requeue_self {
        switch_state(cur, TaskState::Ready);
        ready_queue_push_back(cur);
    }
    context_switch(cur, next);
}

/// Called from the timer ISR with the interrupted task's freshly built
/// frame. Records it (fork/exit and debugging both want an up-to-date
/// `interrupt_frame`), then preempts into the next ready task if there is
/// one.
///
/// # Safety
/// Must run on the timer vector's own stack, with `frame` pointing at a live
/// `InterruptFrame` on it.
pub unsafe fn on_timer_tick(frame: *mut InterruptFrame) {
    if let Some(cur) = current_pid() {
        task_mut(cur).interrupt_frame = frame;
    }
    yield_to_next(true);
}

/// Voluntary yield, used by `wait`/`waitpid` when they find nothing to reap
/// yet. Behaves exactly like a timer preemption from the scheduler's point
/// of view; the only difference is where in the call stack it's invoked
/// from. Returns once this task is scheduled again, letting the caller's
/// retry loop continue right where it left off.
pub fn schedule() {
    yield_to_next(true);
}

/// Gives up the CPU for good: the caller is never requeued, so unless it's
/// later put back on the ready list by something else (which `exit` never
/// does), this call never returns to it. Used by `exit` once the outgoing
/// task has been marked `Zombie`.
///
/// # Safety
/// The caller must already be out of the ready queue and must never be
/// referenced as `current` again once this call returns control elsewhere.
pub unsafe fn retire_current() {
    yield_to_next(false);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "illegal transition")]
    fn cannot_run_a_task_that_was_never_ready() {
        switch_state(2, TaskState::Running);
    }
}
