//! Process table, lifecycle, and scheduling.
//!
//! The table is a fixed `NR_TASKS` array; it is never grown, never
//! compacted, and never touches the allocator. All mutation happens with
//! interrupts disabled (either inside a trap handler or inside a syscall
//! that explicitly gates them), so a `spin::Mutex` here exists to make that
//! invariant a compile-time-checked borrow rather than to arbitrate real
//! contention — there is exactly one CPU.

pub mod elf;
pub mod exec;
pub mod exit;
pub mod fork;
pub mod scheduler;
pub mod spawn;
pub mod task;
pub mod wait;

use crate::lib::error::KernelError;
use spin::Mutex;
use task::{Pid, Task, TaskSlot, TaskState, NR_TASKS};

struct ProcessTable {
    used: [u8; NR_TASKS / 8 + 1],
    ready_head: Option<Pid>,
    ready_tail: Option<Pid>,
    current: Option<Pid>,
}

impl ProcessTable {
    const fn new() -> Self {
        Self { used: [0; NR_TASKS / 8 + 1], ready_head: None, ready_tail: None, current: None }
    }

    fn mark_used(&mut self, slot: usize) {
        self.used[slot / 8] |= 1 << (slot % 8);
    }

    fn mark_free(&mut self, slot: usize) {
        self.used[slot / 8] &= !(1 << (slot % 8));
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        for slot in 0..NR_TASKS {
            if self.used[slot / 8] & (1 << (slot % 8)) == 0 {
                self.mark_used(slot);
                return Some(slot);
            }
        }
        None
    }
}

static PROCESS_TABLE: Mutex<ProcessTable> = Mutex::new(ProcessTable::new());

/// # Safety
/// Caller must hold exclusive access appropriate to a single-CPU,
/// interrupts-gated critical section (see module docs).
pub unsafe fn task_mut(pid: Pid) -> &'static mut Task {
    &mut task::TASKS[task::pid_to_slot(pid)].task
}

pub fn current_pid() -> Option<Pid> {
    PROCESS_TABLE.lock().current
}

/// # Safety
/// See [`task_mut`].
pub unsafe fn current_task() -> Option<&'static mut Task> {
    current_pid().map(|pid| task_mut(pid))
}

fn slot_addr(slot: usize) -> *const TaskSlot {
    unsafe { core::ptr::addr_of!(task::TASKS[slot]) }
}

/// Allocates a free TCB slot and returns its fresh pid. The slot starts in
/// state `None`; the caller finishes initializing it before transitioning
/// to `Ready`.
pub fn alloc_task() -> Result<Pid, KernelError> {
    let mut table = PROCESS_TABLE.lock();
    let slot = table.alloc_slot().ok_or(KernelError::OutOfMemory)?;
    let pid = task::slot_to_pid(slot);
    unsafe {
        task::TASKS[slot].task = Task { pid, ..Task::empty() };
    }
    Ok(pid)
}

/// Marks a slot `Dead` (reusable) and clears its bitmap bit. Called only
/// after a parent has reaped the zombie's exit code.
pub fn free_task(pid: Pid) {
    let mut table = PROCESS_TABLE.lock();
    table.mark_free(task::pid_to_slot(pid));
    unsafe {
        task_mut(pid).state = TaskState::Dead;
    }
}

pub fn kernel_stack_top(pid: Pid) -> u32 {
    unsafe { (*slot_addr(task::pid_to_slot(pid))).kernel_stack_top() }
}

/// Links `child` as the first entry of `parent`'s child list.
///
/// # Safety
/// Caller must hold the table invariant (single-CPU, interrupts-gated).
pub unsafe fn link_child(parent: Pid, child: Pid) {
    let old_head = task_mut(parent).child;
    task_mut(child).sibling = old_head;
    task_mut(child).parent = Some(parent);
    task_mut(parent).child = Some(child);
}

/// Detaches `child` from its parent's child list (used when reaping).
///
/// # Safety
/// See [`link_child`].
pub unsafe fn unlink_child(parent: Pid, child: Pid) {
    let mut cursor = task_mut(parent).child;
    let mut prev: Option<Pid> = None;
    while let Some(pid) = cursor {
        let next = task_mut(pid).sibling;
        if pid == child {
            match prev {
                Some(p) => task_mut(p).sibling = next,
                None => task_mut(parent).child = next,
            }
            task_mut(child).sibling = None;
            task_mut(child).parent = None;
            return;
        }
        prev = cursor;
        cursor = next;
    }
}

/// Reparents every child of `pid` onto init's child list, per exit
/// semantics. Runs with the process table treated as locked for the whole
/// exit+reparent sequence by virtue of interrupts being disabled throughout.
///
/// # Safety
/// See [`link_child`].
pub unsafe fn reparent_children_to_init(pid: Pid) {
    while let Some(child) = task_mut(pid).child {
        unlink_child(pid, child);
        link_child(task::INIT_PID, child);
    }
}

pub fn ready_queue_push_back(pid: Pid) {
    let mut table = PROCESS_TABLE.lock();
    unsafe {
        task_mut(pid).next = None;
        task_mut(pid).prev = table.ready_tail;
        match table.ready_tail {
            Some(tail) => task_mut(tail).next = Some(pid),
            None => table.ready_head = Some(pid),
        }
    }
    table.ready_tail = Some(pid);
}

pub fn ready_queue_pop_front() -> Option<Pid> {
    let mut table = PROCESS_TABLE.lock();
    let head = table.ready_head?;
    unsafe {
        let next = task_mut(head).next;
        table.ready_head = next;
        match next {
            Some(n) => task_mut(n).prev = None,
            None => table.ready_tail = None,
        }
        task_mut(head).next = None;
        task_mut(head).prev = None;
    }
    Some(head)
}

pub fn set_current(pid: Option<Pid>) {
    PROCESS_TABLE.lock().current = pid;
}
