//! The task control block and the process table it lives in.
//!
//! Each slot co-locates a TCB with its one-page kernel stack: the TCB
//! occupies the low bytes of the page, the stack grows down from the high
//! end. There is no separate heap allocation for either piece, so task
//! creation never touches the allocator on the hot path.

use crate::arch::x86::trapframe::InterruptFrame;
use crate::mm::pmm::PAGE_SIZE;

pub const NR_TASKS: usize = 100;
pub const INIT_PID: Pid = 1;

/// A small positive integer, unique for the kernel's lifetime. `pid - 1` is
/// also this task's slot index into the process table, so the table
/// doubles as the arena for parent/child/sibling links; a `Pid` never
/// aliases a live task it doesn't own, which sidesteps dangling references
/// when a sibling scans the tree while a child is reaped.
pub type Pid = u32;

pub fn pid_to_slot(pid: Pid) -> usize {
    (pid - 1) as usize
}

pub fn slot_to_pid(slot: usize) -> Pid {
    (slot + 1) as Pid
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    None,
    Ready,
    Running,
    Blocked,
    Zombie,
    Dead,
}

/// Snapshot of the fields the hardware TSS actually needs per task: the
/// ring-0 stack to use on the next privilege-raising trap. Everything else
/// in the hardware TSS is fixed at boot (`ss0`, segment selectors).
#[derive(Debug, Clone, Copy)]
pub struct TssImage {
    pub esp0: u32,
}

#[derive(Clone, Copy)]
pub struct Task {
    pub pid: Pid,
    pub state: TaskState,
    pub exit_code: i32,

    /// Pointer into this task's own kernel stack; this frame IS the resume
    /// context restored by `iret` the first time this task ever runs, and
    /// again whenever it's switched back in across a syscall boundary rather
    /// than mid-function.
    pub interrupt_frame: *mut InterruptFrame,
    pub page_dir: u32,
    pub tss_image: TssImage,

    /// Saved stack pointer for `context::switch_to`. Valid whenever this
    /// task isn't the one currently running; for a task that has never run,
    /// it's a bootstrap frame built by `context::bootstrap_kernel_esp`.
    pub kernel_esp: u32,

    // Scheduler-queue linkage (ready list only; blocked list is reserved).
    pub prev: Option<Pid>,
    pub next: Option<Pid>,

    // Process tree.
    pub parent: Option<Pid>,
    pub child: Option<Pid>,
    pub sibling: Option<Pid>,
}

impl Task {
    pub const fn empty() -> Self {
        Self {
            pid: 0,
            state: TaskState::None,
            exit_code: 0,
            interrupt_frame: core::ptr::null_mut(),
            page_dir: 0,
            tss_image: TssImage { esp0: 0 },
            kernel_esp: 0,
            prev: None,
            next: None,
            parent: None,
            child: None,
            sibling: None,
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.state == TaskState::Zombie
    }

    pub fn is_free(&self) -> bool {
        matches!(self.state, TaskState::None | TaskState::Dead)
    }
}

/// One process table entry: the TCB plus its private kernel stack, laid
/// out so the stack's high end is the slot's own end address.
#[repr(C, align(4096))]
pub struct TaskSlot {
    pub task: Task,
    stack: [u8; PAGE_SIZE as usize - core::mem::size_of::<Task>()],
}

impl TaskSlot {
    const fn empty() -> Self {
        Self { task: Task::empty(), stack: [0; PAGE_SIZE as usize - core::mem::size_of::<Task>()] }
    }

    /// Top-of-stack address: the first byte past the end of this slot,
    /// where a fresh interrupt frame is pushed downward from.
    pub fn kernel_stack_top(&self) -> u32 {
        (self as *const Self as u32) + PAGE_SIZE
    }
}

pub static mut TASKS: [TaskSlot; NR_TASKS] = [const { TaskSlot::empty() }; NR_TASKS];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_starts_as_none_and_is_free() {
        let t = Task::empty();
        assert_eq!(t.state, TaskState::None);
        assert!(t.is_free());
        assert!(!t.is_zombie());
    }

    #[test]
    fn kernel_stack_top_is_page_aligned_above_slot() {
        let slot = TaskSlot::empty();
        let base = &slot as *const TaskSlot as u32;
        assert_eq!(slot.kernel_stack_top(), base + PAGE_SIZE);
    }
}
