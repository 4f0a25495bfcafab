//! Kernel-stack context switching.
//!
//! `switch_to` is the one place a task's kernel-mode register state (the
//! callee-saved GPRs and `eflags`; everything else is caller-saved by the C
//! calling convention) is saved and restored across a switch. It works the
//! same way whether the switch happens because the timer fired mid-syscall
//! or because a task voluntarily yielded deep inside a blocking wait loop:
//! the caller's own stack frame, and everything beneath it, is left
//! untouched, so when some other task later switches back into it, `ret`
//! resumes exactly where it left off.
//!
//! A task that has never run has no such saved frame yet.
//! [`bootstrap_kernel_esp`] fabricates one whose "return address" is
//! `first_entry`, a small trampoline living in the same assembly block as
//! `switch_to`, so the very first switch into a new task looks to
//! `switch_to` exactly like resuming an old one. `first_entry` is raw
//! assembly rather than an `extern "C" fn" because `switch_to`'s `ret`
//! leaves the stack one word short of what a real `call` would have left
//! for a C-ABI argument: there's no return address above the argument for a
//! compiler-generated prologue to skip past. Popping it directly sidesteps
//! the mismatch entirely.

core::arch::global_asm!(
    r#"
.global switch_to
switch_to:
    push ebp
    mov ebp, esp
    pushfd
    push ebx
    push esi
    push edi

    mov eax, [ebp + 8]
    mov [eax], esp

    mov esp, [ebp + 12]

    pop edi
    pop esi
    pop ebx
    popfd
    pop ebp
    ret

.global first_entry
first_entry:
    pop eax
    mov esp, eax
    jmp trap_epilogue
"#
);

extern "C" {
    /// Saves the current kernel-mode context, writes the resulting `esp`
    /// through `prev_esp_slot`, then loads `next_esp` and resumes whatever
    /// context it was saved from. Returns only once some later `switch_to`
    /// call switches back into the context this call saved.
    ///
    /// # Safety
    /// `next_esp` must be either a value previously written through some
    /// task's `prev_esp_slot` by this same function, or a value produced by
    /// [`bootstrap_kernel_esp`] for a task that has never run.
    pub fn switch_to(prev_esp_slot: *mut u32, next_esp: u32);
}

/// Number of `u32` slots `bootstrap_kernel_esp` fabricates below the target
/// interrupt frame: edi, esi, ebx, eflags, ebp, return address, one argument.
const BOOTSTRAP_WORDS: u32 = 7;

/// Builds a fake `switch_to`-saved frame directly below `frame_addr` on a
/// task's kernel stack, such that the first `switch_to` into this task pops
/// straight into `first_entry`, which in turn pops `frame_addr` itself off
/// the stack and jumps into the trap epilogue to `iret` into it.
///
/// # Safety
/// `frame_addr` must point at a fully populated `InterruptFrame` belonging to
/// this same kernel stack, with at least `BOOTSTRAP_WORDS * 4` free bytes
/// beneath it.
pub unsafe fn bootstrap_kernel_esp(frame_addr: u32) -> u32 {
    extern "C" {
        fn first_entry();
    }
    let base = frame_addr - BOOTSTRAP_WORDS * 4;
    let mut slot = base as *mut u32;
    let mut write = |value: u32| {
        slot.write(value);
        slot = slot.add(1);
    };
    write(0); // edi
    write(0); // esi
    write(0); // ebx
    write(0x202); // eflags, interrupts enabled
    write(0); // ebp
    write(first_entry as u32); // "return address" switch_to's ret lands on
    write(frame_addr); // popped by first_entry itself
    base
}
