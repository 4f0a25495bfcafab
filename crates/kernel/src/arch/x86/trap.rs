//! Common trap entry/exit and the vector dispatch table.
//!
//! Every exception, every remapped IRQ, and `int 0x80` all land in the same
//! handful of bytes of assembly, which builds an [`InterruptFrame`] on the
//! current kernel stack and calls into [`trap_dispatch`]. Scheduling does not
//! happen by handing a different `esp` back to this code: `trap_dispatch`
//! (by way of the scheduler) may call [`super::context::switch_to`], which
//! parks this task's own kernel stack mid-call and resumes a different one.
//! When this task is switched back in, `switch_to` returns normally,
//! `trap_dispatch` returns normally, and this same epilogue runs `iretd`
//! against this task's own, untouched frame. `trap_epilogue` is exposed so a
//! task that has never run before can be bootstrapped straight into it.

use super::trapframe::InterruptFrame;
use super::{pic, pit};
use crate::process::scheduler;
use crate::syscall;

core::arch::global_asm!(
    r#"
.macro isr_noerr num
.global isr\num
isr\num:
    push 0
    push \num
    jmp trap_common_stub
.endm

.macro isr_err num
.global isr\num
isr\num:
    push \num
    jmp trap_common_stub
.endm

isr_noerr 0
isr_noerr 1
isr_noerr 2
isr_noerr 3
isr_noerr 4
isr_noerr 5
isr_noerr 6
isr_noerr 7
isr_err   8
isr_noerr 9
isr_err   10
isr_err   11
isr_err   12
isr_err   13
isr_err   14
isr_noerr 15
isr_noerr 16
isr_err   17
isr_noerr 18
isr_noerr 19
isr_noerr 20
isr_noerr 21
isr_noerr 22
isr_noerr 23
isr_noerr 24
isr_noerr 25
isr_noerr 26
isr_noerr 27
isr_noerr 28
isr_noerr 29
isr_err   30
isr_noerr 31

isr_noerr 32
isr_noerr 33
isr_noerr 34
isr_noerr 35
isr_noerr 36
isr_noerr 37
isr_noerr 38
isr_noerr 39
isr_noerr 40
isr_noerr 41
isr_noerr 42
isr_noerr 43
isr_noerr 44
isr_noerr 45
isr_noerr 46
isr_noerr 47

isr_noerr 128

trap_common_stub:
    pusha
    push ds
    push es
    push fs
    push gs

    mov ax, 0x10
    mov ds, ax
    mov es, ax
    mov fs, ax
    mov gs, ax

    push esp
    call trap_dispatch
    add esp, 4

.global trap_epilogue
trap_epilogue:
    pop gs
    pop fs
    pop es
    pop ds
    popa
    add esp, 8
    iretd
"#
);

extern "C" {
    /// The tail of `trap_common_stub`: pops the segment/GP registers an
    /// `InterruptFrame` carries and `iret`s. A freshly created task's
    /// bootstrap context (see `context::bootstrap_kernel_esp`) jumps here
    /// directly with `esp` already pointing at its synthetic frame, since it
    /// has no trap to return from.
    pub fn trap_epilogue();
}

extern "C" {
    pub fn isr0();
    pub fn isr1();
    pub fn isr2();
    pub fn isr3();
    pub fn isr4();
    pub fn isr5();
    pub fn isr6();
    pub fn isr7();
    pub fn isr8();
    pub fn isr9();
    pub fn isr10();
    pub fn isr11();
    pub fn isr12();
    pub fn isr13();
    pub fn isr14();
    pub fn isr15();
    pub fn isr16();
    pub fn isr17();
    pub fn isr18();
    pub fn isr19();
    pub fn isr20();
    pub fn isr21();
    pub fn isr22();
    pub fn isr23();
    pub fn isr24();
    pub fn isr25();
    pub fn isr26();
    pub fn isr27();
    pub fn isr28();
    pub fn isr29();
    pub fn isr30();
    pub fn isr31();
    pub fn isr32();
    pub fn isr33();
    pub fn isr34();
    pub fn isr35();
    pub fn isr36();
    pub fn isr37();
    pub fn isr38();
    pub fn isr39();
    pub fn isr40();
    pub fn isr41();
    pub fn isr42();
    pub fn isr43();
    pub fn isr44();
    pub fn isr45();
    pub fn isr46();
    pub fn isr47();
    pub fn isr128();
}

const EXCEPTION_NAMES: [&str; 32] = [
    "divide-by-zero",
    "debug",
    "non-maskable-interrupt",
    "breakpoint",
    "overflow",
    "bound-range-exceeded",
    "invalid-opcode",
    "device-not-available",
    "double-fault",
    "coprocessor-segment-overrun",
    "invalid-tss",
    "segment-not-present",
    "stack-segment-fault",
    "general-protection-fault",
    "page-fault",
    "reserved-15",
    "x87-floating-point",
    "alignment-check",
    "machine-check",
    "simd-floating-point",
    "virtualization",
    "control-protection",
    "reserved-22",
    "reserved-23",
    "reserved-24",
    "reserved-25",
    "reserved-26",
    "reserved-27",
    "hypervisor-injection",
    "vmm-communication",
    "security",
    "reserved-31",
];

const TIMER_VECTOR: u32 = 32;
const SYSCALL_VECTOR: u32 = 0x80;
const SPURIOUS_MASTER: u32 = 39;
const SPURIOUS_SLAVE: u32 = 47;

/// Rust-side trap dispatcher, called by `trap_common_stub` with `esp`
/// pointing at the freshly built [`InterruptFrame`].
///
/// Returns normally in the ordinary case, letting the epilogue below `iret`
/// out of this same frame. On the timer vector it may call into the
/// scheduler, which may itself switch to a different task's kernel stack for
/// a while before this call frame is ever resumed — from this function's own
/// point of view that is indistinguishable from an ordinary (if slow)
/// function call returning.
///
/// # Safety
/// Called only from assembly immediately after the frame is constructed;
/// `frame` must point at a live, fully populated `InterruptFrame`.
#[no_mangle]
pub unsafe extern "C" fn trap_dispatch(frame: *mut InterruptFrame) {
    let frame_mut = &mut *frame;

    match frame_mut.vector {
        v if v < 32 => {
            panic!(
                "unhandled CPU exception {} ({}) at eip={:#x} err={:#x}",
                v, EXCEPTION_NAMES[v as usize], frame_mut.eip, frame_mut.err_code
            );
        }
        TIMER_VECTOR => {
            pic::end_of_interrupt(0);
            pit::tick();
            scheduler::on_timer_tick(frame);
        }
        v if (33..40).contains(&v) => {
            if v != SPURIOUS_MASTER || !pic::is_spurious(false) {
                pic::end_of_interrupt((v - 32) as u8);
            }
        }
        v if (40..48).contains(&v) => {
            if v != SPURIOUS_SLAVE || !pic::is_spurious(true) {
                pic::end_of_interrupt((v - 32) as u8);
            }
        }
        SYSCALL_VECTOR => {
            syscall::dispatch(frame_mut);
        }
        other => panic!("unhandled interrupt vector {}", other),
    }
}
