//! 32-bit protected-mode architecture support.
//!
//! Boot order, matching what every later subsystem assumes is already true:
//!
//! ```text
//! disable interrupts
//!     -> gdt::init()       flat ring0/ring3 segments + TSS
//!     -> idt::init()       256-gate IDT, exceptions + syscall gate
//!     -> pic::init()       remap IRQs to vectors 32-47
//!     -> pit::init(hz)     periodic timer tick
//!     -> enable interrupts
//! ```
//!
//! There is no APIC, no SMP bring-up, and no long-mode switch anywhere in
//! this module: the kernel never leaves protected mode.

pub mod cmos;
pub mod context;
pub mod gdt;
pub mod idt;
pub mod pic;
pub mod pit;
pub mod port;
pub mod trap;
pub mod trapframe;
pub mod vga;

/// Brings up segmentation, interrupt handling, and the timer. Must run once,
/// very early in `main`, before paging or the process table are touched.
///
/// # Safety
/// Must be called exactly once, before any code relies on the GDT, IDT, or
/// timer ticks being active.
pub unsafe fn init(timer_hz: u32) {
    port::disable_interrupts();

    gdt::init();
    crate::info!("gdt: loaded, kernel/user segments + tss");

    idt::init();
    crate::info!("idt: loaded, 256 gates");

    pic::init();
    crate::info!("pic: remapped to vectors 32..48");

    pit::init(timer_hz);
    crate::info!("pit: channel 0 at {} Hz", timer_hz);

    port::enable_interrupts();
}

#[inline]
pub fn halt() {
    unsafe {
        core::arch::asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

#[inline]
pub fn halt_loop() -> ! {
    loop {
        port::disable_interrupts();
        halt();
    }
}
