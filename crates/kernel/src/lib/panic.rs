//! Panic handler: red-on-black banner, recent log dump, then halt.
//!
//! Every unrecoverable kernel error (PMM exhaustion, double free, double map,
//! unknown syscall, a CPU exception with no dedicated handler) routes here
//! through `panic!`. There is no recovery path — the handler's only jobs are
//! to get the failure in front of the operator and stop the CPU.

use core::fmt::Write;
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicBool, Ordering};

static PANICKING: AtomicBool = AtomicBool::new(false);

struct PanicWriter;

impl Write for PanicWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        crate::arch::x86::vga::write_str_attr(s, 0x4f);
        Ok(())
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic_handler(info: &PanicInfo) -> ! {
    crate::arch::x86::port::disable_interrupts();

    if PANICKING.swap(true, Ordering::SeqCst) {
        // Re-entrant panic: don't recurse into formatting again, just halt.
        halt();
    }

    let mut w = PanicWriter;
    let _ = writeln!(w, "\n*** KERNEL PANIC ***");
    if let Some(loc) = info.location() {
        let _ = writeln!(w, "at {}:{}:{}", loc.file(), loc.line(), loc.column());
    }
    let _ = writeln!(w, "{}", info.message());

    print_recent_log(&mut w);

    let _ = writeln!(w, "\nsystem halted (build {})", crate::lib::build_info::GIT_HASH);
    halt();
}

fn print_recent_log(w: &mut PanicWriter) {
    use crate::lib::printk::LogEntry;
    let mut recent: [Option<LogEntry>; 16] = [None; 16];
    let n = crate::lib::printk::recent_into(&mut recent);
    if n == 0 {
        return;
    }
    let _ = writeln!(w, "\nrecent log:");
    for entry in recent.iter().take(n) {
        if let Some(e) = entry {
            let _ = writeln!(w, "  [{}] {}", e.level.as_str(), e.as_str());
        }
    }
}

fn halt() -> ! {
    loop {
        unsafe {
            core::arch::asm!("hlt", options(nomem, nostack));
        }
    }
}
