#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), no_main)]
#![feature(alloc_error_handler)]

extern crate alloc;

use arch::x86::vga;
use process::task::INIT_PID;

#[allow(special_module_name)]
pub mod lib;

pub mod arch {
    pub mod x86;
}

pub mod fs;
pub mod mm;
pub mod process;
pub mod syscall;

/// Physical addresses where the loader leaves the kernel image's
/// `[start, end)` as two 32-bit little-endian words.
const P_KERNEL_ADDR_START: *const u32 = 0x1000 as *const u32;
const P_KERNEL_ADDR_END: *const u32 = 0x1004 as *const u32;

const TIMER_HZ: u32 = 100;
const INIT_PATH: &str = "/bin/init";

#[cfg(not(test))]
#[no_mangle]
pub extern "C" fn _start() -> ! {
    unsafe { kernel_main() }
}

/// Brings the machine from "loader just jumped here" to "init is runnable",
/// following the order every later subsystem assumes already happened: TTY,
/// then traps and timer, then RAM detection, then the physical/virtual
/// memory managers, then the first task.
///
/// # Safety
/// Must run exactly once, as the very first Rust code after the loader's
/// jump, with paging still disabled and interrupts still whatever state the
/// loader left them in.
unsafe fn kernel_main() -> ! {
    vga::clear();
    lib::heap::init();

    crate::info!("pmkernel {} booting", crate::lib::build_info::GIT_HASH);

    arch::x86::init(TIMER_HZ);

    let ram_bytes = arch::x86::cmos::detect_ram_bytes();
    crate::info!("cmos: {} MiB RAM detected", ram_bytes / (1024 * 1024));

    let kernel_start = core::ptr::read_volatile(P_KERNEL_ADDR_START);
    let kernel_end = core::ptr::read_volatile(P_KERNEL_ADDR_END);
    crate::info!("loader: kernel image [{:#x}, {:#x})", kernel_start, kernel_end);

    mm::init(kernel_end, ram_bytes as u32);

    let mut disk = fs::UnimplementedDisk;
    let init_pid = match process::spawn::create_task_from_elf(&mut disk, INIT_PATH, None) {
        Ok(pid) => pid,
        Err(e) => panic!("boot: failed to load {}: {:?}", INIT_PATH, e),
    };
    assert_eq!(init_pid, INIT_PID, "boot: init must be the first task created");
    process::scheduler::switch_state(init_pid, process::task::TaskState::Ready);
    crate::info!("process: {} loaded as pid {}", INIT_PATH, init_pid);

    process::scheduler::start(init_pid)
}
