//! 8254 Programmable Interval Timer, channel 0, used as the sole source of
//! scheduling ticks. There is no APIC timer or HPET in this kernel; the
//! PIT is all there is.

use super::pic;
use super::port::outb;
use core::sync::atomic::{AtomicU64, Ordering};

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;
const BASE_FREQUENCY: u32 = 1_193_182;

const MODE_SQUARE_WAVE: u8 = 0x36; // channel 0, lobyte/hibyte, mode 3

static TICKS: AtomicU64 = AtomicU64::new(0);

/// Programs channel 0 to fire at (approximately) `hz` and unmasks IRQ0.
///
/// # Safety
/// Performs raw port I/O; must run after [`super::pic::init`].
pub unsafe fn init(hz: u32) {
    let divisor = (BASE_FREQUENCY / hz).clamp(1, u16::MAX as u32) as u16;

    outb(COMMAND, MODE_SQUARE_WAVE);
    outb(CHANNEL0_DATA, (divisor & 0xFF) as u8);
    outb(CHANNEL0_DATA, (divisor >> 8) as u8);

    pic::enable_irq(0);
}

/// Called once per timer interrupt, before the scheduler is consulted.
pub fn tick() -> u64 {
    TICKS.fetch_add(1, Ordering::Relaxed) + 1
}

pub fn ticks() -> u64 {
    TICKS.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_counter_monotonically_increases() {
        let before = ticks();
        let observed = tick();
        assert_eq!(observed, before + 1);
        assert_eq!(ticks(), before + 1);
    }
}
