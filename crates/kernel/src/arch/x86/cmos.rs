//! CMOS RTC register access, used only for extended-RAM-size detection at boot.

use super::port::{inb, outb};

const CMOS_ADDR: u16 = 0x70;
const CMOS_DATA: u16 = 0x71;

const REG_EXTMEM_LOW: u8 = 0x34;
const REG_EXTMEM_HIGH: u8 = 0x35;

/// Total installed RAM in bytes, as reported by the CMOS extended-memory
/// registers (units of 64 KiB, covering memory above the first 16 MiB).
///
/// Panics if the reported extended memory is zero, since this kernel's PMM
/// requires at least 16 MiB of RAM to operate.
pub fn detect_ram_bytes() -> u64 {
    let low = read_reg(REG_EXTMEM_LOW) as u64;
    let high = read_reg(REG_EXTMEM_HIGH) as u64;
    let extended_64kib_units = low | (high << 8);
    assert!(extended_64kib_units != 0, "CMOS reports no extended memory; need >= 16 MiB RAM");
    extended_64kib_units * 64 * 1024 + (16 << 20)
}

fn read_reg(index: u8) -> u8 {
    unsafe {
        outb(CMOS_ADDR, index);
        inb(CMOS_DATA)
    }
}
