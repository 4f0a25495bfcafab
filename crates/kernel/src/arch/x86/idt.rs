//! Interrupt Descriptor Table: 256 gates, all routed through the stubs in
//! [`super::trap`]. Vector 0x80 is the only gate reachable from ring 3
//! (DPL 3); every other vector is ring-0 only, since an exception or IRQ
//! always traps into the kernel regardless of which ring it interrupted.

use super::gdt::KERNEL_CODE_SEL;
use super::trap;
use core::mem::size_of;
use spin::Once;

const GATE_32BIT_INTERRUPT: u8 = 0x0E;
const PRESENT: u8 = 0x80;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    zero: u8,
    type_attr: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self { offset_low: 0, selector: 0, zero: 0, type_attr: 0, offset_high: 0 }
    }

    fn new(handler: unsafe extern "C" fn(), dpl: u8) -> Self {
        let addr = handler as usize as u32;
        Self {
            offset_low: (addr & 0xFFFF) as u16,
            selector: KERNEL_CODE_SEL,
            zero: 0,
            type_attr: PRESENT | (dpl << 5) | GATE_32BIT_INTERRUPT,
            offset_high: ((addr >> 16) & 0xFFFF) as u16,
        }
    }
}

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

static mut IDT: [IdtEntry; 256] = [IdtEntry::missing(); 256];
static IDT_READY: Once<()> = Once::new();

macro_rules! set_gate {
    ($idx:expr, $handler:expr, $dpl:expr) => {
        IDT[$idx] = IdtEntry::new($handler, $dpl)
    };
}

/// Builds and loads the IDT.
///
/// # Safety
/// Writes the `IDT` static and executes `lidt`; must run after
/// [`super::gdt::init`] and exactly once.
pub unsafe fn init() {
    IDT_READY.call_once(|| {
        set_gate!(0, trap::isr0, 0);
        set_gate!(1, trap::isr1, 0);
        set_gate!(2, trap::isr2, 0);
        set_gate!(3, trap::isr3, 0);
        set_gate!(4, trap::isr4, 0);
        set_gate!(5, trap::isr5, 0);
        set_gate!(6, trap::isr6, 0);
        set_gate!(7, trap::isr7, 0);
        set_gate!(8, trap::isr8, 0);
        set_gate!(9, trap::isr9, 0);
        set_gate!(10, trap::isr10, 0);
        set_gate!(11, trap::isr11, 0);
        set_gate!(12, trap::isr12, 0);
        set_gate!(13, trap::isr13, 0);
        set_gate!(14, trap::isr14, 0);
        set_gate!(15, trap::isr15, 0);
        set_gate!(16, trap::isr16, 0);
        set_gate!(17, trap::isr17, 0);
        set_gate!(18, trap::isr18, 0);
        set_gate!(19, trap::isr19, 0);
        set_gate!(20, trap::isr20, 0);
        set_gate!(21, trap::isr21, 0);
        set_gate!(22, trap::isr22, 0);
        set_gate!(23, trap::isr23, 0);
        set_gate!(24, trap::isr24, 0);
        set_gate!(25, trap::isr25, 0);
        set_gate!(26, trap::isr26, 0);
        set_gate!(27, trap::isr27, 0);
        set_gate!(28, trap::isr28, 0);
        set_gate!(29, trap::isr29, 0);
        set_gate!(30, trap::isr30, 0);
        set_gate!(31, trap::isr31, 0);

        set_gate!(32, trap::isr32, 0);
        set_gate!(33, trap::isr33, 0);
        set_gate!(34, trap::isr34, 0);
        set_gate!(35, trap::isr35, 0);
        set_gate!(36, trap::isr36, 0);
        set_gate!(37, trap::isr37, 0);
        set_gate!(38, trap::isr38, 0);
        set_gate!(39, trap::isr39, 0);
        set_gate!(40, trap::isr40, 0);
        set_gate!(41, trap::isr41, 0);
        set_gate!(42, trap::isr42, 0);
        set_gate!(43, trap::isr43, 0);
        set_gate!(44, trap::isr44, 0);
        set_gate!(45, trap::isr45, 0);
        set_gate!(46, trap::isr46, 0);
        set_gate!(47, trap::isr47, 0);

        // The only gate a ring-3 task may trigger directly.
        set_gate!(0x80, trap::isr128, 3);

        let pointer = DtPointer {
            limit: (size_of::<[IdtEntry; 256]>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        core::arch::asm!("lidt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
    });
}
