//! Global Descriptor Table and Task State Segment.
//!
//! Five flat segments (base 0, limit 4 GiB, 4-KiB granularity) plus one TSS,
//! matching the GDT layout every privilege transition in this kernel relies
//! on: index 1 kernel code, 2 kernel data, 3 user code, 4 user data, 5 TSS.
//! The `x86_64` crate's typed `GlobalDescriptorTable` only builds long-mode
//! descriptors, so this table is hand-packed to the 32-bit descriptor format.

use core::mem::size_of;
use spin::Once;

pub const KERNEL_CODE_SEL: u16 = 1 << 3;
pub const KERNEL_DATA_SEL: u16 = 2 << 3;
pub const USER_CODE_SEL: u16 = (3 << 3) | 3;
pub const USER_DATA_SEL: u16 = (4 << 3) | 3;
pub const TSS_SEL: u16 = 5 << 3;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_mid: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self { limit_low: 0, base_low: 0, base_mid: 0, access: 0, granularity: 0, base_high: 0 }
    }

    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        Self {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_mid: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (flags << 4),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }
}

// Access byte bits: present(1) | dpl(2) | s(1) | type(4)
const ACCESS_CODE_RING0: u8 = 0x9A; // present, ring0, code, exec/read
const ACCESS_DATA_RING0: u8 = 0x92; // present, ring0, data, rw
const ACCESS_CODE_RING3: u8 = 0xFA;
const ACCESS_DATA_RING3: u8 = 0xF2;
const ACCESS_TSS: u8 = 0x89; // present, ring0, 32-bit TSS (available)
const FLAGS_4K_32BIT: u8 = 0x0C; // granularity=4K, size=32-bit

/// Hardware TSS layout (32-bit). Only `ss0`/`esp0` (the ring-0 stack used on
/// every interrupt from ring 3) and the IO permission bitmap offset matter
/// here; the rest of the fields exist because the CPU reads the struct at
/// fixed offsets regardless of whether software uses them.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Tss {
    pub link: u16,
    _res0: u16,
    pub esp0: u32,
    pub ss0: u16,
    _res1: u16,
    pub esp1: u32,
    pub ss1: u16,
    _res2: u16,
    pub esp2: u32,
    pub ss2: u16,
    _res3: u16,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    _res4: u16,
    pub cs: u16,
    _res5: u16,
    pub ss: u16,
    _res6: u16,
    pub ds: u16,
    _res7: u16,
    pub fs: u16,
    _res8: u16,
    pub gs: u16,
    _res9: u16,
    pub ldt: u16,
    _res10: u16,
    pub trap: u16,
    pub iomap_base: u16,
}

impl Tss {
    const fn new() -> Self {
        // SAFETY-free zero-init: every field is a plain integer.
        unsafe { core::mem::zeroed() }
    }
}

#[repr(C, packed)]
struct DtPointer {
    limit: u16,
    base: u32,
}

static mut GDT: [GdtEntry; 6] = [GdtEntry::null(); 6];
static mut TSS: Tss = Tss::new();
static GDT_READY: Once<()> = Once::new();

/// Builds the GDT and TSS and loads them into the CPU. Must run once, before
/// any ring transition, with interrupts disabled.
///
/// # Safety
/// Writes `GDT`/`TSS` statics and executes `lgdt`/`ltr`; must be called
/// exactly once during early boot.
pub unsafe fn init() {
    GDT_READY.call_once(|| {
        let tss_base = core::ptr::addr_of!(TSS) as u32;
        let tss_limit = (size_of::<Tss>() - 1) as u32;

        GDT[0] = GdtEntry::null();
        GDT[1] = GdtEntry::new(0, 0xFFFFF, ACCESS_CODE_RING0, FLAGS_4K_32BIT);
        GDT[2] = GdtEntry::new(0, 0xFFFFF, ACCESS_DATA_RING0, FLAGS_4K_32BIT);
        GDT[3] = GdtEntry::new(0, 0xFFFFF, ACCESS_CODE_RING3, FLAGS_4K_32BIT);
        GDT[4] = GdtEntry::new(0, 0xFFFFF, ACCESS_DATA_RING3, FLAGS_4K_32BIT);
        GDT[5] = GdtEntry::new(tss_base, tss_limit, ACCESS_TSS, 0x00);

        TSS.ss0 = KERNEL_DATA_SEL;
        TSS.iomap_base = size_of::<Tss>() as u16; // no IO bitmap

        let pointer = DtPointer {
            limit: (size_of::<[GdtEntry; 6]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u32,
        };

        core::arch::asm!("lgdt [{0}]", in(reg) &pointer, options(readonly, nostack, preserves_flags));
        reload_segments();
        core::arch::asm!("ltr {0:x}", in(reg) TSS_SEL, options(nomem, nostack, preserves_flags));
    });
}

// Kernel is linked at a fixed, non-relocated address, so the return target
// can be an absolute `lea` rather than anything RIP-relative (there is no
// such thing in 32-bit protected mode).
unsafe fn reload_segments() {
    core::arch::asm!(
        "push {code_sel}",
        "lea {tmp}, [2f]",
        "push {tmp}",
        "retf",
        "2:",
        "mov ax, {data_sel:x}",
        "mov ds, ax",
        "mov es, ax",
        "mov fs, ax",
        "mov gs, ax",
        "mov ss, ax",
        code_sel = in(reg) KERNEL_CODE_SEL as u32,
        data_sel = in(reg) KERNEL_DATA_SEL,
        tmp = out(reg) _,
        out("ax") _,
        options(nostack),
    );
}

/// Overwrites `esp0` in the single hardware TSS so the next ring-3-to-0
/// transition lands on this task's kernel stack. Called on every context
/// switch; `ss0` never changes (always the flat kernel data segment).
pub fn set_kernel_stack(esp0: u32) {
    unsafe {
        TSS.esp0 = esp0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_carry_expected_rpl() {
        assert_eq!(KERNEL_CODE_SEL & 3, 0);
        assert_eq!(KERNEL_DATA_SEL & 3, 0);
        assert_eq!(USER_CODE_SEL & 3, 3);
        assert_eq!(USER_DATA_SEL & 3, 3);
    }

    #[test]
    fn gdt_entry_packs_flat_descriptor_correctly() {
        let e = GdtEntry::new(0, 0xFFFFF, ACCESS_CODE_RING0, FLAGS_4K_32BIT);
        assert_eq!({ e.limit_low }, 0xFFFF);
        assert_eq!({ e.base_low }, 0);
        assert_eq!({ e.granularity } & 0x0F, 0x0F);
        assert_eq!({ e.granularity } >> 4, FLAGS_4K_32BIT);
    }
}
