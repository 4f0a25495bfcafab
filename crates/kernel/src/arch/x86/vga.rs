//! VGA text-mode console at physical/linear 0xB8000.
//!
//! This is the kernel's sole TTY; once paging is enabled the kernel half
//! identity-maps this address, so the write path is unchanged before and
//! after `page_enable()`.

use spin::Mutex;

const VGA_BUFFER: *mut u16 = 0xB8000 as *mut u16;
const WIDTH: usize = 80;
const HEIGHT: usize = 25;
const DEFAULT_ATTR: u8 = 0x07; // light gray on black

struct Console {
    col: usize,
    row: usize,
}

impl Console {
    const fn new() -> Self {
        Self { col: 0, row: 0 }
    }

    fn put_byte(&mut self, byte: u8, attr: u8) {
        match byte {
            b'\n' => self.newline(),
            b'\r' => self.col = 0,
            byte => {
                if self.col >= WIDTH {
                    self.newline();
                }
                let cell = (attr as u16) << 8 | byte as u16;
                let offset = self.row * WIDTH + self.col;
                unsafe { core::ptr::write_volatile(VGA_BUFFER.add(offset), cell) };
                self.col += 1;
            }
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < HEIGHT {
            self.row += 1;
        } else {
            self.scroll();
        }
    }

    fn scroll(&mut self) {
        for row in 1..HEIGHT {
            for col in 0..WIDTH {
                let cell = unsafe { core::ptr::read_volatile(VGA_BUFFER.add(row * WIDTH + col)) };
                unsafe { core::ptr::write_volatile(VGA_BUFFER.add((row - 1) * WIDTH + col), cell) };
            }
        }
        let blank = (DEFAULT_ATTR as u16) << 8 | b' ' as u16;
        for col in 0..WIDTH {
            unsafe { core::ptr::write_volatile(VGA_BUFFER.add((HEIGHT - 1) * WIDTH + col), blank) };
        }
    }
}

static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

pub fn write_str(s: &str) {
    write_str_attr(s, DEFAULT_ATTR);
}

pub fn write_str_attr(s: &str, attr: u8) {
    let mut console = CONSOLE.lock();
    for byte in s.bytes() {
        console.put_byte(byte, attr);
    }
}

pub fn clear() {
    let blank = (DEFAULT_ATTR as u16) << 8 | b' ' as u16;
    for i in 0..(WIDTH * HEIGHT) {
        unsafe { core::ptr::write_volatile(VGA_BUFFER.add(i), blank) };
    }
    let mut console = CONSOLE.lock();
    console.col = 0;
    console.row = 0;
}
