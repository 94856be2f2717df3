// Minimal NS16550 UART driver
// Polled output only; enough for the console and the log backend

use core::fmt::{self, Write};

// QEMU virt machine UART
pub const UART_BASE: usize = 0x1000_0000;

const LSR: usize = 5;
const LSR_THR_EMPTY: u8 = 0x20;

pub struct Uart {
    base_addr: usize,
}

impl Uart {
    pub const fn new() -> Self {
        Uart { base_addr: UART_BASE }
    }

    pub fn putchar(&self, ch: u8) {
        unsafe {
            let ptr = self.base_addr as *mut u8;
            while ptr.add(LSR).read_volatile() & LSR_THR_EMPTY == 0 {}
            ptr.write_volatile(ch);
        }
    }
}

impl Write for Uart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.putchar(b'\r');
            }
            self.putchar(byte);
        }
        Ok(())
    }
}
