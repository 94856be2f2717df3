// PMP register access for RV32
// pmpcfg0..3 pack four entries each; pmpaddr0..15 hold one address each

use core::arch::asm;

use badgeload::PmpBackend;

pub const PMP_ENTRIES: usize = 16;

macro_rules! csr_read {
    ($index:expr, $name:literal, $($i:literal),*) => {
        match $index {
            $($i => {
                let value: usize;
                unsafe { asm!(concat!("csrr {}, ", $name, $i), out(reg) value) };
                value
            })*
            _ => 0,
        }
    };
}

macro_rules! csr_write {
    ($index:expr, $value:expr, $name:literal, $($i:literal),*) => {
        match $index {
            $($i => unsafe { asm!(concat!("csrw ", $name, $i, ", {}"), in(reg) $value) },)*
            _ => {}
        }
    };
}

fn read_pmpcfg(index: usize) -> usize {
    csr_read!(index, "pmpcfg", 0, 1, 2, 3)
}

fn write_pmpcfg(index: usize, value: usize) {
    csr_write!(index, value, "pmpcfg", 0, 1, 2, 3)
}

/// The hart's own PMP CSRs
pub struct CsrPmp;

impl PmpBackend for CsrPmp {
    fn entry_count(&self) -> usize {
        PMP_ENTRIES
    }

    fn read_cfg(&self, index: usize) -> u8 {
        (read_pmpcfg(index / 4) >> ((index % 4) * 8)) as u8
    }

    fn write_cfg(&mut self, index: usize, cfg: u8) {
        let shift = (index % 4) * 8;
        let word = read_pmpcfg(index / 4) & !(0xff << shift);
        write_pmpcfg(index / 4, word | ((cfg as usize) << shift));
    }

    fn read_addr(&self, index: usize) -> usize {
        csr_read!(index, "pmpaddr", 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15)
    }

    fn write_addr(&mut self, index: usize, value: usize) {
        csr_write!(index, value, "pmpaddr", 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15)
    }
}
