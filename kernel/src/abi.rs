// Services exported to loaded programs
// The C library functions come from badgeload::runtime::services; the ones
// here need the console or the timer. Every entry has the uniform
// eight-argument ABI signature; unused arguments are ignored

use badgeload::elf::SegmentAllocator;
use badgeload::runtime::services;
use badgeload::runtime::AbiFn;
use badgeload::{RangeAllocator, Runtime, RuntimeResult};

use crate::console;

// QEMU virt timebase
const TIMEBASE_HZ: u64 = 10_000_000;

#[cfg(target_arch = "riscv32")]
fn ticks() -> u64 {
    riscv::register::time::read64()
}

#[cfg(not(target_arch = "riscv32"))]
fn ticks() -> u64 {
    0
}

fn busy_wait_us(us: u64) {
    let start = ticks();
    let wait = us.saturating_mul(TIMEBASE_HZ / 1_000_000);
    while ticks().wrapping_sub(start) < wait {
        core::hint::spin_loop();
    }
}

unsafe extern "C" fn putchar(ch: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    console::putchar(ch as u8);
    ch & 0xff
}

unsafe extern "C" fn puts(s: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    if s == 0 {
        return usize::MAX;
    }
    let mut ptr = s as *const u8;
    while *ptr != 0 {
        console::putchar(*ptr);
        ptr = ptr.add(1);
    }
    console::putchar(b'\n');
    0
}

// Single program per hart: nothing to yield to
unsafe extern "C" fn yield_now(_: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    0
}

unsafe extern "C" fn delay_us(us: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    busy_wait_us(us as u64);
    0
}

unsafe extern "C" fn delay_ms(ms: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
    busy_wait_us((ms as u64).saturating_mul(1000));
    0
}

const EXPORTS: &[(&str, AbiFn)] = &[
    ("putchar", putchar),
    ("puts", puts),
    ("yield", yield_now),
    ("sched_yield", yield_now),
    ("delay_us", delay_us),
    ("usleep", delay_us),
    ("delay_ms", delay_ms),
];

pub fn register_exports<A: SegmentAllocator, R: RangeAllocator>(runtime: &mut Runtime<A, R>) -> RuntimeResult<usize> {
    Ok(runtime.register_all(services::EXPORTS)? + runtime.register_all(EXPORTS)?)
}
