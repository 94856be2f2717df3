#![no_std]
#![no_main]

extern crate alloc;

use core::arch::asm;
use core::panic::PanicInfo;

use badgeload::{LoaderConfig, RegionManager, Runtime, RuntimeConfig};

// Module declarations
pub mod abi;
pub mod commands;
pub mod console;
pub mod memory;
pub mod pmp;
pub mod scheduler;
pub mod trap;
pub mod uart;

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    console_println!("[x]  KERNEL PANIC: {}", info.message());

    if let Some(location) = info.location() {
        console_println!("[i] Location: {}:{}:{}", location.file(), location.line(), location.column());
    }

    loop {
        unsafe {
            asm!("wfi");
        }
    }
}

#[link_section = ".text.boot"]
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        ".option push",
        ".option norelax",
        "la gp, __global_pointer$",
        ".option pop",
        "la sp, _stack_top",
        // Clear .bss
        "la t0, _bss_start",
        "la t1, _bss_end",
        "1:",
        "bgeu t0, t1, 2f",
        "sw zero, 0(t0)",
        "addi t0, t0, 4",
        "j 1b",
        "2:",
        "j {main}",
        main = sym main,
    );
}

extern "C" fn main() -> ! {
    console_println!();
    console_println!("badgeload kernel starting...");

    if let Err(e) = console::init_logging() {
        console_println!("[!] Logging unavailable: {}", e);
    }

    let heap = memory::init_heap();
    console_println!("[o] Heap ready ({} KiB)", heap / 1024);

    match trap::init() {
        Ok(stub) => console_println!("[o] Trap stub installed at 0x{:x}", stub),
        Err(e) => panic!("Failed to install trap handler: {}", e),
    }

    let mut pmp = RegionManager::new(pmp::CsrPmp, RuntimeConfig::PMP_ENTRIES.min(pmp::PMP_ENTRIES));
    console_println!("[o] PMP ready ({} entries, granularity {})", pmp.entries(), pmp.granularity());

    // Images and mappings start and end on the PMP granularity
    let granularity = pmp.granularity();
    let mut loader = LoaderConfig::host();
    loader.segment_align = loader.segment_align.max(granularity);
    let config = RuntimeConfig { pmp_entries: pmp.entries(), ..RuntimeConfig::default() }.with_granularity(granularity);

    let mut runtime: commands::KernelRuntime = Runtime::new(loader, config);
    match abi::register_exports(&mut runtime) {
        Ok(count) => console_println!("[o] {} ABI functions exported", count),
        Err(e) => panic!("Failed to export ABI: {}", e),
    }

    commands::run_embedded(&mut runtime, &mut pmp);

    let (used, free) = memory::heap_stats();
    console_println!("[i] Heap: {} bytes used, {} bytes free", used, free);
    console_println!("[i] Nothing left to run");
    loop {
        unsafe {
            asm!("wfi");
        }
    }
}
