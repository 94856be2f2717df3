// Loading and running the programs linked into the kernel image
//
// The linker script collects an executable into .badgeload_app and any
// shared libraries it needs into .badgeload_libs (one after another, each
// padded to 8 bytes and preceded by its length as a 32-bit word).

use core::ptr::{addr_of, null_mut};
use core::slice;

use badgeload::elf::HeapSegmentAllocator;
use badgeload::mpu::RegionManager;
use badgeload::{Context, Pid, Runtime, RuntimeResult, SliceStream};

use crate::console_println;
use crate::memory::HeapRangeAllocator;
use crate::pmp::CsrPmp;
use crate::scheduler::BootScheduler;
use crate::trap;

pub type KernelRuntime = Runtime<HeapSegmentAllocator, HeapRangeAllocator>;

extern "C" {
    static __app_start: u8;
    static __app_end: u8;
    static __libs_start: u8;
    static __libs_end: u8;
}

fn section(start: *const u8, end: *const u8) -> &'static [u8] {
    let len = (end as usize).saturating_sub(start as usize);
    unsafe { slice::from_raw_parts(start, len) }
}

pub fn embedded_app() -> &'static [u8] {
    unsafe { section(addr_of!(__app_start), addr_of!(__app_end)) }
}

/// Length-prefixed library images
pub struct EmbeddedLibs {
    rest: &'static [u8],
}

impl Iterator for EmbeddedLibs {
    type Item = &'static [u8];

    fn next(&mut self) -> Option<&'static [u8]> {
        let (len, rest) = self.rest.split_first_chunk::<4>()?;
        let len = u32::from_le_bytes(*len) as usize;
        if len == 0 || len > rest.len() {
            return None;
        }
        let padded = (len + 7) & !7;
        let image = &rest[..len];
        self.rest = rest.get(padded..).unwrap_or(&[]);
        Some(image)
    }
}

pub fn embedded_libs() -> EmbeddedLibs {
    EmbeddedLibs { rest: unsafe { section(addr_of!(__libs_start), addr_of!(__libs_end)) } }
}

fn read_gp_tp() -> (usize, usize) {
    let (gp, tp): (usize, usize);
    unsafe {
        core::arch::asm!("mv {}, gp", "mv {}, tp", out(reg) gp, out(reg) tp);
    }
    (gp, tp)
}

// Thread body: run the process whose context lives at `ctx`
fn run_process(ctx: usize) {
    let pid = unsafe { (*(ctx as *const Context)).pid() };
    trap::set_ctx(ctx as *mut Context);
    let code = trap::jump_user();
    trap::set_ctx(null_mut());
    console_println!("[i] Process {} exited with code {}", pid, code);
}

/// Load, link and queue one program with its libraries
pub fn launch(
    runtime: &mut KernelRuntime,
    scheduler: &mut BootScheduler,
    pmp: &mut RegionManager<CsrPmp>,
    libs: impl Iterator<Item = &'static [u8]>,
    app: &[u8],
) -> RuntimeResult<Pid> {
    let pid = runtime.new_process(HeapSegmentAllocator::new(), HeapRangeAllocator::new())?;
    let result = setup(runtime, scheduler, pmp, pid, libs, app);
    if let Err(e) = result {
        console_println!("[x] Process {} failed to start: {}", pid, e);
        pmp.clear();
        runtime.remove_process(pid);
        return Err(e);
    }
    Ok(pid)
}

fn setup(
    runtime: &mut KernelRuntime,
    scheduler: &mut BootScheduler,
    pmp: &mut RegionManager<CsrPmp>,
    pid: Pid,
    libs: impl Iterator<Item = &'static [u8]>,
    app: &[u8],
) -> RuntimeResult<()> {
    let linkage = runtime.linkage_mut(pid)?;
    for lib in libs {
        linkage.load_library(&mut SliceStream::new(lib))?;
    }
    linkage.load_executable(&mut SliceStream::new(app))?;

    let (gp, tp) = read_gp_tp();
    runtime.prepare(pid, gp, tp)?;
    let regions = runtime.apply_protection(pid, pmp)?;
    console_println!("[o] Process {} ready ({} protection regions)", pid, regions);
    runtime.start_preloaded(pid, scheduler, run_process)
}

/// Run the embedded program, if there is one
pub fn run_embedded(runtime: &mut KernelRuntime, pmp: &mut RegionManager<CsrPmp>) {
    let app = embedded_app();
    if app.is_empty() {
        console_println!("[!] No program linked into this image");
        return;
    }

    let mut scheduler = BootScheduler::new();
    let Ok(pid) = launch(runtime, &mut scheduler, pmp, embedded_libs(), app) else {
        return;
    };
    scheduler.run();

    pmp.clear();
    if let Some(Some(code)) = runtime.remove_process(pid) {
        console_println!("[i] Process {} finished, exit code {}", pid, code);
    }
}
