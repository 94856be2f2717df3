//! Process runtime
//!
//! A [`Runtime`] owns the exported ABI table and every process created from
//! it. Each process has its own [`Linkage`], its own [`AbiContext`] for
//! stacks, heap and call thunks, and a [`Context`] the trap stub switches
//! through.

pub mod abi;
pub mod context;
pub mod heap;
pub mod services;
pub mod trap;

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::config::{LoaderConfig, RuntimeConfig};
use crate::elf::SegmentAllocator;
use crate::linkage::{Linkage, LinkageError};
use crate::memory::{AbiContext, AllocationError, RangeAllocator};
use crate::mpu::{PmpBackend, Region, RegionError, RegionManager};
use crate::symbols::SymbolMap;

pub use abi::{AbiFn, AbiTable};
pub use context::{Context, ContextState, Pid, Registers};
pub use heap::UserHeap;
pub use trap::{dispatch, AbiInvoker, DirectInvoker, TrapCause, TrapFrame, TrapOutcome};

/// Stack pointer alignment required by the RISC-V calling convention
const STACK_ALIGN: usize = 16;

static CURRENT: AtomicPtr<Context> = AtomicPtr::new(null_mut());

/// Make `ctx` the process ABI services act on; null when none is running
pub fn set_current(ctx: *mut Context) {
    CURRENT.store(ctx, Ordering::Release);
}

pub fn current() -> *mut Context {
    CURRENT.load(Ordering::Acquire)
}

/// Creates the thread a program runs on
pub trait Scheduler {
    /// Start `entry(arg)` on a new thread; false if it could not be created
    fn create_thread(&mut self, entry: fn(usize), arg: usize) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    Linkage(LinkageError),
    Alloc(AllocationError),
    Region(RegionError),
    /// The program is not linked and prepared
    NotReady,
    UnknownProcess(Pid),
    SchedulerFailed,
    DuplicateAbi,
    /// The ABI table cannot change while processes point at it
    AbiFrozen,
    OutOfPids,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RuntimeError::Linkage(e) => write!(f, "{}", e),
            RuntimeError::Alloc(e) => write!(f, "{}", e),
            RuntimeError::Region(e) => write!(f, "{}", e),
            RuntimeError::NotReady => write!(f, "Program is not ready to run"),
            RuntimeError::UnknownProcess(pid) => write!(f, "No process with pid {}", pid),
            RuntimeError::SchedulerFailed => write!(f, "Scheduler could not create a thread"),
            RuntimeError::DuplicateAbi => write!(f, "ABI function already registered"),
            RuntimeError::AbiFrozen => write!(f, "ABI table is in use by a process"),
            RuntimeError::OutOfPids => write!(f, "No process id available"),
        }
    }
}

impl From<LinkageError> for RuntimeError {
    fn from(e: LinkageError) -> Self {
        RuntimeError::Linkage(e)
    }
}

impl From<AllocationError> for RuntimeError {
    fn from(e: AllocationError) -> Self {
        RuntimeError::Alloc(e)
    }
}

impl From<RegionError> for RuntimeError {
    fn from(e: RegionError) -> Self {
        RuntimeError::Region(e)
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Everything one program owns
pub struct Process<A: SegmentAllocator, R: RangeAllocator> {
    pid: Pid,
    linkage: Linkage<A>,
    space: AbiContext<R>,
    context: Box<Context>,
    thunks: usize,
    stack: Option<usize>,
    heap: Option<Box<UserHeap>>,
}

impl<A: SegmentAllocator, R: RangeAllocator> Process<A, R> {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn linkage(&self) -> &Linkage<A> {
        &self.linkage
    }

    pub fn linkage_mut(&mut self) -> &mut Linkage<A> {
        &mut self.linkage
    }

    pub fn space(&self) -> &AbiContext<R> {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AbiContext<R> {
        &mut self.space
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    /// Base of the ABI thunk mapping
    pub fn thunks(&self) -> usize {
        self.thunks
    }

    pub fn heap(&self) -> Option<&UserHeap> {
        self.heap.as_deref()
    }

    pub fn exit_code(&self) -> Option<i32> {
        (self.context.state() == ContextState::Exited).then(|| self.context.exit_code())
    }
}

pub struct Runtime<A: SegmentAllocator, R: RangeAllocator> {
    loader: LoaderConfig,
    config: RuntimeConfig,
    abi: AbiTable,
    processes: BTreeMap<Pid, Process<A, R>>,
    next_pid: Pid,
}

impl<A: SegmentAllocator, R: RangeAllocator> Runtime<A, R> {
    pub fn new(loader: LoaderConfig, config: RuntimeConfig) -> Self {
        Self {
            loader,
            config,
            abi: AbiTable::new(),
            processes: BTreeMap::new(),
            next_pid: 1,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn abi(&self) -> &AbiTable {
        &self.abi
    }

    /// Export `function` to programs under `name`
    pub fn register_abi(&mut self, name: &str, function: AbiFn) -> RuntimeResult<usize> {
        if !self.processes.is_empty() {
            return Err(RuntimeError::AbiFrozen);
        }
        self.abi.register(name, function as usize)
    }

    /// Export every `(name, function)` pair; returns how many were added
    pub fn register_all(&mut self, functions: &[(&str, AbiFn)]) -> RuntimeResult<usize> {
        for &(name, function) in functions {
            self.register_abi(name, function)?;
        }
        Ok(functions.len())
    }

    /// Next free pid; pids are positive and never shared by live processes
    fn alloc_pid(&mut self) -> RuntimeResult<Pid> {
        for _ in 0..=self.processes.len() {
            let pid = self.next_pid;
            self.next_pid = if pid == Pid::MAX { 1 } else { pid + 1 };
            if !self.processes.contains_key(&pid) {
                return Ok(pid);
            }
        }
        Err(RuntimeError::OutOfPids)
    }

    /// Create an empty process
    ///
    /// The ABI thunks are mapped into the process and exported as symbols,
    /// so modules loaded into its linkage call the runtime through the
    /// ABI-call ecall.
    pub fn new_process(&mut self, segments: A, ranges: R) -> RuntimeResult<Pid> {
        let pid = self.alloc_pid()?;
        let mut space = AbiContext::new(ranges, self.config.backing_granule);

        let image = self.abi.thunk_image();
        let thunks = space.map(image.len(), false, true, self.config.map_align)?;
        space.write_bytes(thunks, &image)?;

        let mut symbols = SymbolMap::new();
        self.abi.export_thunks(&mut symbols, thunks);

        let mut context = Box::new(Context::new(pid));
        context.set_abi_table(self.abi.as_ptr(), self.abi.len());

        let linkage = Linkage::with_symbols(self.loader, segments, symbols);
        self.processes.insert(
            pid,
            Process { pid, linkage, space, context, thunks, stack: None, heap: None },
        );
        log::info!("Created process {} (thunks at 0x{:x})", pid, thunks);
        Ok(pid)
    }

    pub fn process(&self, pid: Pid) -> Option<&Process<A, R>> {
        self.processes.get(&pid)
    }

    pub fn process_mut(&mut self, pid: Pid) -> RuntimeResult<&mut Process<A, R>> {
        self.processes.get_mut(&pid).ok_or(RuntimeError::UnknownProcess(pid))
    }

    pub fn linkage_mut(&mut self, pid: Pid) -> RuntimeResult<&mut Linkage<A>> {
        Ok(self.process_mut(pid)?.linkage_mut())
    }

    /// Link the process and set up its user context
    ///
    /// Maps a user stack and the malloc heap, and points the user bank at
    /// the program entry. `gp` and `tp` are shared with the privileged side.
    pub fn prepare(&mut self, pid: Pid, gp: usize, tp: usize) -> RuntimeResult<()> {
        let stack_size = self.config.user_stack_size;
        let heap_size = self.config.user_heap_size;
        let align = self.config.map_align.max(STACK_ALIGN);
        let process = self.process_mut(pid)?;

        process.linkage.link()?;
        let entry = process.linkage.entry()?;

        let lo = match process.stack {
            Some(lo) => lo,
            None => {
                let lo = process.space.map(stack_size, true, false, align)?;
                process.stack = Some(lo);
                lo
            }
        };
        let hi = lo + stack_size;

        if process.heap.is_none() && heap_size > 0 {
            let base = process.space.map(heap_size, true, false, align)?;
            let mut heap = Box::new(unsafe { UserHeap::new(base, heap_size) });
            process.context.set_user_heap(heap.as_mut() as *mut UserHeap);
            process.heap = Some(heap);
        }

        let context = &mut process.context;
        context.set_user_stack(lo, hi);
        context.prepare_user(entry, hi, gp, tp);
        log::debug!("Process {} entry 0x{:x}, stack 0x{:x}..0x{:x}", pid, entry, lo, hi);
        Ok(())
    }

    /// Program the protection regions a process needs
    ///
    /// Covers every loaded module and every backing of the process address
    /// space. Failures are returned only when protection is required;
    /// otherwise they are logged and the table is replaced by a single entry
    /// granting user mode the whole address space.
    pub fn apply_protection<B: PmpBackend>(&mut self, pid: Pid, manager: &mut RegionManager<B>) -> RuntimeResult<usize> {
        let required = self.config.protection_required;
        let process = self.process_mut(pid)?;

        let result = process.linkage.apply_protection(manager).map_err(RuntimeError::from).and_then(|count| {
            let backings: Vec<Region> = process
                .space
                .backings()
                .map(|b| Region::user(b.base, b.len, b.writable, b.executable))
                .collect();
            Ok(count + manager.apply_regions(&backings)?)
        });

        match result {
            Err(e) if !required => {
                log::warn!("Process {} runs without protection: {}", pid, e);
                manager.clear();
                manager.allow_all()?;
                Ok(1)
            }
            result => result,
        }
    }

    /// Hand a prepared process to the scheduler
    ///
    /// `entry` receives the address of the process [`Context`].
    pub fn start_preloaded<S: Scheduler + ?Sized>(&mut self, pid: Pid, scheduler: &mut S, entry: fn(usize)) -> RuntimeResult<()> {
        let process = self.process_mut(pid)?;
        if !process.linkage.is_prog_ready() || process.stack.is_none() {
            return Err(RuntimeError::NotReady);
        }
        let context = process.context.as_mut() as *mut Context as usize;
        if !scheduler.create_thread(entry, context) {
            return Err(RuntimeError::SchedulerFailed);
        }
        log::info!("Started process {}", pid);
        Ok(())
    }

    /// Address of the process context, for installing it as current
    pub fn context_ptr(&mut self, pid: Pid) -> RuntimeResult<*mut Context> {
        Ok(self.process_mut(pid)?.context.as_mut() as *mut Context)
    }

    /// Tear down a process, releasing its modules and mappings
    ///
    /// Returns the exit code if the process had exited.
    pub fn remove_process(&mut self, pid: Pid) -> Option<Option<i32>> {
        let process = self.processes.remove(&pid)?;
        let code = process.exit_code();
        log::info!("Removed process {}", pid);
        Some(code)
    }

    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.processes.keys().copied()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::constants::*;
    use crate::elf::SliceStream;
    use crate::reloc::riscv::*;
    use crate::runtime::abi::THUNK_SIZE;
    use crate::runtime::context::reg;
    use crate::testutil::{ElfBuilder, FixedBaseAllocator, HostRangeAllocator, MockPmp};

    unsafe extern "C" fn add(a: usize, b: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
        a + b
    }

    unsafe extern "C" fn puts(_: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize, _: usize) -> usize {
        0
    }

    type TestRuntime = Runtime<FixedBaseAllocator, HostRangeAllocator>;

    fn runtime() -> TestRuntime {
        let mut runtime = Runtime::new(LoaderConfig::riscv64(), RuntimeConfig::default());
        runtime.register_abi("add", add).unwrap();
        runtime.register_abi("puts", puts).unwrap();
        runtime
    }

    fn program() -> Vec<u8> {
        let mut builder = ElfBuilder::executable(0x10);
        builder.segment(0x0, &[0x13; 0x40], 0x40, PF_R | PF_X);
        let puts = builder.import("puts");
        builder.rela(0x20, puts, R_RISCV_JUMP_SLOT, 0);
        builder.build()
    }

    #[derive(Default)]
    struct RecordingScheduler {
        threads: Vec<usize>,
        refuse: bool,
    }

    impl Scheduler for RecordingScheduler {
        fn create_thread(&mut self, _entry: fn(usize), arg: usize) -> bool {
            if self.refuse {
                return false;
            }
            self.threads.push(arg);
            true
        }
    }

    fn noop(_: usize) {}

    #[test]
    fn test_pids_are_unique() {
        let mut runtime = runtime();
        let a = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        let b = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(runtime.remove_process(a), Some(None));
        assert_eq!(runtime.remove_process(a), None);
        let c = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        assert_ne!(c, b);
        assert_eq!(runtime.process_count(), 2);
    }

    #[test]
    fn test_thunks_are_mapped_and_exported() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        let process = runtime.process(pid).unwrap();
        let base = process.thunks();

        let symbols = process.linkage().symbols();
        assert_eq!(symbols.get("add"), Some(base));
        assert_eq!(symbols.get("puts"), Some(base + THUNK_SIZE));
        assert_eq!(symbols.get("exit"), Some(base + 2 * THUNK_SIZE));
        assert!(symbols.contains("abort"));

        let mapping = process.space().mapping(base).unwrap();
        assert!(mapping.executable && !mapping.writable);
        let image = runtime.abi().thunk_image();
        assert_eq!(process.space().read_bytes(base, image.len()), Ok(&image[..]));

        let (table, len) = process.context().abi_table();
        assert_eq!((table, len), (runtime.abi().as_ptr(), 2));
    }

    #[test]
    fn test_abi_table_frozen_with_processes() {
        let mut runtime = runtime();
        runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        assert_eq!(runtime.register_abi("late", add), Err(RuntimeError::AbiFrozen));
    }

    #[test]
    fn test_prepare_links_and_sets_up_user_bank() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();
        runtime.prepare(pid, 0x800, 0x900).unwrap();

        let process = runtime.process(pid).unwrap();
        let slot = process.linkage().modules()[0].region().slice(0x6020, 8).unwrap();
        assert_eq!(u64::from_le_bytes(slot.try_into().unwrap()) as usize, process.thunks() + THUNK_SIZE);

        let context = process.context();
        let (lo, hi) = context.user_stack();
        assert_eq!(hi - lo, runtime.config().user_stack_size);
        assert_eq!(hi % STACK_ALIGN, 0);
        assert_eq!(context.user_pc(), 0x6010);
        let user = context.user_regs();
        assert_eq!((user.get(reg::SP), user.get(reg::GP), user.get(reg::TP)), (hi, 0x800, 0x900));
        assert!(context.is_super());
    }

    #[test]
    fn test_prepare_without_executable_fails() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        assert_eq!(
            runtime.prepare(pid, 0, 0),
            Err(RuntimeError::Linkage(LinkageError::NoExecutable))
        );
        assert_eq!(runtime.prepare(99, 0, 0), Err(RuntimeError::UnknownProcess(99)));
    }

    #[test]
    fn test_start_requires_prepare() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();

        let mut scheduler = RecordingScheduler::default();
        assert_eq!(runtime.start_preloaded(pid, &mut scheduler, noop), Err(RuntimeError::NotReady));

        runtime.prepare(pid, 0, 0).unwrap();
        scheduler.refuse = true;
        assert_eq!(runtime.start_preloaded(pid, &mut scheduler, noop), Err(RuntimeError::SchedulerFailed));
        scheduler.refuse = false;
        runtime.start_preloaded(pid, &mut scheduler, noop).unwrap();
        assert_eq!(scheduler.threads, [runtime.context_ptr(pid).unwrap() as usize]);
    }

    #[test]
    fn test_exit_code_after_termination() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        runtime.process_mut(pid).unwrap().context_mut().terminate(7);
        assert_eq!(runtime.remove_process(pid), Some(Some(7)));
    }

    #[test]
    fn test_protection_is_optional_by_default() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();
        runtime.prepare(pid, 0, 0).unwrap();

        // Two entries cannot hold the program, thunks, stack and heap
        let mut small = RegionManager::new(MockPmp::new(2, 1), 2);
        assert_eq!(runtime.apply_protection(pid, &mut small), Ok(1));
        assert_eq!(small.read_regions().as_slice(), &[Region::user(0, usize::MAX, true, true)]);

        let mut roomy = RegionManager::new(MockPmp::new(16, 1), 16);
        let count = runtime.apply_protection(pid, &mut roomy).unwrap();
        assert!(count >= 3);
        assert!(roomy.read_regions().iter().any(|r| r.base == 0x6000 && r.execute));
    }

    #[test]
    fn test_malloc_lands_in_protected_memory() {
        let mut runtime = runtime();
        runtime.register_all(services::EXPORTS).unwrap();
        let malloc = runtime.abi().index_of("malloc").unwrap();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();
        runtime.prepare(pid, 0, 0).unwrap();

        // ABI call from user mode, as the malloc thunk issues it
        let context = runtime.context_ptr(pid).unwrap();
        set_current(context);
        let ptr = {
            let context = runtime.process_mut(pid).unwrap().context_mut();
            context.enter_user();
            let user = context.user_regs_mut();
            user.set(reg::T6, trap::SYS_ABI_CALL);
            user.set(reg::T5, malloc);
            user.set(reg::A0, 64);
            let frame = TrapFrame { mcause: 8, mepc: 0x6010, mtval: 0 };
            assert_eq!(dispatch(context, &frame, &mut DirectInvoker), TrapOutcome::Resume);
            context.user_regs().get(reg::A0)
        };
        set_current(null_mut());
        assert_ne!(ptr, 0);
        assert!(runtime.process(pid).unwrap().heap().unwrap().contains(ptr));

        let mut pmp = RegionManager::new(MockPmp::new(16, 1), 16);
        runtime.apply_protection(pid, &mut pmp).unwrap();
        let regions = pmp.read_regions();
        assert!(regions.iter().any(|r| r.write && !r.execute && r.base <= ptr && ptr + 64 <= r.end()));
    }

    #[test]
    fn test_program_links_against_services() {
        let mut runtime: TestRuntime = Runtime::new(LoaderConfig::riscv64(), RuntimeConfig::default());
        assert_eq!(runtime.register_all(services::EXPORTS), Ok(services::EXPORTS.len()));

        let names = ["memcpy", "strlen", "strtol", "malloc"];
        let mut builder = ElfBuilder::executable(0x10);
        builder.segment(0x0, &[0x13; 0x40], 0x40, PF_R | PF_X);
        for (i, name) in names.iter().enumerate() {
            let symbol = builder.import(name);
            builder.rela(0x20 + 8 * i as u64, symbol, R_RISCV_JUMP_SLOT, 0);
        }

        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&builder.build())).unwrap();
        runtime.prepare(pid, 0, 0).unwrap();

        let process = runtime.process(pid).unwrap();
        let region = process.linkage().modules()[0].region();
        for (i, name) in names.iter().enumerate() {
            let slot = region.slice(0x6020 + 8 * i, 8).unwrap();
            let index = runtime.abi().index_of(name).unwrap();
            assert_eq!(
                u64::from_le_bytes(slot.try_into().unwrap()) as usize,
                process.thunks() + index * THUNK_SIZE,
                "{} slot",
                name
            );
        }
    }

    #[test]
    fn test_backings_follow_protection_granularity() {
        let config = RuntimeConfig::default().with_granularity(64);
        let mut runtime: TestRuntime = Runtime::new(LoaderConfig::riscv64(), config);
        runtime.register_abi("puts", puts).unwrap();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();
        runtime.prepare(pid, 0, 0).unwrap();

        let process = runtime.process(pid).unwrap();
        assert!(process.space().backings().count() >= 3);
        assert!(process.space().backings().all(|b| b.base % 64 == 0 && b.len % 64 == 0));
    }

    #[test]
    fn test_required_protection_reports_failure() {
        let config = RuntimeConfig { protection_required: true, ..RuntimeConfig::default() };
        let mut runtime: TestRuntime = Runtime::new(LoaderConfig::riscv64(), config);
        let pid = runtime.new_process(FixedBaseAllocator::new(&[0x6000]), HostRangeAllocator::new()).unwrap();
        runtime.linkage_mut(pid).unwrap().load_executable(&mut SliceStream::new(&program())).unwrap();
        runtime.prepare(pid, 0, 0).unwrap();

        let mut tiny = RegionManager::new(MockPmp::new(1, 1), 1);
        assert!(matches!(
            runtime.apply_protection(pid, &mut tiny),
            Err(RuntimeError::Linkage(LinkageError::Region(_)) | RuntimeError::Region(_))
        ));
    }

    #[test]
    fn test_dispatch_through_direct_invoker() {
        let mut runtime = runtime();
        let pid = runtime.new_process(FixedBaseAllocator::new(&[]), HostRangeAllocator::new()).unwrap();
        let context = runtime.process_mut(pid).unwrap().context_mut();
        context.prepare_user(0x4000, 0x9000, 0, 0);
        context.enter_user();
        let user = context.user_regs_mut();
        user.set(reg::T6, trap::SYS_ABI_CALL);
        user.set(reg::T5, 0);
        user.set(reg::A0, 40);
        user.set(reg::A1, 2);

        let frame = TrapFrame { mcause: 8, mepc: 0x4000, mtval: 0 };
        assert_eq!(dispatch(context, &frame, &mut DirectInvoker), TrapOutcome::Resume);
        assert_eq!(context.user_regs().get(reg::A0), 42);
    }
}
