//! Trap classification and syscall dispatch
//!
//! The trap stub saves the interrupted bank into the current [`Context`] and
//! calls [`dispatch`]. On return it restores the bank selected by the
//! context's privilege flag and resumes at that bank's program counter.

use super::context::{reg, Context, REG_NAMES};

pub const SYS_EXIT: usize = 512;
pub const SYS_ABI_CALL: usize = 513;
pub const SYS_JUMP_USER: usize = 514;
pub const SYS_ENTER_USER: usize = 515;

/// Exit code of a process killed by a fault
pub const FAULT_EXIT_CODE: i32 = -1;

const ENOSYS: isize = 38;
const EPERM: isize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    InstructionMisaligned,
    InstructionFault,
    IllegalInstruction,
    Breakpoint,
    LoadMisaligned,
    LoadFault,
    StoreMisaligned,
    StoreFault,
    EcallUser,
    EcallSupervisor,
    EcallMachine,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
    Interrupt(usize),
    Unknown(usize),
}

impl TrapCause {
    pub fn from_mcause(mcause: usize) -> Self {
        let interrupt = 1usize << (usize::BITS - 1);
        if mcause & interrupt != 0 {
            return TrapCause::Interrupt(mcause & !interrupt);
        }
        match mcause {
            0 => TrapCause::InstructionMisaligned,
            1 => TrapCause::InstructionFault,
            2 => TrapCause::IllegalInstruction,
            3 => TrapCause::Breakpoint,
            4 => TrapCause::LoadMisaligned,
            5 => TrapCause::LoadFault,
            6 => TrapCause::StoreMisaligned,
            7 => TrapCause::StoreFault,
            8 => TrapCause::EcallUser,
            9 => TrapCause::EcallSupervisor,
            11 => TrapCause::EcallMachine,
            12 => TrapCause::InstructionPageFault,
            13 => TrapCause::LoadPageFault,
            15 => TrapCause::StorePageFault,
            code => TrapCause::Unknown(code),
        }
    }

    pub fn is_ecall(&self) -> bool {
        matches!(self, TrapCause::EcallUser | TrapCause::EcallSupervisor | TrapCause::EcallMachine)
    }

    pub fn description(&self) -> &'static str {
        match self {
            TrapCause::InstructionMisaligned => "instruction address misaligned",
            TrapCause::InstructionFault => "instruction access fault",
            TrapCause::IllegalInstruction => "illegal instruction",
            TrapCause::Breakpoint => "breakpoint",
            TrapCause::LoadMisaligned => "load address misaligned",
            TrapCause::LoadFault => "load access fault",
            TrapCause::StoreMisaligned => "store/AMO address misaligned",
            TrapCause::StoreFault => "store/AMO access fault",
            TrapCause::EcallUser => "ECALL from U-mode",
            TrapCause::EcallSupervisor => "ECALL from S-mode",
            TrapCause::EcallMachine => "ECALL from M-mode",
            TrapCause::InstructionPageFault => "instruction page fault",
            TrapCause::LoadPageFault => "load page fault",
            TrapCause::StorePageFault => "store/AMO page fault",
            TrapCause::Interrupt(_) => "interrupt",
            TrapCause::Unknown(_) => "unknown trap",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Exit,
    AbiCall,
    JumpUser,
    EnterUser,
}

impl Syscall {
    pub fn from_raw(number: usize) -> Option<Self> {
        match number {
            SYS_EXIT => Some(Syscall::Exit),
            SYS_ABI_CALL => Some(Syscall::AbiCall),
            SYS_JUMP_USER => Some(Syscall::JumpUser),
            SYS_ENTER_USER => Some(Syscall::EnterUser),
            _ => None,
        }
    }
}

/// Machine CSRs captured at trap entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrapFrame {
    pub mcause: usize,
    pub mepc: usize,
    pub mtval: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOutcome {
    /// Return through the bank the context now selects
    Resume,
    /// The process is gone; the privileged side resumes with the code in `a0`
    Exited(i32),
    /// Fault in privileged code
    Halt,
}

/// Calls an exported service on behalf of a process
pub trait AbiInvoker {
    /// # Safety
    /// `function` must be the address of an [`super::abi::AbiFn`].
    unsafe fn invoke(&mut self, function: usize, args: [usize; 8]) -> usize;
}

/// Invokes table entries as real function pointers
pub struct DirectInvoker;

impl AbiInvoker for DirectInvoker {
    unsafe fn invoke(&mut self, function: usize, args: [usize; 8]) -> usize {
        let function: super::abi::AbiFn = core::mem::transmute(function);
        function(args[0], args[1], args[2], args[3], args[4], args[5], args[6], args[7])
    }
}

/// Log both program counters and the interrupted register bank
pub fn dump_registers(ctx: &Context, frame: &TrapFrame) {
    let regs = ctx.regs();
    log::error!(
        "Register dump (pid {}, {} mode):",
        ctx.pid(),
        if ctx.is_super() { "machine" } else { "user" }
    );
    log::error!("  pc : 0x{:08x}  tval: 0x{:08x}", frame.mepc, frame.mtval);
    for a in (1..32).step_by(2) {
        let b = a + 1;
        if b < 32 {
            log::error!(
                "  {:<3}: 0x{:08x}  {:<3}: 0x{:08x}",
                REG_NAMES[a],
                regs.get(a),
                REG_NAMES[b],
                regs.get(b)
            );
        } else {
            log::error!("  {:<3}: 0x{:08x}", REG_NAMES[a], regs.get(a));
        }
    }
}

fn fail(ctx: &mut Context, frame: &TrapFrame, reason: &str) -> TrapOutcome {
    if ctx.is_super() {
        log::error!("Kernel received {} at 0x{:x}", reason, frame.mepc);
        dump_registers(ctx, frame);
        return TrapOutcome::Halt;
    }
    log::error!("Process {} received {} at 0x{:x}", ctx.pid(), reason, frame.mepc);
    dump_registers(ctx, frame);
    ctx.terminate(FAULT_EXIT_CODE);
    TrapOutcome::Exited(FAULT_EXIT_CODE)
}

/// Finish a syscall: result in `a0`, continue after the ecall
fn complete(ctx: &mut Context, frame: &TrapFrame, result: usize) -> TrapOutcome {
    ctx.regs_mut().set(reg::A0, result);
    ctx.set_pc(frame.mepc.wrapping_add(4));
    TrapOutcome::Resume
}

/// Handle one synchronous trap for `ctx`
pub fn dispatch<I: AbiInvoker + ?Sized>(ctx: &mut Context, frame: &TrapFrame, invoker: &mut I) -> TrapOutcome {
    let cause = TrapCause::from_mcause(frame.mcause);
    ctx.set_pc(frame.mepc);

    if let TrapCause::Interrupt(code) = cause {
        log::warn!("Unexpected interrupt {} in trap dispatch", code);
        return TrapOutcome::Resume;
    }
    if !cause.is_ecall() {
        return fail(ctx, frame, cause.description());
    }

    let number = ctx.regs().get(reg::T6);
    let Some(syscall) = Syscall::from_raw(number) else {
        log::warn!("Unknown syscall {} from pid {}", number, ctx.pid());
        return complete(ctx, frame, (-ENOSYS) as usize);
    };

    match (syscall, ctx.is_super()) {
        (Syscall::Exit, false) => {
            let code = ctx.regs().get(reg::A0) as isize as i32;
            log::info!("Process {} exited with code {}", ctx.pid(), code);
            ctx.terminate(code);
            TrapOutcome::Exited(code)
        }
        (Syscall::AbiCall, false) => abi_call(ctx, frame, invoker),
        (Syscall::JumpUser | Syscall::EnterUser, false) => fail(ctx, frame, "privileged syscall"),

        (Syscall::JumpUser, true) => {
            ctx.set_pc(frame.mepc.wrapping_add(4));
            ctx.enter_user();
            TrapOutcome::Resume
        }
        (Syscall::EnterUser, true) => {
            let args = ctx.machine_regs().args();
            let gp = ctx.machine_regs().get(reg::GP);
            let tp = ctx.machine_regs().get(reg::TP);
            ctx.set_pc(frame.mepc.wrapping_add(4));
            ctx.prepare_user(args[0], args[1], gp, tp);
            ctx.enter_user();
            TrapOutcome::Resume
        }
        (Syscall::Exit | Syscall::AbiCall, true) => {
            log::warn!("Syscall {} is only valid from user mode", number);
            complete(ctx, frame, (-EPERM) as usize)
        }
    }
}

fn abi_call<I: AbiInvoker + ?Sized>(ctx: &mut Context, frame: &TrapFrame, invoker: &mut I) -> TrapOutcome {
    let index = ctx.user_regs().get(reg::T5);
    let (table, len) = ctx.abi_table();
    if index >= len || table == 0 {
        log::error!("ABI call {} out of range (table has {})", index, len);
        return fail(ctx, frame, "invalid ABI call");
    }

    let function = unsafe { *(table as *const usize).add(index) };
    let args = ctx.user_regs().args();

    ctx.set_super(true);
    let result = unsafe { invoker.invoke(function, args) };
    ctx.set_super(false);

    complete(ctx, frame, result)
}
