//! Process register context
//!
//! [`Context`] is shared with the trap entry stub, which saves and restores
//! the register banks through the offsets below before any Rust code runs.
//! Everything else goes through the typed accessors.

use core::mem::{offset_of, size_of};
use core::ptr::null_mut;

use super::heap::UserHeap;

/// Process identifier
pub type Pid = i32;

const WORD: usize = size_of::<usize>();

/// Integer register numbers
pub mod reg {
    pub const ZERO: usize = 0;
    pub const RA: usize = 1;
    pub const SP: usize = 2;
    pub const GP: usize = 3;
    pub const TP: usize = 4;
    pub const T0: usize = 5;
    pub const T1: usize = 6;
    pub const S0: usize = 8;
    pub const A0: usize = 10;
    pub const A1: usize = 11;
    pub const A7: usize = 17;
    pub const T5: usize = 30;
    pub const T6: usize = 31;
}

pub const REG_NAMES: [&str; 32] = [
    "x0", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5", "a6",
    "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

/// One bank of integer registers; slot 0 is padding for x0
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Registers {
    x: [usize; 32],
}

impl Registers {
    pub fn get(&self, index: usize) -> usize {
        if index == reg::ZERO {
            0
        } else {
            self.x[index]
        }
    }

    /// Writes to x0 are dropped
    pub fn set(&mut self, index: usize, value: usize) {
        if index != reg::ZERO {
            self.x[index] = value;
        }
    }

    pub fn clear(&mut self) {
        self.x = [0; 32];
    }

    /// Argument registers `a0`..`a7`
    pub fn args(&self) -> [usize; 8] {
        let mut args = [0; 8];
        args.copy_from_slice(&self.x[reg::A0..=reg::A7]);
        args
    }
}

/// Lifecycle of a context
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Idle,
    /// Running (or about to run) in user mode
    Running,
    Exited,
}

#[repr(C)]
#[derive(Debug)]
pub struct Context {
    u_regs: Registers,
    m_regs: Registers,
    /// Trap stub spill area
    scratch: [u32; 8],
    u_pc: usize,
    m_pc: usize,
    u_stack_hi: usize,
    u_stack_lo: usize,
    m_stack_hi: usize,
    m_stack_lo: usize,
    u_abi_table: usize,
    u_abi_size: usize,
    is_super: u32,
    pid: Pid,
    exit_code: i32,
    state: ContextState,
    heap: *mut UserHeap,
}

// Offsets used by the trap stub
pub const OFF_U_REGS: usize = 0;
pub const OFF_M_REGS: usize = 32 * WORD;
pub const OFF_SCRATCH: usize = 64 * WORD;
pub const OFF_U_PC: usize = OFF_SCRATCH + 32;
pub const OFF_M_PC: usize = OFF_U_PC + WORD;
pub const OFF_U_ABI_TABLE: usize = OFF_U_PC + 6 * WORD;
pub const OFF_U_ABI_SIZE: usize = OFF_U_ABI_TABLE + WORD;
pub const OFF_IS_SUPER: usize = OFF_U_ABI_SIZE + WORD;

const _: () = assert!(offset_of!(Context, u_regs) == OFF_U_REGS);
const _: () = assert!(offset_of!(Context, m_regs) == OFF_M_REGS);
const _: () = assert!(offset_of!(Context, scratch) == OFF_SCRATCH);
const _: () = assert!(offset_of!(Context, u_pc) == OFF_U_PC);
const _: () = assert!(offset_of!(Context, m_pc) == OFF_M_PC);
const _: () = assert!(offset_of!(Context, u_abi_table) == OFF_U_ABI_TABLE);
const _: () = assert!(offset_of!(Context, u_abi_size) == OFF_U_ABI_SIZE);
const _: () = assert!(offset_of!(Context, is_super) == OFF_IS_SUPER);

impl Context {
    /// A privileged, idle context
    pub fn new(pid: Pid) -> Self {
        Self {
            u_regs: Registers::default(),
            m_regs: Registers::default(),
            scratch: [0; 8],
            u_pc: 0,
            m_pc: 0,
            u_stack_hi: 0,
            u_stack_lo: 0,
            m_stack_hi: 0,
            m_stack_lo: 0,
            u_abi_table: 0,
            u_abi_size: 0,
            is_super: 1,
            pid,
            exit_code: 0,
            state: ContextState::Idle,
            heap: null_mut(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    pub fn is_super(&self) -> bool {
        self.is_super != 0
    }

    pub fn set_super(&mut self, is_super: bool) {
        self.is_super = is_super as u32;
    }

    pub fn user_regs(&self) -> &Registers {
        &self.u_regs
    }

    pub fn user_regs_mut(&mut self) -> &mut Registers {
        &mut self.u_regs
    }

    pub fn machine_regs(&self) -> &Registers {
        &self.m_regs
    }

    pub fn machine_regs_mut(&mut self) -> &mut Registers {
        &mut self.m_regs
    }

    /// The bank the trap stub saved into
    pub fn regs(&self) -> &Registers {
        if self.is_super() {
            &self.m_regs
        } else {
            &self.u_regs
        }
    }

    pub fn regs_mut(&mut self) -> &mut Registers {
        if self.is_super() {
            &mut self.m_regs
        } else {
            &mut self.u_regs
        }
    }

    pub fn user_pc(&self) -> usize {
        self.u_pc
    }

    pub fn machine_pc(&self) -> usize {
        self.m_pc
    }

    /// Program counter of the active bank
    pub fn pc(&self) -> usize {
        if self.is_super() {
            self.m_pc
        } else {
            self.u_pc
        }
    }

    pub fn set_pc(&mut self, pc: usize) {
        if self.is_super() {
            self.m_pc = pc;
        } else {
            self.u_pc = pc;
        }
    }

    pub fn user_stack(&self) -> (usize, usize) {
        (self.u_stack_lo, self.u_stack_hi)
    }

    pub fn set_user_stack(&mut self, lo: usize, hi: usize) {
        self.u_stack_lo = lo;
        self.u_stack_hi = hi;
    }

    pub fn set_machine_stack(&mut self, lo: usize, hi: usize) {
        self.m_stack_lo = lo;
        self.m_stack_hi = hi;
    }

    pub fn abi_table(&self) -> (usize, usize) {
        (self.u_abi_table, self.u_abi_size)
    }

    pub fn set_abi_table(&mut self, table: usize, len: usize) {
        self.u_abi_table = table;
        self.u_abi_size = len;
    }

    /// Heap the malloc services serve this process from; null if none
    pub fn user_heap(&self) -> *mut UserHeap {
        self.heap
    }

    pub fn set_user_heap(&mut self, heap: *mut UserHeap) {
        self.heap = heap;
    }

    /// Fresh user register set starting at `pc` with stack `sp`
    ///
    /// The global and thread pointers are shared with the privileged side.
    pub fn prepare_user(&mut self, pc: usize, sp: usize, gp: usize, tp: usize) {
        self.u_regs.clear();
        self.u_pc = pc;
        self.u_regs.set(reg::SP, sp);
        self.u_regs.set(reg::GP, gp);
        self.u_regs.set(reg::TP, tp);
        self.state = ContextState::Idle;
    }

    /// Continue in user mode on the next trap return
    pub fn enter_user(&mut self) {
        self.is_super = 0;
        self.state = ContextState::Running;
    }

    /// Leave user mode for good; the privileged side sees `code` in `a0`
    pub fn terminate(&mut self, code: i32) {
        self.exit_code = code;
        self.state = ContextState::Exited;
        self.is_super = 1;
        self.m_regs.set(reg::A0, code as isize as usize);
    }
}
