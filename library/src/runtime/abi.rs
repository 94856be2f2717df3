//! ABI export table and call thunks
//!
//! Runtime services are exported to programs in one of two ways: directly,
//! as the raw function address (privileged callers only), or through a
//! thunk that puts the table index in `t5` and issues the ABI-call ecall.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::trap::{SYS_ABI_CALL, SYS_EXIT};
use super::RuntimeError;
use crate::symbols::SymbolMap;

/// Signature every exported service is called through
pub type AbiFn = unsafe extern "C" fn(usize, usize, usize, usize, usize, usize, usize, usize) -> usize;

/// Bytes per ABI thunk: five instructions and the index word
pub const THUNK_SIZE: usize = 24;
/// Offset of the index word inside a thunk
const THUNK_INDEX: u32 = 20;

pub const EXIT_THUNK_SIZE: usize = 12;
pub const ABORT_THUNK_SIZE: usize = 16;

const OP_LOAD: u32 = 0x03;
const OP_IMM: u32 = 0x13;
const OP_AUIPC: u32 = 0x17;
const OP_JAL: u32 = 0x6f;
const OP_JALR: u32 = 0x67;
const ECALL: u32 = 0x0000_0073;

const X0: u32 = 0;
const RA: u32 = 1;
const A0: u32 = 10;
const T5: u32 = 30;
const T6: u32 = 31;

fn i_type(opcode: u32, rd: u32, funct3: u32, rs1: u32, imm: i32) -> u32 {
    ((imm as u32 & 0xfff) << 20) | (rs1 << 15) | (funct3 << 12) | (rd << 7) | opcode
}

fn u_type(opcode: u32, rd: u32, imm: u32) -> u32 {
    (imm & 0xffff_f000) | (rd << 7) | opcode
}

/// `jal rd, offset`, if the offset is even and within +-1 MiB
pub fn encode_jal(rd: u32, offset: i64) -> Option<u32> {
    if offset % 2 != 0 || !(-(1 << 20)..(1 << 20)).contains(&offset) || rd > 31 {
        return None;
    }
    let imm = offset as u32;
    let bits = (((imm >> 20) & 1) << 31)
        | (((imm >> 1) & 0x3ff) << 21)
        | (((imm >> 11) & 1) << 20)
        | (((imm >> 12) & 0xff) << 12);
    Some(bits | (rd << 7) | OP_JAL)
}

/// Offset of a `jal` instruction, `None` for anything else
pub fn decode_jal(inst: u32) -> Option<i64> {
    if inst & 0x7f != OP_JAL {
        return None;
    }
    let imm = (((inst >> 31) & 1) << 20)
        | (((inst >> 21) & 0x3ff) << 1)
        | (((inst >> 20) & 1) << 11)
        | (((inst >> 12) & 0xff) << 12);
    // Sign-extend from bit 20
    Some(((imm << 11) as i32 >> 11) as i64)
}

fn push_words(out: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        out.extend_from_slice(&word.to_le_bytes());
    }
}

/// Thunk for table entry `index`
pub fn abi_thunk(index: u32) -> [u8; THUNK_SIZE] {
    let mut out = Vec::with_capacity(THUNK_SIZE);
    push_words(
        &mut out,
        &[
            u_type(OP_AUIPC, T5, 0),
            i_type(OP_LOAD, T5, 2, T5, THUNK_INDEX as i32),
            i_type(OP_IMM, T6, 0, X0, SYS_ABI_CALL as i32),
            ECALL,
            i_type(OP_JALR, X0, 0, RA, 0),
            index,
        ],
    );
    let mut thunk = [0; THUNK_SIZE];
    thunk.copy_from_slice(&out);
    thunk
}

/// `exit(code)`: the exit syscall with the code already in `a0`
pub fn exit_thunk() -> [u8; EXIT_THUNK_SIZE] {
    let mut out = Vec::with_capacity(EXIT_THUNK_SIZE);
    push_words(&mut out, &[i_type(OP_IMM, T6, 0, X0, SYS_EXIT as i32), ECALL, OP_JAL]);
    let mut thunk = [0; EXIT_THUNK_SIZE];
    thunk.copy_from_slice(&out);
    thunk
}

/// `abort()`: exit with code -1
pub fn abort_thunk() -> [u8; ABORT_THUNK_SIZE] {
    let mut out = Vec::with_capacity(ABORT_THUNK_SIZE);
    push_words(&mut out, &[i_type(OP_IMM, A0, 0, X0, -1)]);
    out.extend_from_slice(&exit_thunk());
    let mut thunk = [0; ABORT_THUNK_SIZE];
    thunk.copy_from_slice(&out);
    thunk
}

/// Ordered table of exported runtime services
#[derive(Debug, Default)]
pub struct AbiTable {
    functions: Vec<usize>,
    names: BTreeMap<String, usize>,
}

impl AbiTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `name`; returns its index
    pub fn register(&mut self, name: &str, function: usize) -> Result<usize, RuntimeError> {
        if self.names.contains_key(name) {
            return Err(RuntimeError::DuplicateAbi);
        }
        let index = self.functions.len();
        self.functions.push(function);
        self.names.insert(String::from(name), index);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<usize> {
        self.functions.get(index).copied()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.get(name).copied()
    }

    /// Address of the function array, for a context's ABI table
    pub fn as_ptr(&self) -> usize {
        self.functions.as_ptr() as usize
    }

    /// Export raw function addresses
    pub fn export_direct(&self, map: &mut SymbolMap) {
        for (name, &index) in &self.names {
            map.insert_abi(name, self.functions[index]);
        }
    }

    /// Every thunk, back to back in table order, then `exit` and `abort`
    pub fn thunk_image(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(self.len() * THUNK_SIZE + EXIT_THUNK_SIZE + ABORT_THUNK_SIZE);
        for index in 0..self.len() {
            image.extend_from_slice(&abi_thunk(index as u32));
        }
        image.extend_from_slice(&exit_thunk());
        image.extend_from_slice(&abort_thunk());
        image
    }

    /// Export thunk addresses for an image from [`AbiTable::thunk_image`]
    /// placed at `base`
    pub fn export_thunks(&self, map: &mut SymbolMap, base: usize) {
        for (name, &index) in &self.names {
            map.insert_abi(name, base + index * THUNK_SIZE);
        }
        let exit = base + self.len() * THUNK_SIZE;
        map.insert_abi("exit", exit);
        map.insert_abi("abort", exit + EXIT_THUNK_SIZE);
    }
}
