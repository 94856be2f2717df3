//! Machine-mode trap entry
//!
//! The stub below is copied to the heap and the existing trap vector is
//! patched to jump to the copy. Traps taken while no [`Context`] is
//! installed in `mscratch`, and all interrupts, go to the previous handler
//! untouched. Everything else saves the interrupted register bank into the
//! context and calls [`badgeload_trap_dispatch`].

use alloc::vec::Vec;
use core::arch::{asm, global_asm};
use core::ptr::addr_of;

use badgeload::runtime::abi::{decode_jal, encode_jal};
use badgeload::runtime::context::{OFF_IS_SUPER, OFF_M_REGS, OFF_SCRATCH, OFF_U_REGS};
use badgeload::runtime::trap::SYS_JUMP_USER;
use badgeload::runtime::{self, dispatch, Context, DirectInvoker, TrapFrame, TrapOutcome};
use riscv::register::{mcause, mepc, mscratch, mstatus, mtval, mtvec};
use spin::Once;

use crate::console;

global_asm!(
    r#"
    .section .text.badgeload_trap, "ax"
    .balign 4
    .option push
    .option norvc
    .option norelax
    .global badgeload_trap_start
badgeload_trap_start:
    csrrw t0, mscratch, t0
    beqz t0, 90f
    sw t1, {scratch}(t0)
    csrr t1, mcause
    bltz t1, 91f

    lw t1, {is_super}(t0)
    beqz t1, 10f
    addi t1, t0, {m_regs}
    j 11f
10: addi t1, t0, {u_regs}
11: sw x1, 4(t1)
    sw x2, 8(t1)
    sw x3, 12(t1)
    sw x4, 16(t1)
    sw x7, 28(t1)
    sw x8, 32(t1)
    sw x9, 36(t1)
    sw x10, 40(t1)
    sw x11, 44(t1)
    sw x12, 48(t1)
    sw x13, 52(t1)
    sw x14, 56(t1)
    sw x15, 60(t1)
    sw x16, 64(t1)
    sw x17, 68(t1)
    sw x18, 72(t1)
    sw x19, 76(t1)
    sw x20, 80(t1)
    sw x21, 84(t1)
    sw x22, 88(t1)
    sw x23, 92(t1)
    sw x24, 96(t1)
    sw x25, 100(t1)
    sw x26, 104(t1)
    sw x27, 108(t1)
    sw x28, 112(t1)
    sw x29, 116(t1)
    sw x30, 120(t1)
    sw x31, 124(t1)
    lw a0, {scratch}(t0)
    sw a0, 24(t1)
    csrrw a0, mscratch, t0
    sw a0, 20(t1)

    lw sp, {m_regs}+8(t0)
    lw gp, {m_regs}+12(t0)
    lw tp, {m_regs}+16(t0)
    mv a0, t0
20: auipc t1, 0
    lw t1, (badgeload_trap_handler - 20b)(t1)
    jalr ra, t1, 0

    csrr t0, mscratch
    lw t1, {is_super}(t0)
    beqz t1, 30f
    addi t1, t0, {m_regs}
    j 31f
30: addi t1, t0, {u_regs}
31: lw x1, 4(t1)
    lw x2, 8(t1)
    lw x3, 12(t1)
    lw x4, 16(t1)
    lw x7, 28(t1)
    lw x8, 32(t1)
    lw x9, 36(t1)
    lw x10, 40(t1)
    lw x11, 44(t1)
    lw x12, 48(t1)
    lw x13, 52(t1)
    lw x14, 56(t1)
    lw x15, 60(t1)
    lw x16, 64(t1)
    lw x17, 68(t1)
    lw x18, 72(t1)
    lw x19, 76(t1)
    lw x20, 80(t1)
    lw x21, 84(t1)
    lw x22, 88(t1)
    lw x23, 92(t1)
    lw x24, 96(t1)
    lw x25, 100(t1)
    lw x26, 104(t1)
    lw x27, 108(t1)
    lw x28, 112(t1)
    lw x29, 116(t1)
    lw x30, 120(t1)
    lw x31, 124(t1)
    lw t0, 20(t1)
    lw t1, 24(t1)
    mret

90: csrrw t0, mscratch, t0
    j badgeload_trap_forward
91: lw t1, {scratch}(t0)
    csrrw t0, mscratch, t0
    .global badgeload_trap_forward
badgeload_trap_forward:
    j badgeload_trap_forward

    .balign 4
    .global badgeload_trap_handler
badgeload_trap_handler:
    .word 0
    .global badgeload_trap_end
badgeload_trap_end:
    .option pop
    "#,
    scratch = const OFF_SCRATCH,
    is_super = const OFF_IS_SUPER,
    m_regs = const OFF_M_REGS,
    u_regs = const OFF_U_REGS,
);

extern "C" {
    static badgeload_trap_start: u32;
    static badgeload_trap_forward: u32;
    static badgeload_trap_handler: u32;
    static badgeload_trap_end: u32;
}

// Address of the installed stub copy
static STUB: Once<usize> = Once::new();

fn fence_i() {
    unsafe { asm!("fence", "fence.i") };
}

/// Install the trap stub; valid once per boot
pub fn init() -> Result<usize, &'static str> {
    if STUB.is_completed() {
        return Err("trap stub already installed");
    }

    let vector = mtvec::read().address();
    let first = unsafe { (vector as *const u32).read_volatile() };
    let (previous, patch_vector) = match decode_jal(first) {
        Some(offset) => ((vector as i64 + offset) as usize, true),
        None => (vector, false),
    };

    let start = unsafe { addr_of!(badgeload_trap_start) } as usize;
    let forward = unsafe { addr_of!(badgeload_trap_forward) } as usize;
    let handler = unsafe { addr_of!(badgeload_trap_handler) } as usize;
    let end = unsafe { addr_of!(badgeload_trap_end) } as usize;

    let words = (end - start) / 4;
    let mut copy: Vec<u32> = Vec::with_capacity(words);
    for index in 0..words {
        copy.push(unsafe { (start as *const u32).add(index).read_volatile() });
    }
    let copy = copy.leak();
    let base = copy.as_ptr() as usize;

    let forward_index = (forward - start) / 4;
    let offset = previous as i64 - (base + forward_index * 4) as i64;
    copy[forward_index] = encode_jal(0, offset).ok_or("previous trap handler out of jal range")?;
    copy[(handler - start) / 4] = badgeload_trap_dispatch as usize as u32;
    fence_i();

    if patch_vector {
        let jal = encode_jal(0, base as i64 - vector as i64).ok_or("trap stub out of jal range")?;
        unsafe { (vector as *mut u32).write_volatile(jal) };
    } else {
        unsafe { mtvec::write(base, mtvec::TrapMode::Direct) };
    }
    fence_i();

    STUB.call_once(|| base);
    log::info!("Trap stub at 0x{:x}, previous handler 0x{:x}", base, previous);
    Ok(base)
}

/// Make `ctx` the target of user traps; null forwards everything
pub fn set_ctx(ctx: *mut Context) {
    runtime::set_current(ctx);
    unsafe { mscratch::write(ctx as usize) };
}

/// Enter the prepared user context of the current process
///
/// Returns the exit code once the process exits or is killed.
pub fn jump_user() -> i32 {
    let code: usize;
    unsafe {
        asm!(
            "fence",
            "fence.i",
            "ecall",
            inlateout("t6") SYS_JUMP_USER => _,
            inlateout("a0") 0usize => code,
        );
    }
    code as isize as i32
}

fn halt() -> ! {
    console::emergency_print(format_args!("[x] System halted\n"));
    loop {
        unsafe { asm!("wfi") };
    }
}

#[no_mangle]
extern "C" fn badgeload_trap_dispatch(ctx: *mut Context) {
    let ctx = unsafe { &mut *ctx };
    let frame = TrapFrame {
        mcause: mcause::read().bits(),
        mepc: mepc::read(),
        mtval: mtval::read(),
    };

    if dispatch(ctx, &frame, &mut DirectInvoker) == TrapOutcome::Halt {
        halt();
    }

    unsafe {
        mepc::write(ctx.pc());
        if ctx.is_super() {
            mstatus::set_mpp(mstatus::MPP::Machine);
        } else {
            mstatus::set_mpp(mstatus::MPP::User);
        }
    }
}
