//! Executes a [`SwitchPlan`] on the CPU.

use core::arch::naked_asm;
use core::mem::offset_of;
use core::ptr;

use super::{Handoff, SwitchPlan};
use crate::task::TaskContext;

const RAX: usize = offset_of!(TaskContext, rax);
const RBX: usize = offset_of!(TaskContext, rbx);
const RCX: usize = offset_of!(TaskContext, rcx);
const RDX: usize = offset_of!(TaskContext, rdx);
const RSI: usize = offset_of!(TaskContext, rsi);
const RDI: usize = offset_of!(TaskContext, rdi);
const RBP: usize = offset_of!(TaskContext, rbp);
const RSP: usize = offset_of!(TaskContext, rsp);
const R8: usize = offset_of!(TaskContext, r8);
const R9: usize = offset_of!(TaskContext, r9);
const R10: usize = offset_of!(TaskContext, r10);
const R11: usize = offset_of!(TaskContext, r11);
const R12: usize = offset_of!(TaskContext, r12);
const R13: usize = offset_of!(TaskContext, r13);
const R14: usize = offset_of!(TaskContext, r14);
const R15: usize = offset_of!(TaskContext, r15);
const RIP: usize = offset_of!(TaskContext, rip);
const RFLAGS: usize = offset_of!(TaskContext, rflags);
const CS: usize = offset_of!(TaskContext, cs);
const DS: usize = offset_of!(TaskContext, ds);
const SS: usize = offset_of!(TaskContext, ss);

/// Runs the plan.
///
/// If the plan saves the caller, this returns when that context is loaded
/// again; otherwise it never returns.
///
/// # Safety
/// Interrupts must be disabled and the scheduler lock released. The plan
/// must come from the most recent scheduler call.
pub unsafe fn execute(plan: SwitchPlan) {
    let save = plan.save.map_or(ptr::null_mut(), |save| save.as_ptr());
    let enter_user = u64::from(plan.kind == Handoff::EnterUser);
    unsafe { switch_context(save, plan.load.as_ptr(), enter_user) }
}

/// Saves the callee-saved state into `save` (unless null) and loads `load`.
///
/// A saved context resumes by returning from this call. A loaded context
/// restores every register: through `popfq; ret` on the saved stack for the
/// same privilege level, through `iretq` with the saved selectors for ring 3.
#[unsafe(naked)]
unsafe extern "sysv64" fn switch_context(
    _save: *mut TaskContext,
    _load: *const TaskContext,
    _enter_user: u64,
) {
    naked_asm!(
        "test rdi, rdi",
        "jz 2f",
        "mov [rdi + {ctx_rbx}], rbx",
        "mov [rdi + {ctx_rbp}], rbp",
        "mov [rdi + {ctx_r12}], r12",
        "mov [rdi + {ctx_r13}], r13",
        "mov [rdi + {ctx_r14}], r14",
        "mov [rdi + {ctx_r15}], r15",
        "mov rax, [rsp]",
        "mov [rdi + {ctx_rip}], rax",
        "lea rax, [rsp + 8]",
        "mov [rdi + {ctx_rsp}], rax",
        "pushfq",
        "pop qword ptr [rdi + {ctx_rflags}]",

        "2:",
        "test rdx, rdx",
        "jnz 3f",

        // Same privilege: continue on the saved stack.
        "mov rsp, [rsi + {ctx_rsp}]",
        "push qword ptr [rsi + {ctx_rip}]",
        "push qword ptr [rsi + {ctx_rflags}]",
        "mov rax, [rsi + {ctx_rax}]",
        "mov rbx, [rsi + {ctx_rbx}]",
        "mov rcx, [rsi + {ctx_rcx}]",
        "mov rdx, [rsi + {ctx_rdx}]",
        "mov rdi, [rsi + {ctx_rdi}]",
        "mov rbp, [rsi + {ctx_rbp}]",
        "mov r8,  [rsi + {ctx_r8}]",
        "mov r9,  [rsi + {ctx_r9}]",
        "mov r10, [rsi + {ctx_r10}]",
        "mov r11, [rsi + {ctx_r11}]",
        "mov r12, [rsi + {ctx_r12}]",
        "mov r13, [rsi + {ctx_r13}]",
        "mov r14, [rsi + {ctx_r14}]",
        "mov r15, [rsi + {ctx_r15}]",
        "mov rsi, [rsi + {ctx_rsi}]",
        "popfq",
        "ret",

        // Ring 3: iretq pops RIP, CS, RFLAGS, RSP, SS.
        "3:",
        "push qword ptr [rsi + {ctx_ss}]",
        "push qword ptr [rsi + {ctx_rsp}]",
        "push qword ptr [rsi + {ctx_rflags}]",
        "push qword ptr [rsi + {ctx_cs}]",
        "push qword ptr [rsi + {ctx_rip}]",
        "mov ax, word ptr [rsi + {ctx_ds}]",
        "mov ds, ax",
        "mov es, ax",
        "mov rax, [rsi + {ctx_rax}]",
        "mov rbx, [rsi + {ctx_rbx}]",
        "mov rcx, [rsi + {ctx_rcx}]",
        "mov rdx, [rsi + {ctx_rdx}]",
        "mov rdi, [rsi + {ctx_rdi}]",
        "mov rbp, [rsi + {ctx_rbp}]",
        "mov r8,  [rsi + {ctx_r8}]",
        "mov r9,  [rsi + {ctx_r9}]",
        "mov r10, [rsi + {ctx_r10}]",
        "mov r11, [rsi + {ctx_r11}]",
        "mov r12, [rsi + {ctx_r12}]",
        "mov r13, [rsi + {ctx_r13}]",
        "mov r14, [rsi + {ctx_r14}]",
        "mov r15, [rsi + {ctx_r15}]",
        "mov rsi, [rsi + {ctx_rsi}]",
        "iretq",
        ctx_rax = const RAX,
        ctx_rbx = const RBX,
        ctx_rcx = const RCX,
        ctx_rdx = const RDX,
        ctx_rsi = const RSI,
        ctx_rdi = const RDI,
        ctx_rbp = const RBP,
        ctx_rsp = const RSP,
        ctx_r8 = const R8,
        ctx_r9 = const R9,
        ctx_r10 = const R10,
        ctx_r11 = const R11,
        ctx_r12 = const R12,
        ctx_r13 = const R13,
        ctx_r14 = const R14,
        ctx_r15 = const R15,
        ctx_rip = const RIP,
        ctx_rflags = const RFLAGS,
        ctx_cs = const CS,
        ctx_ds = const DS,
        ctx_ss = const SS,
    )
}
