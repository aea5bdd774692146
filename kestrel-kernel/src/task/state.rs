//! CPU register state for context switching.

/// Saved register snapshot of a task: everything needed to resume it.
///
/// The field order is relied on by the switch assembly through
/// `core::mem::offset_of!`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TaskContext {
    // General-purpose registers
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    // Instruction pointer and flags
    pub rip: u64,
    pub rflags: u64,
    // Segment selectors
    pub cs: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
    pub ss: u64,
    /// Address-space root loaded when the task is resumed.
    pub cr3: u64,
}

/// GPRs saved on stack by the trap entry stub (matches push order).
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct SavedGprs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rbp: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
}

/// Interrupt stack frame pushed by CPU.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct InterruptFrame {
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Everything on the stack when a trap stub calls into Rust.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct TrapFrame {
    pub gprs: SavedGprs,
    pub vector: u64,
    /// CPU error code, or 0 for vectors that do not push one.
    pub error_code: u64,
    pub frame: InterruptFrame,
}

/// Requested privilege level bits of a selector.
const RPL_MASK: u64 = 0b11;

impl TrapFrame {
    /// Whether the trap was raised while running at ring 3.
    pub fn from_user(&self) -> bool {
        self.frame.cs & RPL_MASK == 3
    }

    /// Sets the value user code sees in `rax` after `iretq`.
    pub fn set_return(&mut self, value: u64) {
        self.gprs.rax = value;
    }

    /// Syscall arguments in convention order: rdi, rsi, rdx, rcx, r8, r9.
    pub fn args(&self) -> [u64; 6] {
        let g = &self.gprs;
        [g.rdi, g.rsi, g.rdx, g.rcx, g.r8, g.r9]
    }
}

impl TaskContext {
    /// Builds a snapshot from a trap taken in user mode.
    ///
    /// Data segments are not part of the trap frame; `user_data` is what the
    /// task runs with.
    pub fn from_trap(trap: &TrapFrame, user_data: u16, cr3: u64) -> Self {
        let gprs = &trap.gprs;
        let frame = &trap.frame;
        Self {
            rax: gprs.rax,
            rbx: gprs.rbx,
            rcx: gprs.rcx,
            rdx: gprs.rdx,
            rsi: gprs.rsi,
            rdi: gprs.rdi,
            rbp: gprs.rbp,
            rsp: frame.rsp,
            r8: gprs.r8,
            r9: gprs.r9,
            r10: gprs.r10,
            r11: gprs.r11,
            r12: gprs.r12,
            r13: gprs.r13,
            r14: gprs.r14,
            r15: gprs.r15,
            rip: frame.rip,
            rflags: frame.rflags,
            cs: frame.cs,
            ds: user_data as u64,
            es: user_data as u64,
            fs: 0,
            gs: 0,
            ss: frame.ss,
            cr3,
        }
    }

    /// Whether resuming this snapshot drops to ring 3.
    pub fn resumes_in_user_mode(&self) -> bool {
        self.cs & RPL_MASK == 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};

    #[test]
    fn test_context_layout() {
        assert_eq!(size_of::<TaskContext>(), 25 * 8);
        assert_eq!(offset_of!(TaskContext, rsp), 56);
        assert_eq!(offset_of!(TaskContext, r15), 120);
        assert_eq!(offset_of!(TaskContext, rip), 128);
        assert_eq!(offset_of!(TaskContext, ss), 184);
        assert_eq!(offset_of!(TaskContext, cr3), 192);
    }

    #[test]
    fn test_trap_frame_layout() {
        assert_eq!(offset_of!(TrapFrame, vector), 120);
        assert_eq!(offset_of!(TrapFrame, error_code), 128);
        assert_eq!(offset_of!(TrapFrame, frame), 136);
        assert_eq!(size_of::<TrapFrame>(), 176);
    }

    #[test]
    fn test_from_trap() {
        let mut trap = TrapFrame::default();
        trap.gprs.rax = 2;
        trap.gprs.rdi = 0x1000;
        trap.gprs.r12 = 12;
        trap.frame = InterruptFrame {
            rip: 0x40_0000,
            cs: 0x33,
            rflags: 0x202,
            rsp: 0x7fff_0000,
            ss: 0x2b,
        };

        assert!(trap.from_user());
        assert_eq!(trap.args()[0], 0x1000);

        let ctx = TaskContext::from_trap(&trap, 0x2b, 0x5000);
        assert_eq!(ctx.rax, 2);
        assert_eq!(ctx.r12, 12);
        assert_eq!(ctx.rip, 0x40_0000);
        assert_eq!(ctx.rsp, 0x7fff_0000);
        assert_eq!(ctx.ds, 0x2b);
        assert_eq!(ctx.cr3, 0x5000);
        assert!(ctx.resumes_in_user_mode());
    }

    #[test]
    fn test_kernel_trap_is_not_user() {
        let mut trap = TrapFrame::default();
        trap.frame.cs = 0x08;
        assert!(!trap.from_user());
    }
}
