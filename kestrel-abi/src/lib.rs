//! Shared ABI definitions between the kernel and user tasks.
//!
//! Syscall numbers, the register convention, task constants and the
//! `#[repr(C)]` structures that are copied across the user/kernel boundary.

#![cfg_attr(not(test), no_std)]

mod user;

pub use user::{
    FS_ENTRY_NAME_LEN, FS_TYPE_DIRECTORY, FS_TYPE_FILE, FS_TYPE_MISSING, UserCircle, UserFbInfo,
    UserFsEntry, UserFsList, UserFsStat, UserLine, UserRect, UserSysInfo, UserText,
};

// =============================================================================
// Syscall convention
// =============================================================================

/// Interrupt vector used by `int 0x80`.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// Value placed in `rax` when a syscall fails.
pub const SYSCALL_ERROR: u64 = u64::MAX;

// The syscall number travels in `rax`; arguments in rdi, rsi, rdx, rcx, r8, r9.

/// Yield the CPU: () -> 0
pub const SYSCALL_YIELD: u64 = 0;
/// Terminate the calling task: () -> !
pub const SYSCALL_EXIT: u64 = 1;
/// Write to the console: (buf, len) -> bytes written
pub const SYSCALL_WRITE: u64 = 2;
/// Read a line from the console: (buf, len) -> line length
pub const SYSCALL_READ: u64 = 3;
/// Spin the roulette: () -> token << 32 | value
pub const SYSCALL_ROULETTE: u64 = 4;
/// Sleep: (ms) -> 0
pub const SYSCALL_SLEEP_MS: u64 = 5;
/// Framebuffer metadata: (out: *mut UserFbInfo) -> 0
pub const SYSCALL_FB_INFO: u64 = 6;
/// Filled rectangle: (rect: *const UserRect) -> 0
pub const SYSCALL_GFX_FILL_RECT: u64 = 7;
/// Line: (line: *const UserLine) -> 0
pub const SYSCALL_GFX_DRAW_LINE: u64 = 8;
/// Circle outline: (circle: *const UserCircle) -> 0
pub const SYSCALL_GFX_DRAW_CIRCLE: u64 = 9;
/// Filled circle: (circle: *const UserCircle) -> 0
pub const SYSCALL_GFX_DRAW_CIRCLE_FILLED: u64 = 10;
/// Text: (text: *const UserText) -> 0
pub const SYSCALL_FONT_DRAW: u64 = 11;
/// Next pseudo-random value: () -> value
pub const SYSCALL_RANDOM_NEXT: u64 = 12;
/// Resolve a pending roulette spin: (token << 32 | value) -> 0 on a win
pub const SYSCALL_ROULETTE_RESULT: u64 = 13;
/// Reserved, always fails.
pub const SYSCALL_FS_OPEN: u64 = 14;
/// Reserved, always fails.
pub const SYSCALL_FS_CLOSE: u64 = 15;
/// Read a file: (path, buf, len) -> bytes read
pub const SYSCALL_FS_READ: u64 = 16;
/// Write (create or replace) a file: (path, buf, len) -> bytes written
pub const SYSCALL_FS_WRITE: u64 = 17;
/// Stat a path: (path, out: *mut UserFsStat) -> 0
pub const SYSCALL_FS_STAT: u64 = 18;
/// Create a directory: (path) -> 0
pub const SYSCALL_FS_MKDIR: u64 = 19;
/// Remove a file: (path) -> 0
pub const SYSCALL_FS_UNLINK: u64 = 20;
/// List a directory: (path, list: *mut UserFsList) -> 0
pub const SYSCALL_FS_LIST: u64 = 21;
/// System statistics: (out: *mut UserSysInfo) -> 0
pub const SYSCALL_SYS_INFO: u64 = 22;
/// Shut the kernel down: () -> !
pub const SYSCALL_HALT: u64 = 23;

/// The closed set of syscalls understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Yield,
    Exit,
    Write,
    Read,
    Roulette,
    SleepMs,
    FbInfo,
    GfxFillRect,
    GfxDrawLine,
    GfxDrawCircle,
    GfxDrawCircleFilled,
    FontDraw,
    RandomNext,
    RouletteResult,
    FsOpen,
    FsClose,
    FsRead,
    FsWrite,
    FsStat,
    FsMkdir,
    FsUnlink,
    FsList,
    SysInfo,
    Halt,
}

impl Syscall {
    /// Decode the number found in `rax`.
    pub fn from_number(number: u64) -> Option<Self> {
        let call = match number {
            SYSCALL_YIELD => Self::Yield,
            SYSCALL_EXIT => Self::Exit,
            SYSCALL_WRITE => Self::Write,
            SYSCALL_READ => Self::Read,
            SYSCALL_ROULETTE => Self::Roulette,
            SYSCALL_SLEEP_MS => Self::SleepMs,
            SYSCALL_FB_INFO => Self::FbInfo,
            SYSCALL_GFX_FILL_RECT => Self::GfxFillRect,
            SYSCALL_GFX_DRAW_LINE => Self::GfxDrawLine,
            SYSCALL_GFX_DRAW_CIRCLE => Self::GfxDrawCircle,
            SYSCALL_GFX_DRAW_CIRCLE_FILLED => Self::GfxDrawCircleFilled,
            SYSCALL_FONT_DRAW => Self::FontDraw,
            SYSCALL_RANDOM_NEXT => Self::RandomNext,
            SYSCALL_ROULETTE_RESULT => Self::RouletteResult,
            SYSCALL_FS_OPEN => Self::FsOpen,
            SYSCALL_FS_CLOSE => Self::FsClose,
            SYSCALL_FS_READ => Self::FsRead,
            SYSCALL_FS_WRITE => Self::FsWrite,
            SYSCALL_FS_STAT => Self::FsStat,
            SYSCALL_FS_MKDIR => Self::FsMkdir,
            SYSCALL_FS_UNLINK => Self::FsUnlink,
            SYSCALL_FS_LIST => Self::FsList,
            SYSCALL_SYS_INFO => Self::SysInfo,
            SYSCALL_HALT => Self::Halt,
            _ => return None,
        };
        Some(call)
    }

    /// Short name used in kernel log lines.
    pub fn name(self) -> &'static str {
        match self {
            Self::Yield => "yield",
            Self::Exit => "exit",
            Self::Write => "write",
            Self::Read => "read",
            Self::Roulette => "roulette",
            Self::SleepMs => "sleep_ms",
            Self::FbInfo => "fb_info",
            Self::GfxFillRect => "gfx_fill_rect",
            Self::GfxDrawLine => "gfx_draw_line",
            Self::GfxDrawCircle => "gfx_draw_circle",
            Self::GfxDrawCircleFilled => "gfx_draw_circle_filled",
            Self::FontDraw => "font_draw",
            Self::RandomNext => "random_next",
            Self::RouletteResult => "roulette_result",
            Self::FsOpen => "fs_open",
            Self::FsClose => "fs_close",
            Self::FsRead => "fs_read",
            Self::FsWrite => "fs_write",
            Self::FsStat => "fs_stat",
            Self::FsMkdir => "fs_mkdir",
            Self::FsUnlink => "fs_unlink",
            Self::FsList => "fs_list",
            Self::SysInfo => "sys_info",
            Self::Halt => "halt",
        }
    }
}

// =============================================================================
// Transfer limits
// =============================================================================

/// Largest console or file transfer handled by one syscall.
pub const USER_IO_MAX_BYTES: usize = 512;
/// Size of the kernel-side path buffer, terminator included.
pub const USER_PATH_MAX: usize = 128;
/// Size of the kernel-side text buffer for `font_draw`, terminator included.
pub const USER_TEXT_MAX_BYTES: usize = 256;
/// Largest directory listing returned by `fs_list`.
pub const USER_FS_MAX_ENTRIES: u32 = 64;
/// Upper bound for `sleep_ms`.
pub const SLEEP_MAX_MS: u64 = 60_000;
/// Largest rectangle edge accepted by `gfx_fill_rect`.
pub const GFX_MAX_RECT_EDGE: i32 = 8192;
/// Largest radius accepted by the circle primitives.
pub const GFX_MAX_RADIUS: i32 = 4096;

// =============================================================================
// Tasks
// =============================================================================

/// Number of task slots.
pub const MAX_TASKS: usize = 32;
/// Task name buffer length, terminator included.
pub const TASK_NAME_MAX_LEN: usize = 32;
/// Id that never names a task.
pub const INVALID_TASK_ID: u32 = u32::MAX;
/// Default quantum in timer ticks.
pub const DEFAULT_TIME_SLICE: u32 = 10;
/// Default size of every task stack.
pub const TASK_STACK_SIZE: usize = 0x8000;

// Task creation flags
pub const TASK_FLAG_USER_MODE: u32 = 0x01;
pub const TASK_FLAG_KERNEL_MODE: u32 = 0x02;
pub const TASK_FLAG_NO_PREEMPT: u32 = 0x04;
pub const TASK_FLAG_SYSTEM: u32 = 0x08;

// Advisory priorities
pub const TASK_PRIORITY_HIGH: u8 = 0;
pub const TASK_PRIORITY_NORMAL: u8 = 1;
pub const TASK_PRIORITY_LOW: u8 = 2;
pub const TASK_PRIORITY_IDLE: u8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_number_decodes() {
        for number in SYSCALL_YIELD..=SYSCALL_HALT {
            let call = Syscall::from_number(number).unwrap();
            assert!(!call.name().is_empty());
        }
    }

    #[test]
    fn test_unknown_numbers() {
        assert_eq!(Syscall::from_number(SYSCALL_HALT + 1), None);
        assert_eq!(Syscall::from_number(SYSCALL_ERROR), None);
    }

    #[test]
    fn test_selected_numbers() {
        assert_eq!(Syscall::from_number(0), Some(Syscall::Yield));
        assert_eq!(Syscall::from_number(1), Some(Syscall::Exit));
        assert_eq!(Syscall::from_number(13), Some(Syscall::RouletteResult));
        assert_eq!(Syscall::from_number(23), Some(Syscall::Halt));
    }
}
