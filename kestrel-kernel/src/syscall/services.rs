//! Collaborators that syscall handlers call into.
//!
//! The task core does not own a console, a framebuffer, a filesystem or the
//! roulette. Whoever boots the kernel plugs them in through
//! [`SyscallServices`]; anything left unimplemented reports
//! [`ServiceError::Unsupported`] and the syscall fails.

use alloc::string::String;
use alloc::vec::Vec;

use kestrel_abi::{UserCircle, UserFbInfo, UserLine, UserRect};

use crate::task::TaskId;

/// Service-side failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceError {
    /// No backend provides this operation.
    Unsupported,
    /// The backend rejected or failed the request.
    Failed,
    /// The named path does not exist.
    NotFound,
    /// Nothing available yet. The caller yields and the syscall is retried.
    WouldBlock,
}

/// Win or loss reported to the ledger after every syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Win,
    Loss,
}

/// One roulette draw, identified by its token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouletteSpin {
    pub token: u32,
    pub value: u32,
    pub is_win: bool,
}

impl RouletteSpin {
    /// `token << 32 | value`, as returned to user space.
    pub fn packed(&self) -> u64 {
        (u64::from(self.token) << 32) | u64::from(self.value)
    }

    /// Splits a packed spin into `(token, value)`.
    pub fn unpack(packed: u64) -> (u32, u32) {
        ((packed >> 32) as u32, packed as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsNodeKind {
    File,
    Directory,
}

/// Metadata of a filesystem node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsNode {
    pub kind: FsNodeKind,
    pub size: u32,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub name: String,
    pub node: FsNode,
}

/// Physical page counters reported by `sys_info`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub total: u32,
    pub free: u32,
    pub allocated: u32,
}

/// Backend of the non-scheduling syscalls.
pub trait SyscallServices {
    /// Writes to the console; returns the bytes written.
    fn console_write(&mut self, _bytes: &[u8]) -> Result<usize, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// Reads one line into `buf`, without terminator; returns its length.
    /// Must not wait for input: an incomplete line is
    /// [`ServiceError::WouldBlock`].
    fn console_read_line(&mut self, _buf: &mut [u8]) -> Result<usize, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// Busy-waits `ms` milliseconds. Only used while timer preemption is
    /// off; otherwise the scheduler puts the caller to sleep.
    fn sleep_ms(&mut self, _ms: u32) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn framebuffer_info(&self) -> Result<UserFbInfo, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn fill_rect(&mut self, _rect: &UserRect) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn draw_line(&mut self, _line: &UserLine) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn draw_circle(&mut self, _circle: &UserCircle, _filled: bool) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn draw_text(
        &mut self,
        _x: i32,
        _y: i32,
        _text: &[u8],
        _fg: u32,
        _bg: u32,
    ) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn random_next(&mut self) -> Result<u64, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// Draws a spin and records it as pending for `task`.
    fn roulette_spin(&mut self, _task: TaskId) -> Result<RouletteSpin, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// Removes and returns the spin pending for `task`.
    fn roulette_take_pending(&mut self, _task: TaskId) -> Option<RouletteSpin> {
        None
    }

    /// Applies a resolved spin (the ledger decides what a loss costs).
    fn roulette_apply(&mut self, _spin: &RouletteSpin) {}

    fn fs_read(&mut self, _path: &str, _buf: &mut [u8]) -> Result<usize, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// Creates or overwrites a file; returns the bytes written.
    fn fs_write(&mut self, _path: &str, _data: &[u8]) -> Result<usize, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    /// `Ok(None)` when the path does not exist.
    fn fs_stat(&mut self, _path: &str) -> Result<Option<FsNode>, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn fs_mkdir(&mut self, _path: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn fs_unlink(&mut self, _path: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn fs_list(&mut self, _path: &str) -> Result<Vec<FsEntry>, ServiceError> {
        Err(ServiceError::Unsupported)
    }

    fn page_stats(&self) -> PageStats {
        PageStats::default()
    }

    /// Ledger hook, called once per syscall.
    fn record_outcome(&mut self, _outcome: Outcome) {}
}

/// Backend with nothing plugged in.
#[derive(Debug, Default)]
pub struct NoServices;

impl SyscallServices for NoServices {}
