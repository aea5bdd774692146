//! Console syscalls.

use alloc::vec;

use kestrel_abi::USER_IO_MAX_BYTES;

use super::{SyscallCtx, SyscallError, SyscallResult, SyscallServices, UserSlice};
use crate::platform::Platform;

/// Clamps a transfer length. Zero-length transfers are rejected.
pub(super) fn io_len(requested: u64) -> Result<usize, SyscallError> {
    match requested {
        0 => Err(SyscallError::BadArgument),
        len => Ok(len.min(USER_IO_MAX_BYTES as u64) as usize),
    }
}

pub(super) fn write<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    buf: u64,
    len: u64,
) -> SyscallResult {
    let len = io_len(len)?;
    let bytes = ctx.user()?.read(UserSlice::new(buf, len))?;
    let written = ctx.services.console_write(&bytes)?;
    Ok(written as u64)
}

/// Reads one line. The line is copied out NUL-terminated and its length,
/// without the terminator, is returned.
pub(super) fn read<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    buf: u64,
    len: u64,
) -> SyscallResult {
    let max = io_len(len)?;
    if buf == 0 {
        return Err(SyscallError::BadArgument);
    }

    let mut line = vec![0u8; max];
    let n = ctx
        .services
        .console_read_line(&mut line[..max - 1])?
        .min(max - 1);
    line[n] = 0;

    ctx.user()?.write(UserSlice::new(buf, n + 1), &line[..=n])?;
    Ok(n as u64)
}
