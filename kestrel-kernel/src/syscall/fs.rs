//! Filesystem syscalls. All of them take a user path.

use alloc::vec;
use alloc::vec::Vec;

use kestrel_abi::{
    FS_ENTRY_NAME_LEN, FS_TYPE_DIRECTORY, FS_TYPE_FILE, FS_TYPE_MISSING, USER_FS_MAX_ENTRIES,
    USER_IO_MAX_BYTES, UserFsEntry, UserFsList, UserFsStat,
};
use zerocopy::IntoBytes;

use super::console::io_len;
use super::{
    FsNode, FsNodeKind, ServiceError, SyscallCtx, SyscallError, SyscallResult, SyscallServices,
    UserPtr, UserSlice,
};
use crate::platform::Platform;

fn kind_byte(kind: FsNodeKind) -> u8 {
    match kind {
        FsNodeKind::File => FS_TYPE_FILE,
        FsNodeKind::Directory => FS_TYPE_DIRECTORY,
    }
}

pub(super) fn read<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
    buf: u64,
    len: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    if buf == 0 {
        return Err(SyscallError::BadArgument);
    }
    let len = io_len(len)?;

    let mut data = vec![0u8; len];
    let n = ctx.services.fs_read(&path, &mut data)?.min(len);
    ctx.user()?.write(UserSlice::new(buf, n), &data[..n])?;
    Ok(n as u64)
}

/// Creates or overwrites `path`. A zero-length write creates an empty file.
pub(super) fn write<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
    buf: u64,
    len: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    if buf == 0 {
        return Err(SyscallError::BadArgument);
    }
    let len = len.min(USER_IO_MAX_BYTES as u64) as usize;
    let data = if len > 0 {
        ctx.user()?.read(UserSlice::new(buf, len))?
    } else {
        Vec::new()
    };

    let written = ctx.services.fs_write(&path, &data)?;
    if written != len {
        return Err(SyscallError::Service(ServiceError::Failed));
    }
    Ok(written as u64)
}

/// Fills a `UserFsStat`. A missing path is not an error; it reports
/// `FS_TYPE_MISSING`.
pub(super) fn stat<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
    out: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    if out == 0 {
        return Err(SyscallError::BadArgument);
    }

    let stat = match ctx.services.fs_stat(&path)? {
        Some(FsNode { kind, size }) => UserFsStat {
            kind: kind_byte(kind),
            size,
            ..UserFsStat::default()
        },
        None => UserFsStat {
            kind: FS_TYPE_MISSING,
            ..UserFsStat::default()
        },
    };
    ctx.user()?.write_user(UserPtr::new(out), &stat)?;
    Ok(0)
}

pub(super) fn mkdir<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    ctx.services.fs_mkdir(&path)?;
    Ok(0)
}

/// Removes a file. Directories are refused.
pub(super) fn unlink<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    match ctx.services.fs_stat(&path)? {
        Some(FsNode {
            kind: FsNodeKind::File,
            ..
        }) => {}
        Some(_) => return Err(SyscallError::BadArgument),
        None => return Err(ServiceError::NotFound.into()),
    }
    ctx.services.fs_unlink(&path)?;
    Ok(0)
}

/// Lists a directory into the caller's `UserFsList`. At most `max_entries`
/// entries are returned; names longer than the entry field are cut.
pub(super) fn list<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    path: u64,
    list: u64,
) -> SyscallResult {
    let path = ctx.user()?.read_path(path)?;
    if list == 0 {
        return Err(SyscallError::BadArgument);
    }
    let header_ptr = UserPtr::<UserFsList>::new(list);
    let mut header = ctx.user()?.read_user(header_ptr)?;
    if header.max_entries == 0 || header.max_entries > USER_FS_MAX_ENTRIES || header.entries == 0
    {
        return Err(SyscallError::BadArgument);
    }

    let listing = ctx.services.fs_list(&path)?;
    let entries: Vec<UserFsEntry> = listing
        .iter()
        .take(header.max_entries as usize)
        .map(|entry| {
            let mut name = [0u8; FS_ENTRY_NAME_LEN];
            let len = entry.name.len().min(FS_ENTRY_NAME_LEN - 1);
            name[..len].copy_from_slice(&entry.name.as_bytes()[..len]);
            UserFsEntry {
                name,
                kind: kind_byte(entry.node.kind),
                _reserved: [0; 3],
                size: entry.node.size,
            }
        })
        .collect();
    header.count = entries.len() as u32;

    let bytes = entries.as_slice().as_bytes();
    let mut user = ctx.user()?;
    user.write(UserSlice::new(header.entries, bytes.len()), bytes)?;
    user.write_user(header_ptr, &header)?;
    Ok(0)
}
