//! Structures exchanged with user tasks through syscall pointers.
//!
//! Every structure is `#[repr(C)]` with explicit reserved fields so its bytes
//! can be copied in either direction without padding.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// `UserFsEntry::kind` / `UserFsStat::kind` for a regular file.
pub const FS_TYPE_FILE: u8 = 0;
/// `UserFsEntry::kind` / `UserFsStat::kind` for a directory.
pub const FS_TYPE_DIRECTORY: u8 = 1;
/// `UserFsStat::kind` when the path does not exist.
pub const FS_TYPE_MISSING: u8 = 0xFF;

/// Length of `UserFsEntry::name`, terminator included.
pub const FS_ENTRY_NAME_LEN: usize = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserFbInfo {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub bpp: u8,
    pub pixel_format: u8,
    pub _reserved: [u8; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub color: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserLine {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
    pub color: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserCircle {
    pub cx: i32,
    pub cy: i32,
    pub radius: i32,
    pub color: u32,
}

/// Text request for `font_draw`. `str` points at `len` UTF-8 bytes in user memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserText {
    pub x: i32,
    pub y: i32,
    pub fg_color: u32,
    pub bg_color: u32,
    pub str: u64,
    pub len: u32,
    pub _reserved: u32,
}

/// One directory entry returned by `fs_list`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserFsEntry {
    /// NUL-terminated name.
    pub name: [u8; FS_ENTRY_NAME_LEN],
    pub kind: u8,
    pub _reserved: [u8; 3],
    pub size: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserFsStat {
    pub kind: u8,
    pub _reserved: [u8; 3],
    pub size: u32,
}

/// Header of an `fs_list` request. The kernel fills `count`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserFsList {
    /// User pointer to `max_entries` `UserFsEntry` slots.
    pub entries: u64,
    pub max_entries: u32,
    pub count: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UserSysInfo {
    pub total_pages: u32,
    pub free_pages: u32,
    pub allocated_pages: u32,
    pub total_tasks: u32,
    pub active_tasks: u32,
    pub _reserved: u32,
    pub task_context_switches: u64,
    pub scheduler_context_switches: u64,
    pub scheduler_yields: u64,
    pub ready_tasks: u32,
    pub schedule_calls: u32,
}
