//! Validated user memory access.
//!
//! - `UserSlice`: an (address, length) pair. Carries no access rights.
//! - `UserPtr<T>`: a typed user address; `T` fixes the layout being copied.
//! - `UserAccess`: the running task's address space plus the platform copy
//!   primitives. Every copy is range-checked and mapping-checked first.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;
use core::marker::PhantomData;

use kestrel_abi::USER_PATH_MAX;
use x86_64::VirtAddr;
use zerocopy::{FromBytes, Immutable, IntoBytes};

use crate::platform::{AddressSpaceId, Platform, UserCopyError};

/// Upper bound of user addresses (lower canonical half).
const USER_ADDR_MAX: u64 = 0x0000_7fff_ffff_ffff;

/// A region of user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserSlice {
    addr: u64,
    len: usize,
}

impl UserSlice {
    pub fn new(addr: u64, len: usize) -> Self {
        Self { addr, len }
    }

    pub fn addr(&self) -> u64 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A typed pointer to user memory.
#[derive(Debug)]
pub struct UserPtr<T> {
    addr: u64,
    _phantom: PhantomData<T>,
}

impl<T> Clone for UserPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for UserPtr<T> {}

impl<T> UserPtr<T> {
    #[inline(always)]
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            _phantom: PhantomData,
        }
    }

    #[inline(always)]
    pub fn addr(&self) -> u64 {
        self.addr
    }

    /// Covers `size_of::<T>()` bytes.
    pub fn as_slice(&self) -> UserSlice {
        UserSlice::new(self.addr, core::mem::size_of::<T>())
    }
}

/// Access to the running task's user memory.
pub struct UserAccess<'a, P: Platform> {
    platform: &'a mut P,
    space: AddressSpaceId,
}

impl<'a, P: Platform> UserAccess<'a, P> {
    pub(crate) fn new(platform: &'a mut P, space: AddressSpaceId) -> Self {
        Self { platform, space }
    }

    pub fn space(&self) -> AddressSpaceId {
        self.space
    }

    /// Checks that `slice` is non-null, inside the user half and mapped.
    fn validate(&self, slice: UserSlice) -> Result<VirtAddr, UserCopyError> {
        if slice.addr == 0 || slice.addr > USER_ADDR_MAX {
            return Err(UserCopyError::BadPointer);
        }
        let addr = VirtAddr::new(slice.addr);
        if slice.len == 0 {
            return Ok(addr);
        }

        let end = slice
            .addr
            .checked_add(slice.len as u64)
            .ok_or(UserCopyError::BadPointer)?;
        if end - 1 > USER_ADDR_MAX {
            return Err(UserCopyError::BadPointer);
        }
        if !self.platform.is_user_range_mapped(self.space, addr, slice.len) {
            return Err(UserCopyError::NotMapped);
        }
        Ok(addr)
    }

    /// Copies user memory into a kernel `Vec`.
    pub fn read(&self, src: UserSlice) -> Result<Vec<u8>, UserCopyError> {
        let addr = self.validate(src)?;
        let mut buf = vec![0u8; src.len];
        self.platform.read_user(self.space, addr, &mut buf);
        Ok(buf)
    }

    /// Copies `data` into user memory, up to the slice length. Returns the
    /// number of bytes written.
    pub fn write(&mut self, dst: UserSlice, data: &[u8]) -> Result<usize, UserCopyError> {
        let addr = self.validate(dst)?;
        let n = data.len().min(dst.len);
        self.platform.write_user(self.space, addr, &data[..n]);
        Ok(n)
    }

    pub fn read_user<T: FromBytes>(&self, ptr: UserPtr<T>) -> Result<T, UserCopyError> {
        let bytes = self.read(ptr.as_slice())?;
        T::read_from_bytes(&bytes).map_err(|_| UserCopyError::BadPointer)
    }

    pub fn write_user<T: IntoBytes + Immutable>(
        &mut self,
        ptr: UserPtr<T>,
        value: &T,
    ) -> Result<(), UserCopyError> {
        self.write(ptr.as_slice(), value.as_bytes())?;
        Ok(())
    }

    /// Reads a NUL-terminated path. Exactly `USER_PATH_MAX - 1` bytes are
    /// copied and the string is cut at the first NUL.
    pub fn read_path(&self, addr: u64) -> Result<String, UserCopyError> {
        let mut bytes = self.read(UserSlice::new(addr, USER_PATH_MAX - 1))?;
        if let Some(nul) = bytes.iter().position(|&b| b == 0) {
            bytes.truncate(nul);
        }
        String::from_utf8(bytes).map_err(|_| UserCopyError::BadPointer)
    }
}
