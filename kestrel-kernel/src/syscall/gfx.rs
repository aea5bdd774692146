//! Framebuffer and drawing syscalls.

use kestrel_abi::{
    GFX_MAX_RADIUS, GFX_MAX_RECT_EDGE, USER_TEXT_MAX_BYTES, UserCircle, UserFbInfo, UserLine,
    UserRect, UserText,
};

use super::{SyscallCtx, SyscallError, SyscallResult, SyscallServices, UserPtr, UserSlice};
use crate::platform::Platform;

pub(super) fn fb_info<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    out: u64,
) -> SyscallResult {
    let info = ctx.services.framebuffer_info()?;
    ctx.user()?
        .write_user(UserPtr::<UserFbInfo>::new(out), &info)?;
    Ok(0)
}

pub(super) fn fill_rect<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    ptr: u64,
) -> SyscallResult {
    let rect = ctx.user()?.read_user(UserPtr::<UserRect>::new(ptr))?;
    if !(1..=GFX_MAX_RECT_EDGE).contains(&rect.width)
        || !(1..=GFX_MAX_RECT_EDGE).contains(&rect.height)
    {
        return Err(SyscallError::BadArgument);
    }
    ctx.services.fill_rect(&rect)?;
    Ok(0)
}

pub(super) fn draw_line<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    ptr: u64,
) -> SyscallResult {
    let line = ctx.user()?.read_user(UserPtr::<UserLine>::new(ptr))?;
    ctx.services.draw_line(&line)?;
    Ok(0)
}

pub(super) fn draw_circle<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    ptr: u64,
    filled: bool,
) -> SyscallResult {
    let circle = ctx.user()?.read_user(UserPtr::<UserCircle>::new(ptr))?;
    if !(1..=GFX_MAX_RADIUS).contains(&circle.radius) {
        return Err(SyscallError::BadArgument);
    }
    ctx.services.draw_circle(&circle, filled)?;
    Ok(0)
}

/// Draws up to `USER_TEXT_MAX_BYTES - 1` bytes of text; longer requests are
/// cut.
pub(super) fn font_draw<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    ptr: u64,
) -> SyscallResult {
    let user = ctx.user()?;
    let request = user.read_user(UserPtr::<UserText>::new(ptr))?;
    if request.str == 0 || request.len == 0 {
        return Err(SyscallError::BadArgument);
    }
    let len = (request.len as usize).min(USER_TEXT_MAX_BYTES - 1);
    let text = user.read(UserSlice::new(request.str, len))?;

    ctx.services
        .draw_text(request.x, request.y, &text, request.fg_color, request.bg_color)?;
    Ok(0)
}
