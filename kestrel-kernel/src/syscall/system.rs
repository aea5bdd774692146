//! Timing, randomness, roulette and system information.

use kestrel_abi::{SLEEP_MAX_MS, UserSysInfo};
use log::info;

use super::{RouletteSpin, SyscallCtx, SyscallError, SyscallResult, SyscallServices, UserPtr};
use crate::platform::Platform;

pub(super) fn sleep_ms<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    ms: u64,
) -> SyscallResult {
    let ms = ms.min(SLEEP_MAX_MS) as u32;
    ctx.services.sleep_ms(ms)?;
    Ok(0)
}

pub(super) fn random_next<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
) -> SyscallResult {
    Ok(ctx.services.random_next()?)
}

/// Spins the wheel. The result stays pending for the caller until it is
/// handed back through `roulette_result`.
pub(super) fn roulette<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
) -> SyscallResult {
    let spin = ctx.services.roulette_spin(ctx.task)?;
    Ok(spin.packed())
}

pub(super) fn roulette_result<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    packed: u64,
) -> SyscallResult {
    let (token, value) = RouletteSpin::unpack(packed);
    let spin = ctx
        .services
        .roulette_take_pending(ctx.task)
        .ok_or(SyscallError::BadArgument)?;
    if spin.token != token || spin.value != value {
        return Err(SyscallError::BadArgument);
    }

    info!("Task {}: roulette result {:#x} ({})", ctx.task, spin.value, spin.value);
    ctx.services.roulette_apply(&spin);

    if spin.is_win {
        Ok(0)
    } else {
        Err(SyscallError::Lost)
    }
}

pub(super) fn sys_info<P: Platform, S: SyscallServices + ?Sized>(
    ctx: &mut SyscallCtx<'_, P, S>,
    out: u64,
) -> SyscallResult {
    if out == 0 {
        return Err(SyscallError::BadArgument);
    }

    let pages = ctx.services.page_stats();
    let tasks = ctx.sched.tasks().stats();
    let sched = ctx.sched.stats();
    let info = UserSysInfo {
        total_pages: pages.total,
        free_pages: pages.free,
        allocated_pages: pages.allocated,
        total_tasks: tasks.total_created,
        active_tasks: tasks.active,
        task_context_switches: tasks.context_switches,
        scheduler_context_switches: sched.context_switches,
        scheduler_yields: sched.yields,
        ready_tasks: sched.ready_tasks,
        schedule_calls: sched.schedule_calls as u32,
        ..UserSysInfo::default()
    };

    ctx.user()?.write_user(UserPtr::new(out), &info)?;
    Ok(0)
}
