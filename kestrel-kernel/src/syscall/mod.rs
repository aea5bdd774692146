//! Syscall gateway.
//!
//! The only legal way for a user task to re-enter the kernel is `int 0x80`.
//! This module turns such a trap into a scheduler operation or a bounded call
//! into [`SyscallServices`]:
//! - the trapped frame is copied into the task's saved context first
//! - `rax` is decoded into the closed [`Syscall`] set
//! - every failure becomes `SYSCALL_ERROR` in `rax`; nothing else leaks out

mod console;
mod fs;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod gdt;
mod gfx;
pub mod services;
mod system;
pub mod user_ptr;


use kestrel_abi::{SLEEP_MAX_MS, SYSCALL_ERROR, Syscall};
use log::{debug, error, info, warn};

pub use services::{
    FsEntry, FsNode, FsNodeKind, NoServices, Outcome, PageStats, RouletteSpin, ServiceError,
    SyscallServices,
};
pub use user_ptr::{UserAccess, UserPtr, UserSlice};

use crate::platform::{Platform, UserCopyError};
use crate::scheduler::{Scheduler, SchedulerError, SwitchPlan};
use crate::task::{TaskId, TrapFrame};

/// What the trap stub does once the gateway returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Return to the trapped frame; `rax` holds the result.
    Resume,
    /// Execute the plan; the trapped frame is abandoned.
    Switch(SwitchPlan),
    /// The caller was not a user task. The frame is returned to untouched.
    Fault,
    /// Stop the machine.
    Halt,
}

/// Reasons a syscall fails. User space only ever sees `SYSCALL_ERROR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// `rax` does not name a syscall.
    UnknownSyscall,
    /// The number is reserved and has no handler.
    Reserved,
    /// A length, count or geometry argument is out of range.
    BadArgument,
    /// A user pointer failed validation.
    BadUserPointer(UserCopyError),
    /// The backing service failed.
    Service(ServiceError),
    /// The roulette spin was a loss.
    Lost,
    /// The running task has no user address space.
    NotUserTask,
    /// The scheduler refused the operation.
    Scheduler(SchedulerError),
}

impl From<UserCopyError> for SyscallError {
    fn from(err: UserCopyError) -> Self {
        SyscallError::BadUserPointer(err)
    }
}

impl From<ServiceError> for SyscallError {
    fn from(err: ServiceError) -> Self {
        SyscallError::Service(err)
    }
}

type SyscallResult = Result<u64, SyscallError>;

/// Length of the `int 0x80` instruction (`cd 80`).
const SYSCALL_INSN_LEN: u64 = 2;

/// State handed to every handler.
pub(crate) struct SyscallCtx<'a, P: Platform, S: SyscallServices + ?Sized> {
    sched: &'a mut Scheduler<P>,
    services: &'a mut S,
    task: TaskId,
}

impl<P: Platform, S: SyscallServices + ?Sized> SyscallCtx<'_, P, S> {
    /// Access to the calling task's memory.
    fn user(&mut self) -> Result<UserAccess<'_, P>, SyscallError> {
        self.sched.user_access().ok_or(SyscallError::NotUserTask)
    }

    fn dispatch(&mut self, call: Syscall, args: [u64; 6]) -> SyscallResult {
        match call {
            Syscall::Write => console::write(self, args[0], args[1]),
            Syscall::Read => console::read(self, args[0], args[1]),
            Syscall::Roulette => system::roulette(self),
            Syscall::SleepMs => system::sleep_ms(self, args[0]),
            Syscall::FbInfo => gfx::fb_info(self, args[0]),
            Syscall::GfxFillRect => gfx::fill_rect(self, args[0]),
            Syscall::GfxDrawLine => gfx::draw_line(self, args[0]),
            Syscall::GfxDrawCircle => gfx::draw_circle(self, args[0], false),
            Syscall::GfxDrawCircleFilled => gfx::draw_circle(self, args[0], true),
            Syscall::FontDraw => gfx::font_draw(self, args[0]),
            Syscall::RandomNext => system::random_next(self),
            Syscall::RouletteResult => system::roulette_result(self, args[0]),
            Syscall::FsOpen | Syscall::FsClose => Err(SyscallError::Reserved),
            Syscall::FsRead => fs::read(self, args[0], args[1], args[2]),
            Syscall::FsWrite => fs::write(self, args[0], args[1], args[2]),
            Syscall::FsStat => fs::stat(self, args[0], args[1]),
            Syscall::FsMkdir => fs::mkdir(self, args[0]),
            Syscall::FsUnlink => fs::unlink(self, args[0]),
            Syscall::FsList => fs::list(self, args[0], args[1]),
            Syscall::SysInfo => system::sys_info(self, args[0]),
            // Scheduling calls never reach the handler table.
            Syscall::Yield | Syscall::Exit | Syscall::Halt => Err(SyscallError::UnknownSyscall),
        }
    }
}

/// Handles one `int 0x80` trap.
///
/// The caller holds the scheduler for the whole call and executes the
/// returned [`Disposition`] after releasing it.
pub fn handle_syscall<P, S>(
    sched: &mut Scheduler<P>,
    frame: &mut TrapFrame,
    services: &mut S,
) -> Disposition
where
    P: Platform,
    S: SyscallServices + ?Sized,
{
    if !frame.from_user() {
        warn!("Syscall from ring 0 at {:#x} rejected", frame.frame.rip);
        services.record_outcome(Outcome::Loss);
        return Disposition::Fault;
    }
    if let Err(err) = sched.capture_trap(frame) {
        warn!("Syscall rejected: {err:?}");
        services.record_outcome(Outcome::Loss);
        return Disposition::Fault;
    }
    let Some(task) = sched.current_task() else {
        return Disposition::Fault;
    };

    let number = frame.gprs.rax;
    let Some(call) = Syscall::from_number(number) else {
        info!("SYSCALL: Unknown syscall {number} from task {task}");
        return finish(sched, frame, services, Err(SyscallError::UnknownSyscall));
    };
    debug!("Task {task}: {}", call.name());

    match call {
        Syscall::Yield => {
            services.record_outcome(Outcome::Win);
            frame.set_return(0);
            sched.set_current_return(0);
            match sched.yield_now() {
                Some(plan) => Disposition::Switch(plan),
                None => {
                    sched.release_trap();
                    Disposition::Resume
                }
            }
        }
        Syscall::Exit => {
            services.record_outcome(Outcome::Win);
            match sched.exit_current(0) {
                Ok(Some(plan)) => Disposition::Switch(plan),
                Ok(None) => {
                    error!("Task {task} exited with scheduling disabled");
                    Disposition::Halt
                }
                Err(err) => {
                    warn!("Task {task}: exit failed: {err:?}");
                    Disposition::Fault
                }
            }
        }
        Syscall::Halt => {
            services.record_outcome(Outcome::Win);
            info!("Task {task} requested halt");
            Disposition::Halt
        }
        Syscall::SleepMs if sched.is_enabled() && sched.is_preemption_enabled() => {
            sleep(sched, frame, services, task)
        }
        _ => {
            let mut ctx = SyscallCtx {
                sched: &mut *sched,
                services: &mut *services,
                task,
            };
            let result = ctx.dispatch(call, frame.args());
            if result == Err(SyscallError::Service(ServiceError::WouldBlock)) {
                return restart(sched, frame, task);
            }
            finish(sched, frame, services, result)
        }
    }
}

/// Blocks the caller until its sleep has elapsed. The timer tick wakes it.
fn sleep<P, S>(
    sched: &mut Scheduler<P>,
    frame: &mut TrapFrame,
    services: &mut S,
    task: TaskId,
) -> Disposition
where
    P: Platform,
    S: SyscallServices + ?Sized,
{
    let ms = frame.args()[0].min(SLEEP_MAX_MS) as u32;
    let ticks = sched.platform().ms_to_ticks(ms);
    if ticks == 0 {
        return finish(sched, frame, services, Ok(0));
    }

    frame.set_return(0);
    sched.set_current_return(0);
    match sched.sleep_current(ticks) {
        Ok(plan) => {
            debug!("Task {task} sleeps for {ticks} ticks");
            services.record_outcome(Outcome::Win);
            Disposition::Switch(plan)
        }
        Err(err) => finish(sched, frame, services, Err(SyscallError::Scheduler(err))),
    }
}

/// Rewinds the caller onto its `int 0x80` and yields, so the call runs again
/// when the task is next scheduled. No outcome is recorded until it
/// completes.
fn restart<P: Platform>(
    sched: &mut Scheduler<P>,
    frame: &mut TrapFrame,
    task: TaskId,
) -> Disposition {
    debug!("Task {task}: syscall {} would block", frame.gprs.rax);
    frame.frame.rip = frame.frame.rip.wrapping_sub(SYSCALL_INSN_LEN);
    sched.rewind_current(SYSCALL_INSN_LEN);
    match sched.yield_now() {
        Some(plan) => Disposition::Switch(plan),
        None => {
            sched.release_trap();
            Disposition::Resume
        }
    }
}

/// Writes the result into `rax`, reports it to the ledger and resumes.
fn finish<P, S>(
    sched: &mut Scheduler<P>,
    frame: &mut TrapFrame,
    services: &mut S,
    result: SyscallResult,
) -> Disposition
where
    P: Platform,
    S: SyscallServices + ?Sized,
{
    let value = match result {
        Ok(value) => {
            services.record_outcome(Outcome::Win);
            value
        }
        Err(err) => {
            debug!("Syscall {} failed: {err:?}", frame.gprs.rax);
            services.record_outcome(Outcome::Loss);
            SYSCALL_ERROR
        }
    };
    frame.set_return(value);
    sched.release_trap();
    Disposition::Resume
}
