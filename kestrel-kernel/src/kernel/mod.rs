//! Global owner of the scheduler on real hardware.
//!
//! The [`Scheduler`] itself never touches the CPU. This module keeps the one
//! instance behind a spinlock, turns traps into scheduler calls and executes
//! the returned [`SwitchPlan`] once the lock has been dropped.

mod hardware;

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU64, Ordering};

use log::{debug, error, info, warn};
use spinning_top::Spinlock;
use x86_64::instructions::{self, interrupts};
use x86_64::registers::control::Cr2;

pub use hardware::{HardwarePlatform, SerialServices};

use crate::config::SchedulerConfig;
use crate::platform::AddressSpaceProvider;
use crate::qemu::{QemuExitCode, exit_qemu};
use crate::scheduler::{IdleAction, Scheduler, SchedulerError, SwitchPlan, handoff};
use crate::syscall::{Disposition, SyscallServices, gdt, handle_syscall};
use crate::task::{FaultReason, Priority, TaskFlags, TaskId, TrapFrame};
use crate::{interrupts as idt, time, timer};

use kestrel_abi::SYSCALL_VECTOR;

const DOUBLE_FAULT_VECTOR: u64 = 8;
const PAGE_FAULT_VECTOR: u64 = 14;

/// Ticks whose interrupt found the scheduler locked.
static MISSED_TICKS: AtomicU64 = AtomicU64::new(0);

pub(crate) static SCHEDULER: Spinlock<Option<Scheduler<HardwarePlatform>>> = Spinlock::new(None);
static SERVICES: Spinlock<Option<Box<dyn SyscallServices + Send>>> = Spinlock::new(None);

/// Brings up segmentation, the IDT and the tick source, then installs the
/// scheduler. The timer stays masked until preemption is switched on.
pub fn init(
    spaces: Box<dyn AddressSpaceProvider + Send>,
    services: Box<dyn SyscallServices + Send>,
    config: SchedulerConfig,
) {
    gdt::init();
    idt::init();
    timer::init(timer::DEFAULT_TICK_HZ);

    let mut scheduler = Scheduler::new(HardwarePlatform::new(spaces), config);
    scheduler.set_idle_wakeup(Some(crate::logging::serial::has_input));

    interrupts::without_interrupts(|| {
        *SCHEDULER.lock() = Some(scheduler);
        *SERVICES.lock() = Some(services);
    });
    info!("Kernel task core initialized");
}

/// Runs `f` on the scheduler with interrupts off and executes the plan it
/// returns after the lock is released.
fn switch_with<R>(f: impl FnOnce(&mut Scheduler<HardwarePlatform>) -> (R, Option<SwitchPlan>)) -> R {
    interrupts::without_interrupts(|| {
        let (result, plan) = {
            let mut guard = SCHEDULER.lock();
            let Some(scheduler) = guard.as_mut() else {
                panic!("scheduler used before kernel::init");
            };
            f(scheduler)
        };
        if let Some(plan) = plan {
            unsafe { handoff::execute(plan) };
        }
        result
    })
}

/// Runs `f` on the scheduler with interrupts off.
pub fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler<HardwarePlatform>) -> R) -> R {
    switch_with(|scheduler| (f(scheduler), None))
}

pub fn spawn(
    name: &str,
    entry: u64,
    arg: u64,
    priority: Priority,
    flags: TaskFlags,
) -> Result<TaskId, SchedulerError> {
    with_scheduler(|s| s.spawn(name, entry, arg, priority, flags))
}

/// Spawns a ring 0 task running `entry(arg)`.
pub fn spawn_kernel(
    name: &str,
    entry: extern "sysv64" fn(u64),
    arg: u64,
    priority: Priority,
) -> Result<TaskId, SchedulerError> {
    spawn(name, entry as usize as u64, arg, priority, TaskFlags::KERNEL_MODE)
}

/// Creates the idle task running [`idle_main`].
pub fn create_idle_task() -> Result<TaskId, SchedulerError> {
    let entry: extern "sysv64" fn(u64) = idle_main;
    with_scheduler(|s| s.create_idle_task(entry as usize as u64))
}

/// Starts scheduling. Returns once every task is gone and the idle task has
/// handed the CPU back.
pub fn run() -> Result<(), SchedulerError> {
    switch_with(|s| match s.start() {
        Ok(plan) => (Ok(()), Some(plan)),
        Err(err) => (Err(err), None),
    })?;
    info!("Scheduler returned to the boot context");
    Ok(())
}

pub fn yield_now() {
    switch_with(|s| ((), s.yield_now()));
}

pub fn block_current() -> Result<(), SchedulerError> {
    switch_with(|s| match s.block_current() {
        Ok(plan) => (Ok(()), plan),
        Err(err) => (Err(err), None),
    })
}

pub fn wait_for(target: TaskId) -> Result<(), SchedulerError> {
    switch_with(|s| match s.wait_for(target) {
        Ok(plan) => (Ok(()), plan),
        Err(err) => (Err(err), None),
    })
}

pub fn unblock(id: TaskId) -> Result<(), SchedulerError> {
    with_scheduler(|s| s.unblock(id))
}

/// Terminates `id`. Terminating the running task switches away from it.
pub fn terminate(id: TaskId) -> Result<(), SchedulerError> {
    switch_with(|s| {
        let is_current = id == TaskId::CURRENT || s.current_task() == Some(id);
        match s.terminate(id) {
            Ok(()) => (Ok(()), if is_current { s.schedule() } else { None }),
            Err(err) => (Err(err), None),
        }
    })
}

/// Ends the running task. Never returns to it.
pub fn exit(code: i64) -> ! {
    switch_with(|s| match s.exit_current(code) {
        Ok(plan) => ((), plan),
        Err(err) => {
            error!("exit: {err:?}");
            ((), None)
        }
    });
    // Reached only with scheduling disabled.
    halt()
}

pub fn set_preemption_enabled(enabled: bool) {
    with_scheduler(|s| s.set_preemption_enabled(enabled));
}

pub fn current_task() -> Option<TaskId> {
    with_scheduler(|s| s.current_task())
}

/// Entry of every kernel task: `rdi` holds the entry point, `rsi` its
/// argument.
pub(crate) extern "sysv64" fn kernel_task_entry(entry: u64, arg: u64) -> ! {
    let entry: extern "sysv64" fn(u64) = unsafe { core::mem::transmute(entry as usize) };
    entry(arg);
    exit(0)
}

extern "sysv64" fn idle_main(_arg: u64) {
    loop {
        let action = with_scheduler(|s| s.idle_poll());
        match action {
            IdleAction::Yield => yield_now(),
            IdleAction::Halt => interrupts::enable_and_hlt(),
            IdleAction::Exit => {
                interrupts::disable();
                switch_with(|s| ((), s.return_to_start()));
            }
        }
    }
}

fn halt() -> ! {
    interrupts::disable();
    loop {
        instructions::hlt();
    }
}

/// Called by the trap stubs with the frame they built.
pub(crate) fn handle_trap(frame: &mut TrapFrame) {
    match frame.vector {
        v if v == u64::from(timer::TIMER_VECTOR) => handle_timer(frame),
        v if v == u64::from(SYSCALL_VECTOR) => handle_syscall_trap(frame),
        _ => handle_exception(frame),
    }
}

fn handle_timer(frame: &TrapFrame) {
    time::tick();
    timer::end_of_interrupt();

    // Whoever holds the lock is mid-update; the tick is accounted later.
    let plan = {
        let Some(mut guard) = SCHEDULER.try_lock() else {
            MISSED_TICKS.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let Some(scheduler) = guard.as_mut() else {
            return;
        };
        let missed = MISSED_TICKS.swap(0, Ordering::Relaxed);
        if missed > 0 {
            scheduler.record_missed_ticks(missed);
        }
        scheduler.timer_tick();
        if !scheduler.is_reschedule_pending() {
            return;
        }
        if frame.from_user() && scheduler.capture_trap(frame).is_err() {
            return;
        }
        let plan = scheduler.handle_post_irq();
        if plan.is_none() {
            scheduler.release_trap();
        }
        plan
    };
    if let Some(plan) = plan {
        unsafe { handoff::execute(plan) };
    }
}

fn handle_syscall_trap(frame: &mut TrapFrame) {
    let disposition = {
        let mut guard = SCHEDULER.lock();
        let mut services = SERVICES.lock();
        let (Some(scheduler), Some(services)) = (guard.as_mut(), services.as_mut()) else {
            return;
        };
        let disposition = handle_syscall(scheduler, frame, services.as_mut());
        if disposition == Disposition::Halt {
            scheduler.shutdown();
        }
        disposition
    };

    match disposition {
        Disposition::Resume | Disposition::Fault => {}
        Disposition::Switch(plan) => unsafe { handoff::execute(plan) },
        Disposition::Halt => {
            info!("System halt requested");
            exit_qemu(QemuExitCode::Success);
        }
    }
}

fn handle_exception(frame: &TrapFrame) {
    let vector = frame.vector;
    if vector == DOUBLE_FAULT_VECTOR || !frame.from_user() {
        let fault_address = (vector == PAGE_FAULT_VECTOR).then(Cr2::read_raw);
        panic!(
            "Exception {vector} in kernel mode at {:#x} (error {:#x}, cr2 {:x?})\n{frame:#x?}",
            frame.frame.rip, frame.error_code, fault_address
        );
    }

    let reason = FaultReason::from_vector(vector).unwrap_or(FaultReason::GeneralProtection);
    debug!("User exception {vector} at {:#x}", frame.frame.rip);

    let plan = {
        let mut guard = SCHEDULER.lock();
        let Some(scheduler) = guard.as_mut() else {
            panic!("user exception {vector} before kernel::init");
        };
        if let Err(err) = scheduler.fault_current(reason) {
            warn!("Could not kill faulting task: {err:?}");
        }
        scheduler.handle_post_irq().or_else(|| scheduler.schedule())
    };

    match plan {
        Some(plan) => unsafe { handoff::execute(plan) },
        None => {
            error!("Nothing left to run after user fault");
            halt();
        }
    }
}
