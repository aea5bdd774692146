//! Round-robin scheduler.
//!
//! [`Scheduler`] owns the task table, the ready queue and every piece of
//! scheduling state. Nothing here touches the CPU directly: operations that
//! switch tasks return a [`SwitchPlan`] which the arch layer executes once the
//! scheduler lock has been released.

mod context_switch;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod handoff;
mod preempt;
mod ready_queue;

#[cfg(test)]
mod tests;

use alloc::boxed::Box;
use alloc::vec::Vec;

use log::{debug, info, warn};

pub use context_switch::{Handoff, SwitchPlan};
pub use ready_queue::{QueueError, ReadyQueue};

use crate::config::SchedulerConfig;
use crate::platform::{IdleWakeup, Platform, SwitchGate};
use crate::syscall::UserAccess;
use crate::task::{
    ExitReason, FaultReason, Priority, Task, TaskContext, TaskError, TaskFlags, TaskId, TaskState,
    TaskTable, TrapFrame,
};

/// Idle polls between forced yields.
pub const IDLE_POLL_INTERVAL: u32 = 1000;

/// Scheduler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    /// `start` was called on a running scheduler.
    AlreadyStarted,
    /// `start` found neither a ready task nor an idle task.
    NoRunnableTask,
    /// The operation needs a running task and there is none.
    NoCurrentTask,
    /// A task cannot wait on itself or on the invalid id.
    InvalidTarget,
    /// The idle task cannot be queued, blocked or unblocked.
    IsIdle,
    /// `unblock` was given a task that is not blocked.
    NotBlocked,
    /// `admit` was given a task that is not ready.
    NotReady,
    /// The operation is only valid for user-mode tasks.
    NotUserTask,
    /// An idle task already exists.
    IdleExists,
    /// Scheduling is not enabled.
    Disabled,
    Task(TaskError),
    Queue(QueueError),
}

impl From<TaskError> for SchedulerError {
    fn from(err: TaskError) -> Self {
        SchedulerError::Task(err)
    }
}

impl From<QueueError> for SchedulerError {
    fn from(err: QueueError) -> Self {
        SchedulerError::Queue(err)
    }
}

/// Cumulative scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub context_switches: u64,
    /// Voluntary yields.
    pub yields: u64,
    pub ticks: u64,
    /// Quantum expiries that requested a reschedule.
    pub preemptions: u64,
    pub schedule_calls: u64,
    /// Times the idle task was picked.
    pub idle_activations: u64,
    /// Waiters that found the ready queue full when their target died.
    pub deferred_wakes: u64,
    /// Tasks in the ready queue when the snapshot was taken.
    pub ready_tasks: u32,
}

/// What the idle loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Give other tasks a chance to run.
    Yield,
    /// Wait for the next interrupt.
    Halt,
    /// Only the idle task is left; the scheduler has been disabled.
    Exit,
}

pub struct Scheduler<P: Platform> {
    platform: P,
    tasks: TaskTable,
    ready: ReadyQueue,
    /// Slot of the task that owns the CPU.
    current: Option<usize>,
    idle: Option<TaskId>,

    enabled: bool,
    started: bool,
    default_quantum: u32,
    preemption_default: bool,
    preemption_enabled: bool,
    reschedule_pending: bool,
    in_schedule: bool,

    /// Self-terminated task still waiting for its resources to be released.
    pending_reclaim: Option<usize>,
    /// Some waiter could not be queued when its target died.
    deferred_wakes: bool,
    /// Context `start` was called from; resumed when nothing can run.
    exit_context: Box<TaskContext>,

    gate: Option<SwitchGate>,
    idle_wakeup: Option<IdleWakeup>,
    idle_polls: u32,
    stats: SchedulerStats,
}

impl<P: Platform> Scheduler<P> {
    pub fn new(platform: P, config: SchedulerConfig) -> Self {
        let queue_capacity = config.queue_capacity.min(config.capacity);
        Self {
            platform,
            tasks: TaskTable::new(&config),
            ready: ReadyQueue::new(queue_capacity),
            current: None,
            idle: None,
            enabled: false,
            started: false,
            default_quantum: config.default_quantum,
            preemption_default: config.preemption,
            preemption_enabled: false,
            reschedule_pending: false,
            in_schedule: false,
            pending_reclaim: None,
            deferred_wakes: false,
            exit_context: Box::default(),
            gate: None,
            idle_wakeup: None,
            idle_polls: 0,
            stats: SchedulerStats::default(),
        }
    }

    // =========================================================================
    // Task lifecycle
    // =========================================================================

    /// Creates a READY task without queueing it.
    pub fn create_task(
        &mut self,
        name: &str,
        entry: u64,
        arg: u64,
        priority: Priority,
        flags: TaskFlags,
    ) -> Result<TaskId, SchedulerError> {
        Ok(self
            .tasks
            .create(&mut self.platform, name, entry, arg, priority, flags)?)
    }

    /// Links a READY task into the ready queue.
    pub fn admit(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        if Some(id) == self.idle {
            return Err(SchedulerError::IsIdle);
        }
        let slot = self.tasks.slot_of(id).ok_or(TaskError::NotFound)?;
        if self.tasks.slot(slot).map(Task::state) != Some(TaskState::Ready) {
            return Err(SchedulerError::NotReady);
        }
        self.ready.enqueue(&mut self.tasks, slot)?;
        Ok(())
    }

    /// Creates a task and queues it. The task is torn down again if the
    /// queue is full.
    pub fn spawn(
        &mut self,
        name: &str,
        entry: u64,
        arg: u64,
        priority: Priority,
        flags: TaskFlags,
    ) -> Result<TaskId, SchedulerError> {
        let id = self.create_task(name, entry, arg, priority, flags)?;
        if let Err(err) = self.admit(id) {
            warn!("spawn: could not queue task {id}: {err:?}");
            let _ = self.terminate(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Creates the idle task. It is parked BLOCKED until it is picked.
    pub fn create_idle_task(&mut self, entry: u64) -> Result<TaskId, SchedulerError> {
        if self.idle_task().is_some() {
            return Err(SchedulerError::IdleExists);
        }
        let id = self.tasks.create(
            &mut self.platform,
            "idle",
            entry,
            0,
            Priority::Idle,
            TaskFlags::KERNEL_MODE | TaskFlags::SYSTEM,
        )?;
        self.tasks.set_state(id, TaskState::Blocked)?;
        self.idle = Some(id);
        debug!("Idle task is {id}");
        Ok(id)
    }

    /// Terminates `id`, or the running task for [`TaskId::CURRENT`].
    ///
    /// Waiters are woken. The running task keeps its stack and slot until
    /// the scheduler has switched away from it.
    pub fn terminate(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        let slot = if id == TaskId::CURRENT {
            self.current.ok_or(SchedulerError::NoCurrentTask)?
        } else {
            self.tasks.slot_of(id).ok_or(TaskError::NotFound)?
        };
        let now = self.platform.ticks();

        let Some(task) = self.tasks.slot_mut(slot) else {
            return Err(TaskError::NotFound.into());
        };
        let id = task.id();
        let state = task.state();
        if state == TaskState::Terminated {
            return Err(TaskError::AlreadyTerminated.into());
        }
        if state == TaskState::Running {
            task.accounting.runtime += now.saturating_sub(task.accounting.last_scheduled);
        }
        if task.exit_reason == ExitReason::None {
            task.exit_reason = ExitReason::Kernel;
        }
        let queued = task.queued;

        if queued {
            self.ready.remove(&mut self.tasks, slot)?;
        }
        self.tasks.set_state(id, TaskState::Terminated)?;
        self.tasks.record_exit(slot);
        if let Some(task) = self.tasks.slot(slot) {
            info!(
                "Task {id} '{}' terminated ({:?}, code {})",
                task.name(),
                task.exit_reason(),
                task.exit_code()
            );
        }

        self.wake_waiters(id);

        if Some(slot) != self.current {
            self.tasks.release(slot, &mut self.platform)?;
        }
        if Some(id) == self.idle {
            warn!("Idle task terminated");
        }
        Ok(())
    }

    /// Readies every task blocked on `target`.
    ///
    /// A waiter that does not fit in the ready queue stays BLOCKED on the
    /// dead target and is woken by [`Self::retry_deferred_wakes`].
    fn wake_waiters(&mut self, target: TaskId) {
        let waiters: Vec<usize> = self
            .tasks
            .occupied_slots()
            .filter(|&slot| {
                self.tasks.slot(slot).is_some_and(|task| {
                    task.waiting_on == Some(target) && task.state() == TaskState::Blocked
                })
            })
            .collect();

        for slot in waiters {
            match self.make_ready(slot) {
                Ok(id) => debug!("Task {id} woken by exit of {target}"),
                Err(err) => {
                    warn!("Waiter in slot {slot} of {target} deferred: {err:?}");
                    self.deferred_wakes = true;
                    self.stats.deferred_wakes += 1;
                }
            }
        }
    }

    /// Moves a BLOCKED task to the ready queue, clearing what it waited on.
    /// On failure the task stays BLOCKED and untouched.
    fn make_ready(&mut self, slot: usize) -> Result<TaskId, SchedulerError> {
        let id = self.tasks.slot(slot).map(Task::id).ok_or(TaskError::NotFound)?;
        self.tasks.set_state(id, TaskState::Ready)?;
        if let Err(err) = self.ready.enqueue(&mut self.tasks, slot) {
            let _ = self.tasks.set_state(id, TaskState::Blocked);
            return Err(err.into());
        }
        if let Some(task) = self.tasks.slot_mut(slot) {
            task.waiting_on = None;
            task.wake_at = None;
        }
        Ok(id)
    }

    /// Wakes waiters whose target died while the ready queue was full.
    fn retry_deferred_wakes(&mut self) {
        if !self.deferred_wakes {
            return;
        }
        let orphans: Vec<usize> = self
            .tasks
            .occupied_slots()
            .filter(|&slot| {
                self.tasks.slot(slot).is_some_and(|task| {
                    task.state() == TaskState::Blocked
                        && task.waiting_on.is_some_and(|target| !self.is_alive(target))
                })
            })
            .collect();

        let mut remaining = false;
        for slot in orphans {
            if self.make_ready(slot).is_err() {
                remaining = true;
            }
        }
        self.deferred_wakes = remaining;
    }

    fn is_alive(&self, id: TaskId) -> bool {
        self.tasks
            .get(id)
            .is_some_and(|task| task.state() != TaskState::Terminated)
    }

    /// Releases a self-terminated task once it is no longer executing.
    pub fn reap(&mut self) {
        let Some(slot) = self.pending_reclaim else {
            return;
        };
        if Some(slot) == self.current {
            return;
        }
        self.pending_reclaim = None;
        if let Err(err) = self.tasks.release(slot, &mut self.platform) {
            warn!("reap: slot {slot}: {err:?}");
        }
    }

    /// Terminates every task except the running one.
    pub fn shutdown_all(&mut self) {
        let victims: Vec<TaskId> = self
            .tasks
            .iter_active()
            .map(Task::id)
            .filter(|&id| self.current_task() != Some(id))
            .collect();

        for id in victims {
            if let Err(err) = self.terminate(id) {
                warn!("shutdown: task {id}: {err:?}");
            }
        }
    }

    // =========================================================================
    // Scheduler control
    // =========================================================================

    /// Enables scheduling and returns the first switch: the head of the ready
    /// queue, else the idle task.
    ///
    /// The caller's context is saved into the exit context, which is resumed
    /// if every task, idle included, goes away.
    pub fn start(&mut self) -> Result<SwitchPlan, SchedulerError> {
        if self.enabled {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.retry_deferred_wakes();
        let next = match self.ready.dequeue(&mut self.tasks) {
            Some(slot) => {
                self.retry_deferred_wakes();
                slot
            }
            None => self.idle_slot().ok_or(SchedulerError::NoRunnableTask)?,
        };

        self.enabled = true;
        self.started = true;
        self.set_preemption_enabled(self.preemption_default);
        info!(
            "Scheduler started (preemption {})",
            if self.preemption_enabled { "on" } else { "off" }
        );

        self.enter(next);
        let mut plan = self.prepare_switch(None, next);
        plan.save = Some(core::ptr::NonNull::from(&mut *self.exit_context));
        Ok(plan)
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    /// Disables scheduling and returns to the context `start` was called
    /// from. The running task is parked BLOCKED with its context saved.
    pub fn return_to_start(&mut self) -> Option<SwitchPlan> {
        self.started.then(|| self.exit_plan())
    }

    /// Stops scheduling and forgets every task but the caller, which is
    /// parked BLOCKED so a later `start` never sees two running tasks.
    pub fn shutdown(&mut self) {
        self.stop();
        self.shutdown_all();
        self.ready.clear(&mut self.tasks);
        self.reap();
        if let Some(id) = self.current_task()
            && self.tasks.get(id).map(Task::state) == Some(TaskState::Running)
            && let Err(err) = self.tasks.set_state(id, TaskState::Blocked)
        {
            warn!("shutdown: could not park task {id}: {err:?}");
        }
        self.current = None;
        self.idle = None;
        self.reschedule_pending = false;
        info!("Scheduler shut down");
    }

    /// Switches timer preemption on or off. Turning it off drops any pending
    /// reschedule.
    pub fn set_preemption_enabled(&mut self, enabled: bool) {
        self.preemption_enabled = enabled;
        if !enabled {
            self.reschedule_pending = false;
        }
        self.platform.set_tick_irq(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_preemption_enabled(&self) -> bool {
        self.preemption_enabled
    }

    /// Installs the policy hook consulted on every context switch.
    pub fn set_switch_gate(&mut self, gate: Option<SwitchGate>) {
        self.gate = gate;
    }

    pub fn set_idle_wakeup(&mut self, wakeup: Option<IdleWakeup>) {
        self.idle_wakeup = wakeup;
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn current_task(&self) -> Option<TaskId> {
        self.current
            .and_then(|slot| self.tasks.slot(slot))
            .map(Task::id)
    }

    pub fn idle_task(&self) -> Option<TaskId> {
        self.idle.filter(|&id| self.tasks.get(id).is_some())
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> &TaskTable {
        &self.tasks
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            ready_tasks: self.ready.len() as u32,
            ..self.stats
        }
    }

    pub fn default_quantum(&self) -> u32 {
        self.default_quantum
    }

    /// Ids in ready-queue order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        self.ready
            .iter(&self.tasks)
            .filter_map(|slot| self.tasks.slot(slot))
            .map(Task::id)
            .collect()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    fn current_task_mut(&mut self) -> Option<&mut Task> {
        let slot = self.current?;
        self.tasks.slot_mut(slot)
    }

    fn idle_slot(&self) -> Option<usize> {
        let slot = self.tasks.slot_of(self.idle?)?;
        let alive = self
            .tasks
            .slot(slot)
            .is_some_and(|task| task.state() != TaskState::Terminated);
        alive.then_some(slot)
    }

    fn is_idle_slot(&self, slot: usize) -> bool {
        self.idle.is_some() && self.tasks.slot(slot).map(Task::id) == self.idle
    }

    // =========================================================================
    // Scheduling
    // =========================================================================

    /// Picks the next task and prepares the switch to it.
    ///
    /// Returns `None` when nothing changes hands: the scheduler is disabled,
    /// already inside `schedule`, the running task keeps the CPU, or the ready
    /// queue is full (backpressure).
    pub fn schedule(&mut self) -> Option<SwitchPlan> {
        if !self.enabled || self.in_schedule {
            return None;
        }
        self.in_schedule = true;
        let plan = self.pick_next();
        self.in_schedule = false;
        plan
    }

    fn pick_next(&mut self) -> Option<SwitchPlan> {
        self.stats.schedule_calls += 1;
        self.reap();

        let current = self.current;
        if let Some(slot) = current
            && !self.is_idle_slot(slot)
            && self.tasks.slot(slot).map(Task::state) == Some(TaskState::Running)
        {
            if self.ready.len() >= self.ready.capacity() {
                warn!("Ready queue full; task in slot {slot} keeps running");
                if let Some(task) = self.tasks.slot_mut(slot) {
                    task.reset_quantum();
                    task.context_from_trap = false;
                }
                return None;
            }

            if let Some(task) = self.tasks.slot_mut(slot) {
                let _ = task.set_state(TaskState::Ready);
                task.reset_quantum();
            }
            if let Err(err) = self.ready.enqueue(&mut self.tasks, slot) {
                warn!("schedule: could not requeue slot {slot}: {err:?}");
                if let Some(task) = self.tasks.slot_mut(slot) {
                    let _ = task.set_state(TaskState::Running);
                }
                return None;
            }
        }

        self.retry_deferred_wakes();
        let next = match self.ready.dequeue(&mut self.tasks) {
            Some(slot) => {
                self.retry_deferred_wakes();
                slot
            }
            None => match self.idle_slot() {
                Some(slot) => slot,
                None => {
                    warn!("No runnable task and no idle task; leaving the scheduler");
                    return Some(self.exit_plan());
                }
            },
        };

        if Some(next) == current {
            if let Some(task) = self.tasks.slot_mut(next) {
                let _ = task.set_state(TaskState::Running);
                task.context_from_trap = false;
            }
            return None;
        }

        self.enter(next);
        Some(self.prepare_switch(current, next))
    }

    /// Moves the chosen task to RUNNING.
    fn enter(&mut self, slot: usize) {
        let idle = self.is_idle_slot(slot);
        let Some(task) = self.tasks.slot_mut(slot) else {
            return;
        };
        if idle {
            if task.state() == TaskState::Blocked {
                let _ = task.set_state(TaskState::Ready);
            }
            self.stats.idle_activations += 1;
        }
        if let Err(err) = task.set_state(TaskState::Running) {
            warn!("Task {}: cannot run: {err:?}", task.id());
        }
    }

    /// Gives up the CPU voluntarily.
    pub fn yield_now(&mut self) -> Option<SwitchPlan> {
        self.stats.yields += 1;
        if let Some(task) = self.current_task_mut() {
            task.accounting.yields += 1;
        }
        self.schedule()
    }

    /// Blocks the running task and switches away from it.
    pub fn block_current(&mut self) -> Result<Option<SwitchPlan>, SchedulerError> {
        let slot = self.current.ok_or(SchedulerError::NoCurrentTask)?;
        if self.is_idle_slot(slot) {
            return Err(SchedulerError::IsIdle);
        }
        if self.ready.contains(&self.tasks, slot) {
            self.ready.remove(&mut self.tasks, slot)?;
        }
        let id = self.tasks.slot(slot).map(Task::id).ok_or(TaskError::NotFound)?;
        self.tasks.set_state(id, TaskState::Blocked)?;
        Ok(self.schedule())
    }

    /// Blocks the running task until `ticks` timer ticks have passed.
    pub fn sleep_current(&mut self, ticks: u64) -> Result<SwitchPlan, SchedulerError> {
        if !self.enabled {
            return Err(SchedulerError::Disabled);
        }
        let wake_at = self.platform.ticks().saturating_add(ticks);
        let task = self.current_task_mut().ok_or(SchedulerError::NoCurrentTask)?;
        task.wake_at = Some(wake_at);

        match self.block_current() {
            // An enabled scheduler always switches away from a blocked task.
            Ok(plan) => plan.ok_or(SchedulerError::Disabled),
            Err(err) => {
                if let Some(task) = self.current_task_mut() {
                    task.wake_at = None;
                }
                Err(err)
            }
        }
    }

    /// Blocks the running task until `target` terminates. Returns at once if
    /// `target` is already gone.
    pub fn wait_for(&mut self, target: TaskId) -> Result<Option<SwitchPlan>, SchedulerError> {
        let current = self.current_task().ok_or(SchedulerError::NoCurrentTask)?;
        if target == current || target == TaskId::INVALID || target == TaskId::CURRENT {
            return Err(SchedulerError::InvalidTarget);
        }
        let alive = self
            .tasks
            .get(target)
            .is_some_and(|task| task.state() != TaskState::Terminated);
        if !alive {
            return Ok(None);
        }

        if let Some(task) = self.current_task_mut() {
            task.waiting_on = Some(target);
        }
        let plan = self.block_current();
        if plan.is_err()
            && let Some(task) = self.current_task_mut()
        {
            task.waiting_on = None;
        }
        plan
    }

    /// Moves a BLOCKED task back to the ready queue. READY tasks are left
    /// alone.
    pub fn unblock(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        if Some(id) == self.idle {
            return Err(SchedulerError::IsIdle);
        }
        let slot = self.tasks.slot_of(id).ok_or(TaskError::NotFound)?;
        match self.tasks.slot(slot).map(Task::state) {
            Some(TaskState::Ready) => return Ok(()),
            Some(TaskState::Blocked) => {}
            _ => return Err(SchedulerError::NotBlocked),
        }
        self.make_ready(slot)?;
        Ok(())
    }

    /// Terminates the running task with a normal exit and switches away.
    pub fn exit_current(&mut self, code: i64) -> Result<Option<SwitchPlan>, SchedulerError> {
        let task = self.current_task_mut().ok_or(SchedulerError::NoCurrentTask)?;
        task.exit_reason = ExitReason::Normal;
        task.exit_code = code;
        self.terminate(TaskId::CURRENT)?;
        Ok(self.schedule())
    }

    /// Kills the running user task after a fault raised at ring 3 and asks
    /// for a reschedule.
    pub fn fault_current(&mut self, reason: FaultReason) -> Result<TaskId, SchedulerError> {
        let task = self.current_task_mut().ok_or(SchedulerError::NoCurrentTask)?;
        if !task.is_user() {
            return Err(SchedulerError::NotUserTask);
        }
        let id = task.id();
        task.exit_reason = ExitReason::UserFault;
        task.fault_reason = reason;
        task.exit_code = -1;
        // The trap snapshot is worthless now.
        task.context_from_trap = false;
        warn!("Task {id} killed by {reason:?}");

        self.terminate(TaskId::CURRENT)?;
        self.request_reschedule();
        Ok(id)
    }

    // =========================================================================
    // Trap integration
    // =========================================================================

    /// Copies a user trap frame into the running task's context.
    pub fn capture_trap(&mut self, frame: &TrapFrame) -> Result<(), SchedulerError> {
        let user_data = self.platform.selectors().user_data;
        let task = self.current_task_mut().ok_or(SchedulerError::NoCurrentTask)?;
        if !task.is_user() {
            return Err(SchedulerError::NotUserTask);
        }
        task.context = TaskContext::from_trap(frame, user_data, task.context.cr3);
        task.context_from_trap = true;
        Ok(())
    }

    /// Drops the trap-snapshot marker when the trap returns normally.
    pub fn release_trap(&mut self) {
        if let Some(task) = self.current_task_mut() {
            task.context_from_trap = false;
        }
    }

    /// Copy access to the running user task's memory.
    pub fn user_access(&mut self) -> Option<UserAccess<'_, P>> {
        let slot = self.current?;
        let space = self.tasks.slot(slot)?.mode().address_space()?;
        Some(UserAccess::new(&mut self.platform, space))
    }

    /// Moves the running task's saved `rip` back by `len` bytes so the
    /// trapping instruction runs again when the task resumes.
    pub fn rewind_current(&mut self, len: u64) {
        if let Some(task) = self.current_task_mut() {
            task.context.rip = task.context.rip.wrapping_sub(len);
        }
    }

    /// Sets the value the running task sees in `rax` when its saved context
    /// is resumed.
    pub fn set_current_return(&mut self, value: u64) {
        if let Some(task) = self.current_task_mut() {
            task.context.rax = value;
        }
    }

    // =========================================================================
    // Idle
    // =========================================================================

    /// One iteration of the idle loop.
    pub fn idle_poll(&mut self) -> IdleAction {
        self.reap();
        self.retry_deferred_wakes();

        if !self.ready.is_empty() || self.idle_wakeup.is_some_and(|wakeup| wakeup()) {
            self.idle_polls = 0;
            return IdleAction::Yield;
        }

        self.idle_polls += 1;
        if self.idle_polls < IDLE_POLL_INTERVAL {
            return IdleAction::Halt;
        }
        self.idle_polls = 0;

        if self.tasks.iter_active().count() <= 1 {
            info!("Only the idle task is left; stopping the scheduler");
            self.enabled = false;
            return IdleAction::Exit;
        }
        IdleAction::Yield
    }
}
