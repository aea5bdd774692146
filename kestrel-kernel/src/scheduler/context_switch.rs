//! Privilege-aware handoff between two tasks.
//!
//! [`Scheduler::prepare_switch`] does all the bookkeeping under the scheduler
//! lock and returns a [`SwitchPlan`]. The arch layer executes the plan after
//! the lock is dropped, with interrupts still disabled.

use core::ptr::NonNull;

use log::{debug, error};

use super::Scheduler;
use crate::platform::{GateVerdict, Platform};
use crate::task::{TaskContext, TaskState};

/// How the incoming context is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// Same-privilege jump to the saved `rip` on the saved `rsp`.
    Jump,
    /// `iretq` into ring 3 with the saved user selectors.
    EnterUser,
}

/// A one-way switch, ready to execute.
///
/// The pointers refer to contexts owned by the scheduler and stay valid until
/// the next call into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchPlan {
    /// Where to store the outgoing task's callee state, if it needs saving.
    pub save: Option<NonNull<TaskContext>>,
    pub load: NonNull<TaskContext>,
    pub kind: Handoff,
}

impl<P: Platform> Scheduler<P> {
    /// Switches bookkeeping from `from` to `to` and installs the incoming
    /// task's address space and entry stack.
    pub(super) fn prepare_switch(&mut self, from: Option<usize>, to: usize) -> SwitchPlan {
        let now = self.platform.ticks();
        let idle = self.idle;

        let mut save = None;
        if let Some(from) = from.filter(|&from| from != to)
            && let Some(task) = self.tasks.slot_mut(from)
        {
            let state = task.state();
            if state == TaskState::Terminated {
                // Still executing on its stack; released once we are off it.
                self.pending_reclaim = Some(from);
            } else {
                task.accounting.runtime += now.saturating_sub(task.accounting.last_scheduled);
                if state == TaskState::Running && Some(task.id()) == idle {
                    let _ = task.set_state(TaskState::Blocked);
                }
            }

            if task.context_from_trap {
                task.context_from_trap = false;
            } else if state != TaskState::Terminated {
                save = Some(task.context_ptr());
            }
        }

        self.current = Some(to);
        self.stats.context_switches += 1;
        self.tasks.note_switch();

        let Some(task) = self.tasks.slot_mut(to) else {
            error!("prepare_switch: slot {to} is empty");
            self.platform.fatal("switch target vanished");
        };
        task.reset_quantum();
        task.accounting.last_scheduled = now;
        task.accounting.switches += 1;

        let root = match task.mode.address_space() {
            Some(space) => match self.platform.resolve_root(space) {
                Some(root) => root,
                None => {
                    error!("Task {}: address space {space:?} has no root", task.id());
                    self.platform.fatal("unresolvable user address space");
                }
            },
            None => self.platform.kernel_root(),
        };
        task.context.cr3 = root.as_u64();

        let kind = if task.is_user() && task.context.resumes_in_user_mode() {
            Handoff::EnterUser
        } else {
            Handoff::Jump
        };
        let entry_stack = task.mode.entry_stack_top();
        let load = task.context_ptr();
        debug!("Switching to task {} ({kind:?})", task.id());

        self.platform.install_address_space(root);

        if let Some(gate) = self.gate
            && gate() == GateVerdict::Fatal
        {
            error!("Switch gate reported a fatal condition");
            self.platform.fatal("switch gate");
        }

        let entry_stack = match entry_stack {
            Some(top) => top,
            None => self.platform.default_entry_stack(),
        };
        self.platform.set_entry_stack(entry_stack);

        SwitchPlan { save, load, kind }
    }

    /// Plan back to the context `start` was called from. Used when nothing
    /// is runnable and the idle task is gone.
    pub(super) fn exit_plan(&mut self) -> SwitchPlan {
        self.enabled = false;

        let mut save = None;
        if let Some(from) = self.current.take()
            && let Some(task) = self.tasks.slot_mut(from)
        {
            let state = task.state();
            if state == TaskState::Running {
                let _ = task.set_state(TaskState::Blocked);
            }
            if state == TaskState::Terminated {
                self.pending_reclaim = Some(from);
            } else if task.context_from_trap {
                task.context_from_trap = false;
            } else {
                save = Some(task.context_ptr());
            }
        }

        if !self.started {
            self.platform.fatal("idle task lost with no exit context");
        }

        let root = self.platform.kernel_root();
        self.platform.install_address_space(root);
        let stack = self.platform.default_entry_stack();
        self.platform.set_entry_stack(stack);

        SwitchPlan {
            save,
            load: NonNull::from(&mut *self.exit_context),
            kind: Handoff::Jump,
        }
    }
}
