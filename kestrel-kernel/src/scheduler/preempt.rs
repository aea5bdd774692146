//! Timer-driven preemption.
//!
//! A tick only marks a reschedule as pending. The switch happens later, in
//! [`Scheduler::handle_post_irq`], once the interrupt has been acknowledged.

use alloc::vec::Vec;

use log::{debug, trace};

use super::{SwitchPlan, Scheduler};
use crate::platform::Platform;
use crate::task::TaskState;

impl<P: Platform> Scheduler<P> {
    /// Accounts one timer tick against the running task.
    pub fn timer_tick(&mut self) {
        self.stats.ticks += 1;
        self.wake_sleepers();

        if !self.enabled || !self.preemption_enabled || self.in_schedule {
            return;
        }
        let Some(slot) = self.current else {
            return;
        };
        let ready_waiting = !self.ready.is_empty();

        if self.is_idle_slot(slot) {
            if ready_waiting {
                self.reschedule_pending = true;
            }
            return;
        }

        let Some(task) = self.tasks.slot_mut(slot) else {
            return;
        };
        if !task.is_preemptible() {
            return;
        }

        let accounting = &mut task.accounting;
        accounting.quantum_remaining = accounting.quantum_remaining.saturating_sub(1);
        if accounting.quantum_remaining > 0 {
            return;
        }
        if !ready_waiting {
            // Nothing to switch to; start a fresh quantum.
            accounting.quantum_remaining = accounting.quantum;
            return;
        }

        trace!("Task {} quantum expired", task.id());
        self.reschedule_pending = true;
        self.stats.preemptions += 1;
    }

    /// Counts ticks whose interrupt found the scheduler busy.
    pub fn record_missed_ticks(&mut self, missed: u64) {
        self.stats.ticks += missed;
    }

    /// Readies every sleeping task whose wake tick has passed. A task that
    /// does not fit in the ready queue is retried on the next tick.
    fn wake_sleepers(&mut self) {
        let now = self.platform.ticks();
        let due: Vec<usize> = self
            .tasks
            .occupied_slots()
            .filter(|&slot| {
                self.tasks.slot(slot).is_some_and(|task| {
                    task.state() == TaskState::Blocked
                        && task.wake_at.is_some_and(|wake_at| wake_at <= now)
                })
            })
            .collect();

        for slot in due {
            match self.make_ready(slot) {
                Ok(id) => trace!("Task {id} woke up"),
                Err(err) => debug!("Sleeper in slot {slot} stays blocked: {err:?}"),
            }
        }
    }

    /// Asks for a reschedule at the next post-interrupt check.
    pub fn request_reschedule(&mut self) {
        if self.enabled && self.preemption_enabled {
            self.reschedule_pending = true;
        }
    }

    pub fn is_reschedule_pending(&self) -> bool {
        self.reschedule_pending
    }

    /// Drains a pending reschedule. Called after an interrupt has been
    /// acknowledged, outside the tick accounting.
    pub fn handle_post_irq(&mut self) -> Option<SwitchPlan> {
        if !self.reschedule_pending || self.in_schedule || !self.preemption_enabled {
            return None;
        }
        self.reschedule_pending = false;
        self.schedule()
    }
}
