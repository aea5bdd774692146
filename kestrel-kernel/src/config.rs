//! Scheduler configuration.

use kestrel_abi::{DEFAULT_TIME_SLICE, MAX_TASKS, TASK_STACK_SIZE};

/// Tunables fixed at scheduler construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of task slots.
    pub capacity: usize,
    /// Ready queue bound. Clamped to `capacity`.
    pub queue_capacity: usize,
    /// Quantum given to new tasks, in timer ticks.
    pub default_quantum: u32,
    /// Whether preemption is switched on by `Scheduler::start`.
    pub preemption: bool,
    /// Execution stack of a kernel task.
    pub kernel_stack_size: usize,
    /// Execution stack of a user task, mapped by the address-space provider.
    pub user_stack_size: usize,
    /// Privileged entry stack of a user task.
    pub entry_stack_size: usize,
    /// Exit records kept for post-mortem queries.
    pub exit_log_len: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_TASKS,
            queue_capacity: MAX_TASKS,
            default_quantum: DEFAULT_TIME_SLICE,
            preemption: true,
            kernel_stack_size: TASK_STACK_SIZE,
            user_stack_size: TASK_STACK_SIZE,
            entry_stack_size: TASK_STACK_SIZE,
            exit_log_len: 16,
        }
    }
}

impl SchedulerConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self.queue_capacity = capacity;
        self
    }

    pub fn with_quantum(mut self, ticks: u32) -> Self {
        self.default_quantum = ticks;
        self
    }

    pub fn with_preemption(mut self, enabled: bool) -> Self {
        self.preemption = enabled;
        self
    }
}
