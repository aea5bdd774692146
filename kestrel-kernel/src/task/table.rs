//! Fixed-capacity pool of task control blocks.
//!
//! The table is the single owner of every per-task resource (stacks and
//! address-space handles). The ready queue and the scheduler refer to tasks
//! by slot index only.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use kestrel_abi::TASK_NAME_MAX_LEN;
use log::{debug, info, warn};

use super::{
    Accounting, ExitReason, FaultReason, INITIAL_RFLAGS, Priority, Task, TaskContext, TaskError,
    TaskFlags, TaskId, TaskMode, TaskStack, TaskState,
};
use crate::config::SchedulerConfig;
use crate::platform::{AddressSpaceProvider, Platform};

/// Post-mortem record of a terminated task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitRecord {
    pub id: TaskId,
    pub name: String,
    pub reason: ExitReason,
    pub fault: FaultReason,
    pub code: i64,
    pub runtime: u64,
}

/// Task table counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Tasks ever created.
    pub total_created: u32,
    /// Occupied slots whose task has not terminated.
    pub active: u32,
    pub total_terminated: u32,
    /// Switches into any task.
    pub context_switches: u64,
}

pub struct TaskTable {
    slots: Box<[Option<Task>]>,
    next_id: u32,
    default_quantum: u32,
    kernel_stack_size: usize,
    user_stack_size: usize,
    entry_stack_size: usize,
    stats: TaskStats,
    exits: VecDeque<ExitRecord>,
    exit_log_len: usize,
}

impl TaskTable {
    pub fn new(config: &SchedulerConfig) -> Self {
        let mut slots = Vec::with_capacity(config.capacity);
        slots.resize_with(config.capacity, || None);

        Self {
            slots: slots.into_boxed_slice(),
            next_id: 1,
            default_quantum: config.default_quantum,
            kernel_stack_size: config.kernel_stack_size,
            user_stack_size: config.user_stack_size,
            entry_stack_size: config.entry_stack_size,
            stats: TaskStats::default(),
            exits: VecDeque::with_capacity(config.exit_log_len),
            exit_log_len: config.exit_log_len,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Creates a task in READY. The caller admits it to the ready queue.
    ///
    /// Nothing is left allocated when this fails.
    pub fn create<P: Platform>(
        &mut self,
        platform: &mut P,
        name: &str,
        entry: u64,
        arg: u64,
        priority: Priority,
        flags: TaskFlags,
    ) -> Result<TaskId, TaskError> {
        let user = flags.contains(TaskFlags::USER_MODE);
        if user == flags.contains(TaskFlags::KERNEL_MODE) {
            warn!("task_create: '{name}' must be exactly one of kernel or user mode");
            return Err(TaskError::InvalidMode);
        }
        if entry == 0 {
            return Err(TaskError::InvalidEntry);
        }

        let Some(slot) = self.slots.iter().position(Option::is_none) else {
            warn!("task_create: maximum tasks reached");
            return Err(TaskError::TableFull);
        };
        // `u32::MAX` is `TaskId::INVALID`.
        if self.next_id == u32::MAX {
            warn!("task_create: task ids exhausted");
            return Err(TaskError::IdsExhausted);
        }

        let selectors = platform.selectors();
        let mut context = TaskContext {
            rflags: INITIAL_RFLAGS,
            ..TaskContext::default()
        };

        let mode = if user {
            let address_space = platform
                .create_address_space()
                .map_err(|_| TaskError::AddressSpace)?;

            let user_stack_top = match platform.map_user_stack(address_space, self.user_stack_size)
            {
                Ok(top) => top,
                Err(_) => {
                    platform.destroy_address_space(address_space);
                    return Err(TaskError::UserStack);
                }
            };

            let Some(entry_stack) = TaskStack::allocate(self.entry_stack_size) else {
                platform.destroy_address_space(address_space);
                return Err(TaskError::StackAllocation);
            };

            context.rip = entry;
            context.rdi = arg;
            context.rsp = call_aligned(user_stack_top.as_u64());
            context.cs = selectors.user_code as u64;
            context.ss = selectors.user_data as u64;
            context.ds = selectors.user_data as u64;
            context.es = selectors.user_data as u64;
            context.cr3 = platform
                .resolve_root(address_space)
                .map_or(0, |root| root.as_u64());

            TaskMode::User {
                address_space,
                user_stack_top,
                entry_stack,
            }
        } else {
            let stack =
                TaskStack::allocate(self.kernel_stack_size).ok_or(TaskError::StackAllocation)?;

            // Kernel tasks start in the trampoline, which calls entry(arg).
            context.rip = platform.kernel_trampoline().as_u64();
            context.rdi = entry;
            context.rsi = arg;
            context.rsp = call_aligned(stack.top().as_u64());
            context.cs = selectors.kernel_code as u64;
            context.ss = selectors.kernel_data as u64;
            context.ds = selectors.kernel_data as u64;
            context.es = selectors.kernel_data as u64;
            context.cr3 = platform.kernel_root().as_u64();

            TaskMode::Kernel { stack }
        };

        let id = TaskId(self.next_id);
        self.next_id += 1;

        let now = platform.ticks();
        let mut task = Task {
            id,
            name: truncate_name(name),
            state: TaskState::Invalid,
            mode,
            priority,
            flags,
            entry,
            arg,
            context,
            context_from_trap: false,
            accounting: Accounting {
                quantum: self.default_quantum,
                quantum_remaining: self.default_quantum,
                created_at: now,
                last_scheduled: now,
                ..Accounting::default()
            },
            waiting_on: None,
            wake_at: None,
            exit_reason: ExitReason::None,
            fault_reason: FaultReason::None,
            exit_code: 0,
            next_ready: None,
            queued: false,
        };
        task.set_state(TaskState::Ready)?;

        info!(
            "Created {} task '{}' with ID {id}",
            if user { "user" } else { "kernel" },
            task.name
        );

        self.slots[slot] = Some(task);
        self.stats.total_created += 1;
        Ok(id)
    }

    /// Checked state change. Illegal edges are logged and leave the task untouched.
    pub fn set_state(&mut self, id: TaskId, state: TaskState) -> Result<(), TaskError> {
        let task = self.get_mut(id).ok_or(TaskError::NotFound)?;
        let from = task.state;
        task.set_state(state).inspect_err(|_| {
            warn!("Task {id}: rejected state change {from:?} -> {state:?}");
        })?;
        debug!("Task {id} state: {from:?} -> {state:?}");
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.slots.iter().flatten().find(|task| task.id == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.slots.iter_mut().flatten().find(|task| task.id == id)
    }

    pub fn slot_of(&self, id: TaskId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|task| task.id == id))
    }

    pub fn slot(&self, slot: usize) -> Option<&Task> {
        self.slots.get(slot)?.as_ref()
    }

    pub fn slot_mut(&mut self, slot: usize) -> Option<&mut Task> {
        self.slots.get_mut(slot)?.as_mut()
    }

    /// Slots of every occupied entry, in slot order.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, task)| task.as_ref().map(|_| slot))
    }

    /// Tasks that exist and have not terminated.
    pub fn iter_active(&self) -> impl Iterator<Item = &Task> {
        self.slots
            .iter()
            .flatten()
            .filter(|task| task.state != TaskState::Terminated)
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            active: self.iter_active().count() as u32,
            ..self.stats
        }
    }

    pub(crate) fn note_switch(&mut self) {
        self.stats.context_switches += 1;
    }

    /// Appends the exit record of a task that just terminated.
    pub(crate) fn record_exit(&mut self, slot: usize) {
        let Some(task) = self.slot(slot) else {
            return;
        };
        let record = ExitRecord {
            id: task.id,
            name: task.name.clone(),
            reason: task.exit_reason,
            fault: task.fault_reason,
            code: task.exit_code,
            runtime: task.accounting.runtime,
        };
        self.stats.total_terminated += 1;

        if self.exit_log_len == 0 {
            return;
        }
        if self.exits.len() == self.exit_log_len {
            self.exits.pop_front();
        }
        self.exits.push_back(record);
    }

    /// Most recent exit record for `id`, if it is still in the log.
    pub fn exit_record(&self, id: TaskId) -> Option<&ExitRecord> {
        self.exits.iter().rev().find(|record| record.id == id)
    }

    /// Frees a terminated task's resources and returns its slot to INVALID.
    pub(crate) fn release<A: AddressSpaceProvider>(
        &mut self,
        slot: usize,
        spaces: &mut A,
    ) -> Result<(), TaskError> {
        let entry = self.slots.get_mut(slot).ok_or(TaskError::NotFound)?;
        let task = entry.as_mut().ok_or(TaskError::NotFound)?;
        task.set_state(TaskState::Invalid)?;

        let Some(task) = entry.take() else {
            return Err(TaskError::NotFound);
        };
        if let Some(space) = task.mode.address_space() {
            spaces.destroy_address_space(space);
        }
        debug!("Released task {} (slot {slot})", task.id);
        // Stacks are freed when `task` drops here.
        Ok(())
    }
}

/// Stack pointer a function sees right after `call`: 16-byte aligned minus 8.
fn call_aligned(top: u64) -> u64 {
    (top & !0xf) - 8
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(TASK_NAME_MAX_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockPlatform, USER_STACK_TOP};

    fn table(capacity: usize) -> TaskTable {
        TaskTable::new(&SchedulerConfig::default().with_capacity(capacity))
    }

    fn kernel(table: &mut TaskTable, platform: &mut MockPlatform, name: &str) -> TaskId {
        table
            .create(platform, name, 0x1000, 7, Priority::Normal, TaskFlags::KERNEL_MODE)
            .unwrap()
    }

    #[test]
    fn test_create_kernel_task() {
        let mut platform = MockPlatform::new();
        let mut table = table(4);
        let id = kernel(&mut table, &mut platform, "worker");

        let task = table.get(id).unwrap();
        assert_eq!(task.state(), TaskState::Ready);
        assert!(!task.is_queued());
        assert!(!task.is_user());
        assert_eq!(task.mode().address_space(), None);
        assert_eq!(task.context().rip, platform.kernel_trampoline().as_u64());
        assert_eq!(task.context().rdi, 0x1000);
        assert_eq!(task.context().rsi, 7);
        assert_eq!(task.context().rflags, 0x202);
        assert_eq!(task.context().cs, platform.selectors().kernel_code as u64);
        assert_eq!((task.context().rsp + 8) % 16, 0);
        assert_eq!(task.accounting().quantum, 10);
    }

    #[test]
    fn test_create_user_task() {
        let mut platform = MockPlatform::new();
        let mut table = table(4);
        let id = table
            .create(
                &mut platform,
                "shell",
                0x40_0000,
                3,
                Priority::Normal,
                TaskFlags::USER_MODE,
            )
            .unwrap();

        let task = table.get(id).unwrap();
        let space = task.mode().address_space().unwrap();
        assert!(task.mode().entry_stack_top().is_some());
        assert_eq!(task.context().rip, 0x40_0000);
        assert_eq!(task.context().rdi, 3);
        assert_eq!(task.context().cs, platform.selectors().user_code as u64);
        assert_eq!(task.context().ss, platform.selectors().user_data as u64);
        assert_eq!(task.context().rsp, USER_STACK_TOP - 8);
        assert_eq!(
            task.context().cr3,
            platform.resolve_root(space).unwrap().as_u64()
        );
        assert!(task.context().resumes_in_user_mode());
    }

    #[test]
    fn test_ids_count_up() {
        let mut platform = MockPlatform::new();
        let mut table = table(4);
        let a = kernel(&mut table, &mut platform, "a");
        let b = kernel(&mut table, &mut platform, "b");
        assert_eq!(a.as_u32(), 1);
        assert_eq!(b.as_u32(), 2);
    }

    #[test]
    fn test_invalid_mode() {
        let mut platform = MockPlatform::new();
        let mut table = table(4);
        let both = TaskFlags::KERNEL_MODE | TaskFlags::USER_MODE;
        assert_eq!(
            table.create(&mut platform, "x", 0x1000, 0, Priority::Normal, both),
            Err(TaskError::InvalidMode)
        );
        assert_eq!(
            table.create(
                &mut platform,
                "x",
                0x1000,
                0,
                Priority::Normal,
                TaskFlags::empty()
            ),
            Err(TaskError::InvalidMode)
        );
        assert_eq!(table.stats().total_created, 0);
    }

    #[test]
    fn test_table_full() {
        let mut platform = MockPlatform::new();
        let mut table = table(32);
        for i in 0..32 {
            kernel(&mut table, &mut platform, &alloc::format!("t{i}"));
        }

        assert_eq!(
            table.create(
                &mut platform,
                "extra",
                0x1000,
                0,
                Priority::Normal,
                TaskFlags::KERNEL_MODE
            ),
            Err(TaskError::TableFull)
        );
        assert_eq!(table.stats().active, 32);
        assert_eq!(table.stats().total_created, 32);
    }

    #[test]
    fn test_address_space_failure_rolls_back() {
        let mut platform = MockPlatform::new();
        platform.fail_address_space = true;
        let mut table = table(4);
        assert_eq!(
            table.create(&mut platform, "u", 0x40_0000, 0, Priority::Low, TaskFlags::USER_MODE),
            Err(TaskError::AddressSpace)
        );
        assert_eq!(table.iter_active().count(), 0);
    }

    #[test]
    fn test_user_stack_failure_destroys_space() {
        let mut platform = MockPlatform::new();
        platform.fail_user_stack = true;
        let mut table = table(4);
        assert_eq!(
            table.create(&mut platform, "u", 0x40_0000, 0, Priority::Low, TaskFlags::USER_MODE),
            Err(TaskError::UserStack)
        );
        assert_eq!(platform.destroyed.len(), 1);
        assert_eq!(platform.live_spaces(), 0);
    }

    #[test]
    fn test_stack_failure() {
        let mut platform = MockPlatform::new();
        let mut config = SchedulerConfig::default();
        config.kernel_stack_size = usize::MAX;
        let mut table = TaskTable::new(&config);
        assert_eq!(
            table.create(
                &mut platform,
                "k",
                0x1000,
                0,
                Priority::Normal,
                TaskFlags::KERNEL_MODE
            ),
            Err(TaskError::StackAllocation)
        );
    }

    #[test]
    fn test_ids_never_reach_invalid() {
        let mut platform = MockPlatform::new();
        let mut table = table(4);
        table.next_id = u32::MAX - 1;

        let last = kernel(&mut table, &mut platform, "last");
        assert_eq!(last.as_u32(), u32::MAX - 1);
        assert_eq!(
            table.create(
                &mut platform,
                "one-too-many",
                0x1000,
                0,
                Priority::Normal,
                TaskFlags::KERNEL_MODE
            ),
            Err(TaskError::IdsExhausted)
        );
        assert_eq!(table.iter_active().count(), 1);
        assert!(table.get(TaskId::INVALID).is_none());
    }

    #[test]
    fn test_name_truncated() {
        let mut platform = MockPlatform::new();
        let mut table = table(2);
        let long = "a-very-long-task-name-that-keeps-going-and-going";
        let id = kernel(&mut table, &mut platform, long);
        assert_eq!(table.get(id).unwrap().name().len(), TASK_NAME_MAX_LEN - 1);
    }

    #[test]
    fn test_set_state_rejects_illegal_edge() {
        let mut platform = MockPlatform::new();
        let mut table = table(2);
        let id = kernel(&mut table, &mut platform, "t");

        table.set_state(id, TaskState::Blocked).unwrap();
        assert!(matches!(
            table.set_state(id, TaskState::Running),
            Err(TaskError::InvalidTransition { .. })
        ));
        assert_eq!(table.get(id).unwrap().state(), TaskState::Blocked);
        assert_eq!(
            table.set_state(TaskId::from_raw(99), TaskState::Ready),
            Err(TaskError::NotFound)
        );
    }

    #[test]
    fn test_release_frees_slot_and_space() {
        let mut platform = MockPlatform::new();
        let mut table = table(2);
        let id = table
            .create(&mut platform, "u", 0x40_0000, 0, Priority::Normal, TaskFlags::USER_MODE)
            .unwrap();
        let slot = table.slot_of(id).unwrap();

        // Only terminated tasks may be released.
        assert!(table.release(slot, &mut platform).is_err());

        table.set_state(id, TaskState::Terminated).unwrap();
        table.release(slot, &mut platform).unwrap();
        assert!(table.get(id).is_none());
        assert_eq!(platform.live_spaces(), 0);
        assert_eq!(table.release(slot, &mut platform), Err(TaskError::NotFound));
    }

    #[test]
    fn test_exit_log_is_bounded() {
        let mut platform = MockPlatform::new();
        let mut config = SchedulerConfig::default();
        config.exit_log_len = 2;
        let mut table = TaskTable::new(&config);

        let mut ids = Vec::new();
        for name in ["a", "b", "c"] {
            let id = kernel(&mut table, &mut platform, name);
            let slot = table.slot_of(id).unwrap();
            table.set_state(id, TaskState::Terminated).unwrap();
            table.record_exit(slot);
            table.release(slot, &mut platform).unwrap();
            ids.push(id);
        }

        assert!(table.exit_record(ids[0]).is_none());
        assert_eq!(table.exit_record(ids[2]).unwrap().name, "c");
    }
}
