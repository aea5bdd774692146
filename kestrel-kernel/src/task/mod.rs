//! Task control blocks.

mod state;
mod table;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use kestrel_abi::{
    INVALID_TASK_ID, TASK_FLAG_KERNEL_MODE, TASK_FLAG_NO_PREEMPT, TASK_FLAG_SYSTEM,
    TASK_FLAG_USER_MODE, TASK_PRIORITY_HIGH, TASK_PRIORITY_IDLE, TASK_PRIORITY_LOW,
    TASK_PRIORITY_NORMAL,
};
use x86_64::VirtAddr;

use crate::platform::AddressSpaceId;

pub use state::{InterruptFrame, SavedGprs, TaskContext, TrapFrame};
pub use table::{ExitRecord, TaskStats, TaskTable};

/// Flags register of a fresh task: IF set, reserved bit 1 set.
pub const INITIAL_RFLAGS: u64 = 0x202;

/// Unique identifier for a task. Ids count up from 1 and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u32);

impl TaskId {
    /// Never names a task.
    pub const INVALID: TaskId = TaskId(INVALID_TASK_ID);

    /// Names whichever task is running when passed to `Scheduler::terminate`.
    pub const CURRENT: TaskId = TaskId(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Slot is free.
    Invalid,
    /// Runnable, linked into the ready queue.
    Ready,
    /// Currently executing.
    Running,
    /// Waiting for an event (unblock, or termination of another task).
    Blocked,
    /// Finished; resources are released once it is no longer executing.
    Terminated,
}

impl TaskState {
    /// Whether the transition table allows `self -> next`.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;

        self == next
            || matches!(
                (self, next),
                (Invalid, Ready)
                    | (Ready, Running)
                    | (Ready, Blocked)
                    | (Ready, Terminated)
                    | (Running, Ready)
                    | (Running, Blocked)
                    | (Running, Terminated)
                    | (Blocked, Ready)
                    | (Blocked, Terminated)
                    | (Terminated, Invalid)
            )
    }

    /// Checked transition. Returns the new state or rejects the edge.
    pub fn transition(self, next: TaskState) -> Result<TaskState, TaskError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TaskError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

bitflags! {
    /// Creation and behaviour flags. Exactly one of the mode bits must be
    /// given to `create`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        const USER_MODE = TASK_FLAG_USER_MODE;
        const KERNEL_MODE = TASK_FLAG_KERNEL_MODE;
        /// The timer never preempts this task.
        const NO_PREEMPT = TASK_FLAG_NO_PREEMPT;
        const SYSTEM = TASK_FLAG_SYSTEM;
    }
}

/// Advisory priority. Scheduling is round robin and ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Priority {
    High = TASK_PRIORITY_HIGH,
    Normal = TASK_PRIORITY_NORMAL,
    Low = TASK_PRIORITY_LOW,
    Idle = TASK_PRIORITY_IDLE,
}

impl Priority {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            TASK_PRIORITY_HIGH => Self::High,
            TASK_PRIORITY_NORMAL => Self::Normal,
            TASK_PRIORITY_LOW => Self::Low,
            _ => Self::Idle,
        }
    }
}

/// Why a task stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitReason {
    #[default]
    None,
    /// Exited through the exit syscall or by returning from its entry point.
    Normal,
    /// Killed after a fault raised at user privilege.
    UserFault,
    /// Terminated by the kernel.
    Kernel,
}

/// The fault that killed a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultReason {
    #[default]
    None,
    PageFault,
    GeneralProtection,
    InvalidOpcode,
    DeviceNotAvailable,
}

impl FaultReason {
    /// Maps a CPU exception vector to the user fault it represents.
    pub fn from_vector(vector: u64) -> Option<Self> {
        match vector {
            6 => Some(Self::InvalidOpcode),
            7 => Some(Self::DeviceNotAvailable),
            13 => Some(Self::GeneralProtection),
            14 => Some(Self::PageFault),
            _ => None,
        }
    }
}

/// Task table errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    /// Every slot is occupied.
    TableFull,
    /// Every task id has been handed out once.
    IdsExhausted,
    /// The execution or entry stack could not be allocated.
    StackAllocation,
    /// The address-space provider could not create an address space.
    AddressSpace,
    /// The address-space provider could not map a user stack.
    UserStack,
    /// Both or neither of `KERNEL_MODE` and `USER_MODE` were requested.
    InvalidMode,
    /// The entry point is null.
    InvalidEntry,
    /// No live task has this id.
    NotFound,
    /// The task was already terminated.
    AlreadyTerminated,
    /// The transition table forbids this edge.
    InvalidTransition { from: TaskState, to: TaskState },
}

/// Heap-allocated stack owned by a task.
pub struct TaskStack {
    memory: Box<[u8]>,
}

impl TaskStack {
    /// Allocates a zeroed stack, or `None` if the heap cannot satisfy it.
    pub fn allocate(size: usize) -> Option<Self> {
        let mut memory = Vec::new();
        memory.try_reserve_exact(size).ok()?;
        memory.resize(size, 0);
        Some(Self {
            memory: memory.into_boxed_slice(),
        })
    }

    /// Highest 16-byte aligned address of the stack.
    pub fn top(&self) -> VirtAddr {
        let end = self.memory.as_ptr() as u64 + self.memory.len() as u64;
        VirtAddr::new(end & !0xf)
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

impl fmt::Debug for TaskStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskStack")
            .field("top", &self.top())
            .field("size", &self.size())
            .finish()
    }
}

/// Privilege mode and the resources that come with it.
#[derive(Debug)]
pub enum TaskMode {
    /// Runs at ring 0 on its own stack, in the kernel address space.
    Kernel { stack: TaskStack },
    /// Runs at ring 3. `entry_stack` is only used by the CPU while the task
    /// traps into the kernel.
    User {
        address_space: AddressSpaceId,
        user_stack_top: VirtAddr,
        entry_stack: TaskStack,
    },
}

impl TaskMode {
    pub fn is_user(&self) -> bool {
        matches!(self, TaskMode::User { .. })
    }

    pub fn address_space(&self) -> Option<AddressSpaceId> {
        match self {
            TaskMode::Kernel { .. } => None,
            TaskMode::User { address_space, .. } => Some(*address_space),
        }
    }

    /// Top of the privileged entry stack, for user tasks.
    pub fn entry_stack_top(&self) -> Option<VirtAddr> {
        match self {
            TaskMode::Kernel { .. } => None,
            TaskMode::User { entry_stack, .. } => Some(entry_stack.top()),
        }
    }
}

/// Quantum and runtime bookkeeping, all in timer ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accounting {
    pub quantum: u32,
    pub quantum_remaining: u32,
    pub runtime: u64,
    pub yields: u64,
    /// Tick at which the task was last switched in.
    pub last_scheduled: u64,
    pub created_at: u64,
    /// Times the task was switched in.
    pub switches: u64,
}

/// A task control block.
#[derive(Debug)]
pub struct Task {
    id: TaskId,
    name: String,
    state: TaskState,
    pub(crate) mode: TaskMode,
    priority: Priority,
    flags: TaskFlags,
    entry: u64,
    arg: u64,

    /// Saved registers; the only state needed to resume the task.
    pub(crate) context: TaskContext,
    /// Set while `context` holds a snapshot taken from a trap frame, so the
    /// switch code must not overwrite it.
    pub(crate) context_from_trap: bool,

    pub(crate) accounting: Accounting,
    pub(crate) waiting_on: Option<TaskId>,
    /// Tick at which a sleeping task is made ready again.
    pub(crate) wake_at: Option<u64>,

    pub(crate) exit_reason: ExitReason,
    pub(crate) fault_reason: FaultReason,
    pub(crate) exit_code: i64,

    /// Ready queue link: slot index of the next queued task.
    pub(crate) next_ready: Option<usize>,
    pub(crate) queued: bool,
}

impl Task {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn mode(&self) -> &TaskMode {
        &self.mode
    }

    pub fn is_user(&self) -> bool {
        self.mode.is_user()
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub fn entry(&self) -> u64 {
        self.entry
    }

    pub fn arg(&self) -> u64 {
        self.arg
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn context_from_trap(&self) -> bool {
        self.context_from_trap
    }

    pub fn accounting(&self) -> &Accounting {
        &self.accounting
    }

    pub fn waiting_on(&self) -> Option<TaskId> {
        self.waiting_on
    }

    pub fn wake_at(&self) -> Option<u64> {
        self.wake_at
    }

    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    pub fn fault_reason(&self) -> FaultReason {
        self.fault_reason
    }

    pub fn exit_code(&self) -> i64 {
        self.exit_code
    }

    /// Whether the task is linked into the ready queue.
    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn is_preemptible(&self) -> bool {
        !self.flags.contains(TaskFlags::NO_PREEMPT)
    }

    pub(crate) fn set_state(&mut self, next: TaskState) -> Result<(), TaskError> {
        self.state = self.state.transition(next)?;
        Ok(())
    }

    pub(crate) fn reset_quantum(&mut self) {
        self.accounting.quantum_remaining = self.accounting.quantum;
    }

    pub(crate) fn context_ptr(&mut self) -> core::ptr::NonNull<TaskContext> {
        core::ptr::NonNull::from(&mut self.context)
    }
}
