//! Kestrel kernel task core.
//!
//! The scheduling logic (task table, ready queue, scheduler, context-switch
//! planning, preemption hook and syscall gateway) is plain Rust and runs in
//! host unit tests. The hardware side (GDT/TSS, IDT and trap stubs, the
//! context-switch assembly, the global scheduler owner, serial logging and
//! the kernel heap) only builds for the bare-metal target.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod platform;
pub mod scheduler;
pub mod syscall;
pub mod task;
pub mod time;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod heap;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod interrupts;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod kernel;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod logging;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod panic;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod qemu;
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub mod timer;

pub use config::SchedulerConfig;
pub use platform::{AddressSpaceId, AddressSpaceProvider, GateVerdict, Platform, Selectors};
pub use scheduler::{Scheduler, SchedulerError, SchedulerStats, SwitchPlan};
pub use task::{Task, TaskError, TaskFlags, TaskId, TaskState};
