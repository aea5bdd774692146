//! Narrow interfaces to the collaborators the task core does not own.
//!
//! Paging, the timer, the privilege-transition stack register and the
//! segment layout all live behind [`Platform`]. The hardware implementation
//! is in `kernel/hardware.rs`; tests use `testing::MockPlatform`.

use x86_64::{PhysAddr, VirtAddr};

/// Opaque handle to a process address space, issued by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AddressSpaceId(pub u64);

/// Failures reported by platform collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// No memory left for the requested structure.
    OutOfMemory,
    /// The address-space handle is unknown to the provider.
    UnknownAddressSpace,
}

/// Failures of a copy between kernel and user memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCopyError {
    /// Null, overflowing, or outside the lower canonical half.
    BadPointer,
    /// Inside the user half but not mapped in the task's address space.
    NotMapped,
}

/// Verdict of the switch gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Continue,
    /// Stop the whole system.
    Fatal,
}

/// Policy hook consulted once per context switch.
pub type SwitchGate = fn() -> GateVerdict;

/// Polled by the idle task; `true` means some input source has pending data.
pub type IdleWakeup = fn() -> bool;

/// Segment selectors installed in task contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selectors {
    pub kernel_code: u16,
    pub kernel_data: u16,
    /// User code selector, RPL 3.
    pub user_code: u16,
    /// User data selector, RPL 3.
    pub user_data: u16,
}

/// Owner of process address spaces.
pub trait AddressSpaceProvider {
    fn create_address_space(&mut self) -> Result<AddressSpaceId, PlatformError>;

    /// Releases the address space and everything mapped in it.
    fn destroy_address_space(&mut self, space: AddressSpaceId);

    /// Physical address of the space's top-level page table.
    fn resolve_root(&self, space: AddressSpaceId) -> Option<PhysAddr>;

    /// Root of the kernel's own address space.
    fn kernel_root(&self) -> PhysAddr;

    /// Maps a writable user stack of `size` bytes and returns its top.
    fn map_user_stack(
        &mut self,
        space: AddressSpaceId,
        size: usize,
    ) -> Result<VirtAddr, PlatformError>;

    /// Whether `[addr, addr + len)` is mapped user memory in `space`.
    fn is_user_range_mapped(&self, space: AddressSpaceId, addr: VirtAddr, len: usize) -> bool;
}

/// Everything the scheduler needs from the machine.
pub trait Platform: AddressSpaceProvider {
    /// Raw tick counter used for runtime accounting.
    fn ticks(&self) -> u64;

    /// Ticks covering at least `ms` milliseconds.
    fn ms_to_ticks(&self, ms: u32) -> u64;

    /// Masks or unmasks the timer interrupt.
    fn set_tick_irq(&mut self, enabled: bool);

    /// Loads the address-space root register.
    fn install_address_space(&mut self, root: PhysAddr);

    /// Programs the stack the CPU switches to on a ring 3 to ring 0 transition.
    fn set_entry_stack(&mut self, top: VirtAddr);

    /// Entry stack used while a kernel task runs.
    fn default_entry_stack(&self) -> VirtAddr;

    fn selectors(&self) -> Selectors;

    /// Address every kernel task starts at, with `rdi = entry` and `rsi = arg`.
    fn kernel_trampoline(&self) -> VirtAddr;

    /// Copies validated user memory of `space` into `buf`.
    fn read_user(&self, space: AddressSpaceId, addr: VirtAddr, buf: &mut [u8]);

    /// Copies `data` into validated user memory of `space`.
    fn write_user(&mut self, space: AddressSpaceId, addr: VirtAddr, data: &[u8]);

    /// Unrecoverable stop of the whole system.
    fn fatal(&mut self, reason: &str) -> !;
}
