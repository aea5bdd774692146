use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use kestrel_abi::USER_IO_MAX_BYTES;

use log::{error, info, warn};
use x86_64::instructions::random::RdRand;
use x86_64::registers::control::Cr3;
use x86_64::structures::paging::PhysFrame;
use x86_64::{PhysAddr, VirtAddr};

use crate::heap;
use crate::logging::serial;
use crate::platform::{
    AddressSpaceId, AddressSpaceProvider, Platform, PlatformError, Selectors,
};
use crate::qemu::{QemuExitCode, exit_qemu};
use crate::syscall::{Outcome, PageStats, RouletteSpin, ServiceError, SyscallServices, gdt};
use crate::task::TaskId;
use crate::{time, timer};

const PAGE_SIZE: usize = 4096;

/// [`Platform`] backed by the CPU, the PIT and a pluggable address-space
/// provider.
pub struct HardwarePlatform {
    spaces: Box<dyn AddressSpaceProvider + Send>,
}

impl HardwarePlatform {
    pub fn new(spaces: Box<dyn AddressSpaceProvider + Send>) -> Self {
        Self { spaces }
    }

    /// Runs `f` with `space` loaded in CR3, restoring the previous root
    /// afterwards.
    fn in_space<R>(&self, space: AddressSpaceId, f: impl FnOnce() -> R) -> Option<R> {
        let root = self.spaces.resolve_root(space)?;
        let (previous, flags) = Cr3::read();
        let switched = previous.start_address() != root;
        if switched {
            unsafe { Cr3::write(PhysFrame::containing_address(root), flags) };
        }
        let result = f();
        if switched {
            unsafe { Cr3::write(previous, flags) };
        }
        Some(result)
    }
}

impl AddressSpaceProvider for HardwarePlatform {
    fn create_address_space(&mut self) -> Result<AddressSpaceId, PlatformError> {
        self.spaces.create_address_space()
    }

    fn destroy_address_space(&mut self, space: AddressSpaceId) {
        self.spaces.destroy_address_space(space);
    }

    fn resolve_root(&self, space: AddressSpaceId) -> Option<PhysAddr> {
        self.spaces.resolve_root(space)
    }

    fn kernel_root(&self) -> PhysAddr {
        self.spaces.kernel_root()
    }

    fn map_user_stack(
        &mut self,
        space: AddressSpaceId,
        size: usize,
    ) -> Result<VirtAddr, PlatformError> {
        self.spaces.map_user_stack(space, size)
    }

    fn is_user_range_mapped(&self, space: AddressSpaceId, addr: VirtAddr, len: usize) -> bool {
        self.spaces.is_user_range_mapped(space, addr, len)
    }
}

impl Platform for HardwarePlatform {
    fn ticks(&self) -> u64 {
        time::ticks()
    }

    fn ms_to_ticks(&self, ms: u32) -> u64 {
        timer::ms_to_ticks(ms)
    }

    fn set_tick_irq(&mut self, enabled: bool) {
        timer::set_irq_enabled(enabled);
    }

    fn install_address_space(&mut self, root: PhysAddr) {
        let (current, flags) = Cr3::read();
        if current.start_address() != root {
            unsafe { Cr3::write(PhysFrame::containing_address(root), flags) };
        }
    }

    fn set_entry_stack(&mut self, top: VirtAddr) {
        gdt::set_entry_stack(top);
    }

    fn default_entry_stack(&self) -> VirtAddr {
        gdt::default_entry_stack()
    }

    fn selectors(&self) -> Selectors {
        gdt::selectors()
    }

    fn kernel_trampoline(&self) -> VirtAddr {
        let entry: extern "sysv64" fn(u64, u64) -> ! = super::kernel_task_entry;
        VirtAddr::new(entry as usize as u64)
    }

    fn read_user(&self, space: AddressSpaceId, addr: VirtAddr, buf: &mut [u8]) {
        let copied = self.in_space(space, || unsafe {
            core::ptr::copy_nonoverlapping(addr.as_ptr::<u8>(), buf.as_mut_ptr(), buf.len());
        });
        if copied.is_none() {
            warn!("read_user: unknown address space {space:?}");
            buf.fill(0);
        }
    }

    fn write_user(&mut self, space: AddressSpaceId, addr: VirtAddr, data: &[u8]) {
        let copied = self.in_space(space, || unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), addr.as_mut_ptr::<u8>(), data.len());
        });
        if copied.is_none() {
            warn!("write_user: unknown address space {space:?}");
        }
    }

    fn fatal(&mut self, reason: &str) -> ! {
        error!("FATAL: {reason}");
        exit_qemu(QemuExitCode::Failed)
    }
}

/// Syscall backend on the serial console.
///
/// Graphics and the filesystem are not wired up and report
/// [`ServiceError::Unsupported`].
pub struct SerialServices {
    /// Console input received so far, up to the next line end.
    line: Vec<u8>,
    rng: u64,
    next_token: u32,
    pending: BTreeMap<TaskId, RouletteSpin>,
    wins: u64,
    losses: u64,
}

impl SerialServices {
    pub fn new() -> Self {
        let seed = RdRand::new()
            .and_then(RdRand::get_u64)
            .unwrap_or_else(|| time::ticks() ^ 0x9e37_79b9_7f4a_7c15);
        Self {
            line: Vec::new(),
            // xorshift never leaves zero.
            rng: seed.max(1),
            next_token: 1,
            pending: BTreeMap::new(),
            wins: 0,
            losses: 0,
        }
    }

    /// Wins and losses recorded so far.
    pub fn ledger(&self) -> (u64, u64) {
        (self.wins, self.losses)
    }

    fn next_random(&mut self) -> u64 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        x
    }
}

impl Default for SerialServices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyscallServices for SerialServices {
    fn console_write(&mut self, bytes: &[u8]) -> Result<usize, ServiceError> {
        serial::write_bytes(bytes);
        Ok(bytes.len())
    }

    fn console_read_line(&mut self, buf: &mut [u8]) -> Result<usize, ServiceError> {
        while let Some(byte) = serial::read_byte() {
            match byte {
                b'\r' | b'\n' => {
                    serial::write_bytes(b"\r\n");
                    let n = self.line.len().min(buf.len());
                    buf[..n].copy_from_slice(&self.line[..n]);
                    self.line.clear();
                    return Ok(n);
                }
                // Backspace and DEL.
                0x08 | 0x7f => {
                    if self.line.pop().is_some() {
                        serial::write_bytes(b"\x08 \x08");
                    }
                }
                _ if self.line.len() < USER_IO_MAX_BYTES => {
                    self.line.push(byte);
                    serial::write_bytes(&[byte]);
                }
                _ => {}
            }
        }
        Err(ServiceError::WouldBlock)
    }

    fn sleep_ms(&mut self, ms: u32) -> Result<(), ServiceError> {
        timer::poll_delay_ms(ms);
        Ok(())
    }

    fn random_next(&mut self) -> Result<u64, ServiceError> {
        Ok(self.next_random())
    }

    fn roulette_spin(&mut self, task: TaskId) -> Result<RouletteSpin, ServiceError> {
        let value = self.next_random() as u32;
        let spin = RouletteSpin {
            token: self.next_token,
            value,
            is_win: value & 1 != 0,
        };
        self.next_token = self.next_token.wrapping_add(1).max(1);
        self.pending.insert(task, spin);
        Ok(spin)
    }

    fn roulette_take_pending(&mut self, task: TaskId) -> Option<RouletteSpin> {
        self.pending.remove(&task)
    }

    fn roulette_apply(&mut self, spin: &RouletteSpin) {
        if spin.is_win {
            info!("Roulette: win");
        } else {
            warn!("Roulette: loss");
        }
    }

    fn page_stats(&self) -> PageStats {
        let usage = heap::usage();
        PageStats {
            total: (usage.size / PAGE_SIZE) as u32,
            free: (usage.free / PAGE_SIZE) as u32,
            allocated: usage.used.div_ceil(PAGE_SIZE) as u32,
        }
    }

    fn record_outcome(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
        }
    }
}
