//! Host-side stand-ins for the machine and the syscall backends.
//!
//! `MockPlatform` records every platform call and keeps fake user memory per
//! address space; `RecordingServices` is an in-memory console, filesystem and
//! roulette that logs every ledger outcome.

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use kestrel_abi::UserFbInfo;
use x86_64::{PhysAddr, VirtAddr};

use crate::platform::{
    AddressSpaceId, AddressSpaceProvider, Platform, PlatformError, Selectors,
};
use crate::syscall::{
    FsEntry, FsNode, FsNodeKind, Outcome, PageStats, RouletteSpin, ServiceError,
    SyscallServices,
};
use crate::task::TaskId;

pub const KERNEL_ROOT: u64 = 0x1000;
pub const DEFAULT_ENTRY_STACK: u64 = 0xffff_8000_0020_0000;
pub const KERNEL_TRAMPOLINE: u64 = 0xffff_8000_0000_4000;
pub const USER_STACK_TOP: u64 = 0x7fff_ffff_f000;
/// Tick rate assumed by `MockPlatform::ms_to_ticks`.
pub const TICK_HZ: u32 = 100;

pub const SELECTORS: Selectors = Selectors {
    kernel_code: 0x08,
    kernel_data: 0x10,
    user_code: 0x33,
    user_data: 0x2b,
};

#[derive(Debug)]
struct MockSpace {
    root: PhysAddr,
    /// (base, bytes) pairs of mapped user memory.
    regions: Vec<(u64, Vec<u8>)>,
}

impl MockSpace {
    fn region(&self, addr: u64, len: usize) -> Option<(usize, usize)> {
        self.regions.iter().enumerate().find_map(|(i, (base, bytes))| {
            let end = base + bytes.len() as u64;
            (addr >= *base && addr + len as u64 <= end).then(|| (i, (addr - base) as usize))
        })
    }
}

#[derive(Debug, Default)]
pub struct MockPlatform {
    /// Value returned by `ticks`.
    pub now: u64,
    pub tick_irq: bool,
    pub installed_roots: Vec<PhysAddr>,
    pub entry_stacks: Vec<VirtAddr>,
    pub destroyed: Vec<AddressSpaceId>,
    pub fail_address_space: bool,
    pub fail_user_stack: bool,
    spaces: BTreeMap<AddressSpaceId, MockSpace>,
    next_space: u64,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self {
            next_space: 1,
            ..Self::default()
        }
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.len()
    }

    pub fn last_root(&self) -> Option<PhysAddr> {
        self.installed_roots.last().copied()
    }

    pub fn last_entry_stack(&self) -> Option<VirtAddr> {
        self.entry_stacks.last().copied()
    }

    /// Maps `len` zeroed bytes at `base` in `space`.
    pub fn map_region(&mut self, space: AddressSpaceId, base: u64, len: usize) {
        if let Some(space) = self.spaces.get_mut(&space) {
            space.regions.push((base, vec![0; len]));
        }
    }

    /// Writes test data into mapped user memory.
    pub fn poke(&mut self, space: AddressSpaceId, addr: u64, data: &[u8]) {
        self.write_user(space, VirtAddr::new(addr), data);
    }

    /// Reads back mapped user memory.
    pub fn peek(&self, space: AddressSpaceId, addr: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0; len];
        self.read_user(space, VirtAddr::new(addr), &mut buf);
        buf
    }
}

impl AddressSpaceProvider for MockPlatform {
    fn create_address_space(&mut self) -> Result<AddressSpaceId, PlatformError> {
        if self.fail_address_space {
            return Err(PlatformError::OutOfMemory);
        }
        let id = AddressSpaceId(self.next_space);
        self.next_space += 1;
        self.spaces.insert(
            id,
            MockSpace {
                root: PhysAddr::new(0x10_0000 + id.0 * 0x1000),
                regions: Vec::new(),
            },
        );
        Ok(id)
    }

    fn destroy_address_space(&mut self, space: AddressSpaceId) {
        self.spaces.remove(&space);
        self.destroyed.push(space);
    }

    fn resolve_root(&self, space: AddressSpaceId) -> Option<PhysAddr> {
        self.spaces.get(&space).map(|space| space.root)
    }

    fn kernel_root(&self) -> PhysAddr {
        PhysAddr::new(KERNEL_ROOT)
    }

    fn map_user_stack(
        &mut self,
        space: AddressSpaceId,
        size: usize,
    ) -> Result<VirtAddr, PlatformError> {
        if self.fail_user_stack {
            return Err(PlatformError::OutOfMemory);
        }
        if !self.spaces.contains_key(&space) {
            return Err(PlatformError::UnknownAddressSpace);
        }
        self.map_region(space, USER_STACK_TOP - size as u64, size);
        Ok(VirtAddr::new(USER_STACK_TOP))
    }

    fn is_user_range_mapped(&self, space: AddressSpaceId, addr: VirtAddr, len: usize) -> bool {
        self.spaces
            .get(&space)
            .is_some_and(|space| space.region(addr.as_u64(), len).is_some())
    }
}

impl Platform for MockPlatform {
    fn ticks(&self) -> u64 {
        self.now
    }

    fn ms_to_ticks(&self, ms: u32) -> u64 {
        (u64::from(ms) * u64::from(TICK_HZ)).div_ceil(1000)
    }

    fn set_tick_irq(&mut self, enabled: bool) {
        self.tick_irq = enabled;
    }

    fn install_address_space(&mut self, root: PhysAddr) {
        self.installed_roots.push(root);
    }

    fn set_entry_stack(&mut self, top: VirtAddr) {
        self.entry_stacks.push(top);
    }

    fn default_entry_stack(&self) -> VirtAddr {
        VirtAddr::new(DEFAULT_ENTRY_STACK)
    }

    fn selectors(&self) -> Selectors {
        SELECTORS
    }

    fn kernel_trampoline(&self) -> VirtAddr {
        VirtAddr::new(KERNEL_TRAMPOLINE)
    }

    fn read_user(&self, space: AddressSpaceId, addr: VirtAddr, buf: &mut [u8]) {
        let Some(space) = self.spaces.get(&space) else {
            return;
        };
        if let Some((i, offset)) = space.region(addr.as_u64(), buf.len()) {
            buf.copy_from_slice(&space.regions[i].1[offset..offset + buf.len()]);
        }
    }

    fn write_user(&mut self, space: AddressSpaceId, addr: VirtAddr, data: &[u8]) {
        let Some(space) = self.spaces.get_mut(&space) else {
            return;
        };
        if let Some((i, offset)) = space.region(addr.as_u64(), data.len()) {
            space.regions[i].1[offset..offset + data.len()].copy_from_slice(data);
        }
    }

    fn fatal(&mut self, reason: &str) -> ! {
        panic!("fatal: {reason}");
    }
}

/// In-memory syscall backend.
#[derive(Debug, Default)]
pub struct RecordingServices {
    /// Everything written to the console.
    pub console: Vec<u8>,
    /// Lines handed out by `console_read_line`.
    pub input: VecDeque<String>,
    /// Reads answered with `WouldBlock` before `input` is consulted.
    pub reads_pending: u32,
    pub sleeps: Vec<u32>,
    pub outcomes: Vec<Outcome>,
    pub drawn: Vec<String>,
    pub framebuffer: Option<UserFbInfo>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub dirs: Vec<String>,
    /// Next spin handed out by `roulette_spin`.
    pub next_spin: Option<RouletteSpin>,
    pub pending: BTreeMap<TaskId, RouletteSpin>,
    pub applied: Vec<RouletteSpin>,
    pub random: u64,
    pub pages: PageStats,
}

impl RecordingServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wins(&self) -> usize {
        self.outcomes.iter().filter(|o| **o == Outcome::Win).count()
    }

    pub fn losses(&self) -> usize {
        self.outcomes.iter().filter(|o| **o == Outcome::Loss).count()
    }
}

impl SyscallServices for RecordingServices {
    fn console_write(&mut self, bytes: &[u8]) -> Result<usize, ServiceError> {
        self.console.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn console_read_line(&mut self, buf: &mut [u8]) -> Result<usize, ServiceError> {
        if self.reads_pending > 0 {
            self.reads_pending -= 1;
            return Err(ServiceError::WouldBlock);
        }
        let line = self.input.pop_front().ok_or(ServiceError::Failed)?;
        let n = line.len().min(buf.len());
        buf[..n].copy_from_slice(&line.as_bytes()[..n]);
        Ok(n)
    }

    fn sleep_ms(&mut self, ms: u32) -> Result<(), ServiceError> {
        self.sleeps.push(ms);
        Ok(())
    }

    fn framebuffer_info(&self) -> Result<UserFbInfo, ServiceError> {
        self.framebuffer.ok_or(ServiceError::Unsupported)
    }

    fn fill_rect(&mut self, rect: &kestrel_abi::UserRect) -> Result<(), ServiceError> {
        self.drawn.push(alloc::format!("rect {}x{}", rect.width, rect.height));
        Ok(())
    }

    fn draw_line(&mut self, line: &kestrel_abi::UserLine) -> Result<(), ServiceError> {
        self.drawn.push(alloc::format!("line {},{}", line.x1, line.y1));
        Ok(())
    }

    fn draw_circle(
        &mut self,
        circle: &kestrel_abi::UserCircle,
        filled: bool,
    ) -> Result<(), ServiceError> {
        self.drawn
            .push(alloc::format!("circle r={} filled={filled}", circle.radius));
        Ok(())
    }

    fn draw_text(
        &mut self,
        _x: i32,
        _y: i32,
        text: &[u8],
        _fg: u32,
        _bg: u32,
    ) -> Result<(), ServiceError> {
        self.drawn
            .push(alloc::format!("text {}", String::from_utf8_lossy(text)));
        Ok(())
    }

    fn random_next(&mut self) -> Result<u64, ServiceError> {
        self.random += 1;
        Ok(self.random)
    }

    fn roulette_spin(&mut self, task: TaskId) -> Result<RouletteSpin, ServiceError> {
        let spin = self.next_spin.take().ok_or(ServiceError::Failed)?;
        self.pending.insert(task, spin);
        Ok(spin)
    }

    fn roulette_take_pending(&mut self, task: TaskId) -> Option<RouletteSpin> {
        self.pending.remove(&task)
    }

    fn roulette_apply(&mut self, spin: &RouletteSpin) {
        self.applied.push(*spin);
    }

    fn fs_read(&mut self, path: &str, buf: &mut [u8]) -> Result<usize, ServiceError> {
        let data = self.files.get(path).ok_or(ServiceError::NotFound)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn fs_write(&mut self, path: &str, data: &[u8]) -> Result<usize, ServiceError> {
        self.files.insert(String::from(path), data.to_vec());
        Ok(data.len())
    }

    fn fs_stat(&mut self, path: &str) -> Result<Option<FsNode>, ServiceError> {
        if let Some(data) = self.files.get(path) {
            return Ok(Some(FsNode {
                kind: FsNodeKind::File,
                size: data.len() as u32,
            }));
        }
        Ok(self.dirs.iter().any(|dir| dir == path).then_some(FsNode {
            kind: FsNodeKind::Directory,
            size: 0,
        }))
    }

    fn fs_mkdir(&mut self, path: &str) -> Result<(), ServiceError> {
        if self.dirs.iter().any(|dir| dir == path) {
            return Err(ServiceError::Failed);
        }
        self.dirs.push(String::from(path));
        Ok(())
    }

    fn fs_unlink(&mut self, path: &str) -> Result<(), ServiceError> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or(ServiceError::NotFound)
    }

    /// Lists files directly under `path`.
    fn fs_list(&mut self, path: &str) -> Result<Vec<FsEntry>, ServiceError> {
        if path != "/" && !self.dirs.iter().any(|dir| dir == path) {
            return Err(ServiceError::NotFound);
        }
        let prefix = if path.ends_with('/') {
            String::from(path)
        } else {
            alloc::format!("{path}/")
        };
        Ok(self
            .files
            .iter()
            .filter_map(|(name, data)| {
                let rest = name.strip_prefix(prefix.as_str())?;
                (!rest.contains('/')).then(|| FsEntry {
                    name: String::from(rest),
                    node: FsNode {
                        kind: FsNodeKind::File,
                        size: data.len() as u32,
                    },
                })
            })
            .collect())
    }

    fn page_stats(&self) -> PageStats {
        self.pages
    }

    fn record_outcome(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }
}
