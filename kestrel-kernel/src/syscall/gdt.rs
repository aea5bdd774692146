//! GDT, TSS and segment selectors.
//!
//! Layout: kernel code, kernel data, TSS (two slots), user data, user code.
//! User data precedes user code so the selectors come out as 0x2b and 0x33.

use core::sync::atomic::{AtomicU16, Ordering};

use log::debug;
use spinning_top::Spinlock;
use x86_64::{
    VirtAddr,
    instructions::tables::load_tss,
    registers::segmentation::{CS, DS, ES, SS, Segment},
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable},
        tss::TaskStateSegment,
    },
};

use crate::platform::Selectors;

/// IST slot of the double-fault handler.
pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;

static GDT: Spinlock<GlobalDescriptorTable> = Spinlock::new(GlobalDescriptorTable::new());
static TSS: Spinlock<TaskStateSegment> = Spinlock::new(TaskStateSegment::new());

static KERNEL_CS_SELECTOR: AtomicU16 = AtomicU16::new(0);
static KERNEL_DS_SELECTOR: AtomicU16 = AtomicU16::new(0);
static USER_CS_SELECTOR: AtomicU16 = AtomicU16::new(0);
static USER_DS_SELECTOR: AtomicU16 = AtomicU16::new(0);

#[repr(align(0x1000))]
struct KernelStack {
    inner: [u8; 0x10000],
}

impl KernelStack {
    fn top(&self) -> VirtAddr {
        VirtAddr::from_ptr(self.inner.as_ptr()) + self.inner.len() as u64
    }
}

/// Entry stack while a kernel task runs, and the boot context's.
static DEFAULT_ENTRY_STACK: KernelStack = KernelStack {
    inner: [0; 0x10000],
};

static DOUBLE_FAULT_STACK: KernelStack = KernelStack {
    inner: [0; 0x10000],
};

/// Loads the GDT and TSS and reloads the segment registers.
pub fn init() {
    let mut tss = TSS.lock();
    tss.privilege_stack_table[0] = DEFAULT_ENTRY_STACK.top();
    tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] = DOUBLE_FAULT_STACK.top();
    debug!(
        "GDT: rsp0 = {:#x}, double-fault IST = {:#x}",
        DEFAULT_ENTRY_STACK.top(),
        DOUBLE_FAULT_STACK.top()
    );
    drop(tss);

    let mut gdt = GDT.lock();
    let kernel_cs = gdt.append(Descriptor::kernel_code_segment());
    let kernel_ds = gdt.append(Descriptor::kernel_data_segment());
    let tss_sel = gdt.append(Descriptor::tss_segment(unsafe { &*TSS.data_ptr() }));
    let user_ds = gdt.append(Descriptor::user_data_segment());
    let user_cs = gdt.append(Descriptor::user_code_segment());
    drop(gdt);

    KERNEL_CS_SELECTOR.store(kernel_cs.0, Ordering::Relaxed);
    KERNEL_DS_SELECTOR.store(kernel_ds.0, Ordering::Relaxed);
    USER_CS_SELECTOR.store(user_cs.0, Ordering::Relaxed);
    USER_DS_SELECTOR.store(user_ds.0, Ordering::Relaxed);

    unsafe {
        (*GDT.data_ptr()).load();
        CS::set_reg(kernel_cs);
        DS::set_reg(kernel_ds);
        ES::set_reg(kernel_ds);
        SS::set_reg(kernel_ds);
        load_tss(tss_sel);
    }
}

/// Selectors chosen by [`init`].
pub fn selectors() -> Selectors {
    Selectors {
        kernel_code: KERNEL_CS_SELECTOR.load(Ordering::Relaxed),
        kernel_data: KERNEL_DS_SELECTOR.load(Ordering::Relaxed),
        user_code: USER_CS_SELECTOR.load(Ordering::Relaxed),
        user_data: USER_DS_SELECTOR.load(Ordering::Relaxed),
    }
}

/// Sets TSS.RSP0, the stack the CPU loads on a ring 3 to ring 0 transition.
pub fn set_entry_stack(top: VirtAddr) {
    TSS.lock().privilege_stack_table[0] = top;
}

pub fn default_entry_stack() -> VirtAddr {
    DEFAULT_ENTRY_STACK.top()
}
