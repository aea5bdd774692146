//! IDT and trap entry stubs.
//!
//! Every vector the kernel handles enters through a naked stub that builds a
//! [`TrapFrame`] on the current stack and calls [`crate::kernel::handle_trap`].
//! When the handler returns, the (possibly edited) frame is restored and
//! `iretq` resumes the interrupted code.

use core::arch::naked_asm;

use kestrel_abi::SYSCALL_VECTOR;
use spinning_top::Spinlock;
use x86_64::{
    PrivilegeLevel, VirtAddr,
    structures::{
        gdt::SegmentSelector,
        idt::{Entry, EntryOptions, InterruptDescriptorTable},
    },
};

use crate::syscall::gdt::{self, DOUBLE_FAULT_IST_INDEX};
use crate::task::TrapFrame;
use crate::timer::TIMER_VECTOR;

static DESCRIPTOR_TABLE: Spinlock<InterruptDescriptorTable> =
    Spinlock::new(InterruptDescriptorTable::new());

/// Stub for a vector without a CPU error code: a zero is pushed in its place.
macro_rules! trap_stub {
    ($name:ident, $vector:expr) => {
        #[unsafe(naked)]
        extern "sysv64" fn $name() {
            naked_asm!(
                "push 0",
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            )
        }
    };
    ($name:ident, $vector:expr, error_code) => {
        #[unsafe(naked)]
        extern "sysv64" fn $name() {
            naked_asm!(
                "push {vector}",
                "jmp {common}",
                vector = const $vector,
                common = sym trap_common,
            )
        }
    };
}

trap_stub!(invalid_opcode_entry, 6);
trap_stub!(device_not_available_entry, 7);
trap_stub!(double_fault_entry, 8, error_code);
trap_stub!(general_protection_entry, 13, error_code);
trap_stub!(page_fault_entry, 14, error_code);
trap_stub!(timer_entry, TIMER_VECTOR);
trap_stub!(syscall_entry, SYSCALL_VECTOR);

/// Pushes the GPRs in `SavedGprs` order and hands the frame to Rust.
#[unsafe(naked)]
extern "sysv64" fn trap_common() {
    naked_asm!(
        "push rax",
        "push rbx",
        "push rcx",
        "push rdx",
        "push rsi",
        "push rdi",
        "push rbp",
        "push r8",
        "push r9",
        "push r10",
        "push r11",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov rdi, rsp",
        "cld",
        "call {dispatch}",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop r11",
        "pop r10",
        "pop r9",
        "pop r8",
        "pop rbp",
        "pop rdi",
        "pop rsi",
        "pop rdx",
        "pop rcx",
        "pop rbx",
        "pop rax",
        // Vector and error code.
        "add rsp, 16",
        "iretq",
        dispatch = sym trap_dispatch,
    )
}

extern "sysv64" fn trap_dispatch(frame: *mut TrapFrame) {
    let frame = unsafe { &mut *frame };
    crate::kernel::handle_trap(frame);
}

fn install<F>(
    entry: &mut Entry<F>,
    stub: extern "sysv64" fn(),
    ring: PrivilegeLevel,
) -> &mut EntryOptions {
    let kernel_cs = SegmentSelector(gdt::selectors().kernel_code);
    unsafe {
        entry
            .set_handler_addr(VirtAddr::new(stub as usize as u64))
            .set_code_selector(kernel_cs)
            .set_privilege_level(ring)
    }
}

/// Builds and loads the IDT. Must run after `gdt::init`.
pub fn init() {
    let mut idt = DESCRIPTOR_TABLE.lock();

    install(&mut idt.invalid_opcode, invalid_opcode_entry, PrivilegeLevel::Ring0);
    install(
        &mut idt.device_not_available,
        device_not_available_entry,
        PrivilegeLevel::Ring0,
    );
    unsafe {
        install(&mut idt.double_fault, double_fault_entry, PrivilegeLevel::Ring0)
            .set_stack_index(DOUBLE_FAULT_IST_INDEX);
    }
    install(
        &mut idt.general_protection_fault,
        general_protection_entry,
        PrivilegeLevel::Ring0,
    );
    install(&mut idt.page_fault, page_fault_entry, PrivilegeLevel::Ring0);
    install(&mut idt[TIMER_VECTOR], timer_entry, PrivilegeLevel::Ring0);
    // The only gate user code may raise explicitly.
    install(&mut idt[SYSCALL_VECTOR], syscall_entry, PrivilegeLevel::Ring3);
    drop(idt);

    unsafe {
        (*DESCRIPTOR_TABLE.data_ptr()).load();
    }
}
