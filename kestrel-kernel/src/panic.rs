#[panic_handler]
#[cfg(not(test))]
fn panic(info: &core::panic::PanicInfo) -> ! {
    use log::error;

    use crate::qemu::{QemuExitCode, exit_qemu};

    x86_64::instructions::interrupts::disable();

    let file = info.location().map(|l| l.file()).unwrap_or("unknown");
    let line = info.location().map(|l| l.line()).unwrap_or(0);

    // The panicking code may hold the scheduler.
    let task = crate::kernel::SCHEDULER
        .try_lock()
        .and_then(|guard| guard.as_ref().and_then(|s| s.current_task()));

    match task {
        Some(task) => error!("PANIC in task {task} at [{file}:{line}]:\n{}", info.message()),
        None => error!("PANIC at [{file}:{line}]:\n{}", info.message()),
    }
    exit_qemu(QemuExitCode::Failed)
}
