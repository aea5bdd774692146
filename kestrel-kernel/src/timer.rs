//! Legacy 8259 PIC pair and 8254 PIT channel 0.
//!
//! The PIT drives the scheduler tick on IRQ 0, remapped to [`TIMER_VECTOR`].
//! Every other legacy line stays masked.

use core::sync::atomic::{AtomicU32, Ordering};

use log::debug;
use x86_64::instructions::port::Port;

pub const TIMER_VECTOR: u8 = 0x20;
pub const PIT_BASE_HZ: u32 = 1_193_182;
pub const DEFAULT_TICK_HZ: u32 = 100;

const PIC1_COMMAND: u16 = 0x20;
const PIC1_DATA: u16 = 0x21;
const PIC2_COMMAND: u16 = 0xa0;
const PIC2_DATA: u16 = 0xa1;
const PIC_EOI: u8 = 0x20;

const PIT_CHANNEL0: u16 = 0x40;
const PIT_COMMAND: u16 = 0x43;
/// Channel 0, lo/hi access, square wave, binary.
const PIT_MODE_SQUARE: u8 = 0x36;
const PIT_LATCH: u8 = 0x00;

static FREQUENCY_HZ: AtomicU32 = AtomicU32::new(DEFAULT_TICK_HZ);

fn outb(port: u16, value: u8) {
    unsafe { Port::new(port).write(value) }
}

fn inb(port: u16) -> u8 {
    unsafe { Port::new(port).read() }
}

fn io_wait() {
    outb(0x80, 0);
}

/// Remaps both PICs above the exception vectors, masks every line and
/// programs the PIT. The tick stays masked until [`set_irq_enabled`].
pub fn init(frequency_hz: u32) {
    outb(PIC1_COMMAND, 0x11);
    io_wait();
    outb(PIC2_COMMAND, 0x11);
    io_wait();
    outb(PIC1_DATA, TIMER_VECTOR);
    io_wait();
    outb(PIC2_DATA, TIMER_VECTOR + 8);
    io_wait();
    outb(PIC1_DATA, 4);
    io_wait();
    outb(PIC2_DATA, 2);
    io_wait();
    outb(PIC1_DATA, 0x01);
    io_wait();
    outb(PIC2_DATA, 0x01);
    io_wait();

    outb(PIC1_DATA, 0xff);
    outb(PIC2_DATA, 0xff);

    set_frequency(frequency_hz);
}

fn divisor_for(frequency_hz: u32) -> u16 {
    let hz = frequency_hz.clamp(1, PIT_BASE_HZ);
    (PIT_BASE_HZ / hz).clamp(1, 0xffff) as u16
}

pub fn set_frequency(frequency_hz: u32) {
    let divisor = divisor_for(frequency_hz);
    outb(PIT_COMMAND, PIT_MODE_SQUARE);
    outb(PIT_CHANNEL0, divisor as u8);
    outb(PIT_CHANNEL0, (divisor >> 8) as u8);
    io_wait();

    let actual = PIT_BASE_HZ / u32::from(divisor);
    FREQUENCY_HZ.store(actual, Ordering::Relaxed);
    debug!("PIT: frequency set to {actual} Hz");
}

pub fn frequency() -> u32 {
    FREQUENCY_HZ.load(Ordering::Relaxed)
}

/// Unmasks or masks IRQ 0.
pub fn set_irq_enabled(enabled: bool) {
    let mask = inb(PIC1_DATA);
    let mask = if enabled { mask & !0x01 } else { mask | 0x01 };
    outb(PIC1_DATA, mask);
}

pub fn end_of_interrupt() {
    outb(PIC1_COMMAND, PIC_EOI);
}

/// Ticks covering at least `ms` milliseconds.
pub fn ms_to_ticks(ms: u32) -> u64 {
    (u64::from(ms) * u64::from(frequency())).div_ceil(1000)
}

fn read_count() -> u16 {
    outb(PIT_COMMAND, PIT_LATCH);
    let low = inb(PIT_CHANNEL0);
    let high = inb(PIT_CHANNEL0);
    u16::from_le_bytes([low, high])
}

/// Busy-waits on the PIT counter. Works with interrupts disabled.
pub fn poll_delay_ms(ms: u32) {
    let needed = u64::from(ms) * u64::from(PIT_BASE_HZ) / 1000;
    let reload = divisor_for(frequency());
    let mut last = read_count();
    let mut elapsed = 0u64;
    while elapsed < needed {
        let current = read_count();
        elapsed += if current <= last {
            u64::from(last - current)
        } else {
            // Reloaded past zero.
            u64::from(last) + u64::from(reload.saturating_sub(current))
        };
        last = current;
        core::hint::spin_loop();
    }
}
