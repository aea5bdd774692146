//! Kernel heap backing `alloc`: task stacks, the task table and the
//! exit-context box all come from here.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static GLOBAL_ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Byte counters of the kernel heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapUsage {
    pub size: usize,
    pub used: usize,
    pub free: usize,
}

/// # Safety
/// `[heap_start, heap_start + heap_size)` must be mapped, writable and
/// unused. Call once, before the first allocation.
pub unsafe fn init(heap_start: usize, heap_size: usize) {
    unsafe {
        GLOBAL_ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
    }
}

pub fn usage() -> HeapUsage {
    let heap = GLOBAL_ALLOCATOR.lock();
    HeapUsage {
        size: heap.size(),
        used: heap.used(),
        free: heap.free(),
    }
}
