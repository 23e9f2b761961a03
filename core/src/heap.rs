//! Firmware heap.
//!
//! A linked-list allocator over a static buffer. With the
//! `global_allocator` feature it backs `alloc` for the whole image; the
//! heap must be initialized with [`init`] before the first allocation.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

use linked_list_allocator::Heap;
use spin::Mutex;

/// Heap size: 4MB
pub const HEAP_SIZE: usize = 4 * 1024 * 1024;

/// Page-aligned heap buffer
#[repr(C, align(4096))]
struct AlignedHeapBuffer([u8; HEAP_SIZE]);

/// Static heap buffer - lives in .bss, zero-initialized
static mut HEAP_BUFFER: AlignedHeapBuffer = AlignedHeapBuffer([0u8; HEAP_SIZE]);

static HEAP: Mutex<Heap> = Mutex::new(Heap::empty());

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Hand the static buffer to the allocator. Later calls do nothing.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    unsafe {
        let start = ptr::addr_of_mut!(HEAP_BUFFER) as *mut u8;
        HEAP.lock().init(start, HEAP_SIZE);
    }
    log::debug!("[HEAP] {} KiB at {:p}", HEAP_SIZE / 1024, unsafe {
        ptr::addr_of!(HEAP_BUFFER)
    });
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

pub fn free_bytes() -> usize {
    HEAP.lock().free()
}

pub fn used_bytes() -> usize {
    HEAP.lock().used()
}

/// Allocator over the static heap.
pub struct FirmwareAllocator;

unsafe impl GlobalAlloc for FirmwareAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        HEAP.lock()
            .allocate_first_fit(layout)
            .map_or(ptr::null_mut(), |p| p.as_ptr())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            HEAP.lock().deallocate(ptr, layout);
        }
    }
}

#[cfg_attr(all(feature = "global_allocator", not(test)), global_allocator)]
static ALLOCATOR: FirmwareAllocator = FirmwareAllocator;

/// Allocator instance, for callers that allocate raw memory explicitly.
pub fn allocator() -> &'static FirmwareAllocator {
    &ALLOCATOR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_accounted() {
        init();
        init();
        assert!(is_initialized());

        let layout = Layout::from_size_align(1024, 16).unwrap();
        let before = used_bytes();
        let p = unsafe { allocator().alloc(layout) };
        assert!(!p.is_null());
        assert_eq!(p as usize % 16, 0);
        assert!(used_bytes() >= before + 1024);
        assert_eq!(used_bytes() + free_bytes(), HEAP_SIZE);

        unsafe { allocator().dealloc(p, layout) };
        assert_eq!(used_bytes(), before);
    }
}
