use core::alloc::Layout;
use core::ptr;

use linked_list_allocator::LockedHeap;
use log::info;

use crate::param::{align_up, PAGESIZE};
use crate::spinlock::SpinLock;

// Small fixed heap backing `alloc::` (boxed buffers, the program
// catalog). Kernel objects and user pages come from the frame pool
// below, never from here.
const KHEAP_SIZE: usize = 256 * 1024;

#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

static mut KHEAP: [u8; KHEAP_SIZE] = [0; KHEAP_SIZE];

#[alloc_error_handler]
fn alloc_error_handler(layout: Layout) -> ! {
    panic!("allocation error: {:?}", layout)
}

pub fn heap_init() {
    unsafe {
        ALLOCATOR.lock().init(KHEAP.as_mut_ptr() as usize, KHEAP_SIZE);
    }
}

/// Free frames form a singly linked list threaded through the first
/// bytes of each free frame.
#[repr(C)]
struct Frame {
    next: *mut Frame,
}

struct FreeList {
    head: *mut Frame,
    nfree: usize,
    start: usize,
    end: usize,
}

unsafe impl Send for FreeList {}

static FREE_LIST: SpinLock<FreeList> = SpinLock::new(FreeList {
    head: ptr::null_mut(),
    nfree: 0,
    start: 0,
    end: 0,
});

/// Hand the frame pool every whole page in `[start, end)`. `start` is
/// aligned up; the list ends up in ascending address order.
pub fn kinit(start: usize, end: usize) {
    let start = align_up(start, PAGESIZE);
    let mut list = FREE_LIST.lock();
    list.start = start;
    list.end = end;

    let npages = (end - start) / PAGESIZE;
    let mut pa = start + npages * PAGESIZE;
    while pa > start {
        pa -= PAGESIZE;
        let frame = pa as *mut Frame;
        unsafe { (*frame).next = list.head };
        list.head = frame;
        list.nfree += 1;
    }

    info!(
        "kalloc: {} free pages in [{:#x}, {:#x})",
        list.nfree, start, end
    );
}

/// Allocate one 4096-byte page of physical memory.
/// Returns null when the pool is exhausted; contents are unspecified.
pub fn kalloc() -> *mut u8 {
    let mut list = FREE_LIST.lock();
    let frame = list.head;
    if frame.is_null() {
        return ptr::null_mut();
    }
    list.head = unsafe { (*frame).next };
    list.nfree -= 1;
    frame as *mut u8
}

/// Return a frame previously handed out by `kalloc`.
pub fn kfree(pa: *mut u8) {
    let pa = pa as usize;
    let mut list = FREE_LIST.lock();
    if pa % PAGESIZE != 0 || pa < list.start || pa >= list.end {
        panic!("kfree: bad frame {:#x}", pa);
    }
    let frame = pa as *mut Frame;
    unsafe { (*frame).next = list.head };
    list.head = frame;
    list.nfree += 1;
}

/// Allocate a zeroed frame.
pub fn kalloc_zeroed() -> *mut u8 {
    let pa = kalloc();
    if !pa.is_null() {
        unsafe { ptr::write_bytes(pa, 0, PAGESIZE) };
    }
    pa
}

pub fn free_pages() -> usize {
    FREE_LIST.lock().nfree
}

pub mod tests {
    use super::*;

    pub fn tests() -> &'static [(&'static str, fn())] {
        &[
            ("alloc_is_page_aligned", alloc_is_page_aligned),
            ("free_then_alloc_reuses", free_then_alloc_reuses),
            ("zeroed_alloc", zeroed_alloc),
        ]
    }

    fn alloc_is_page_aligned() {
        let pa = kalloc();
        assert!(!pa.is_null());
        assert_eq!(pa as usize % PAGESIZE, 0);
        kfree(pa);
    }

    fn free_then_alloc_reuses() {
        crate::cpu::push_off();
        let pa = kalloc();
        assert!(!pa.is_null());
        let before = free_pages();
        kfree(pa);
        assert_eq!(free_pages(), before + 1);
        // the list head is the most recently freed frame
        let again = kalloc();
        assert_eq!(again, pa);
        kfree(again);
        crate::cpu::pop_off();
    }

    fn zeroed_alloc() {
        let pa = kalloc_zeroed();
        assert!(!pa.is_null());
        let page = unsafe { core::slice::from_raw_parts(pa, PAGESIZE) };
        assert!(page.iter().all(|&b| b == 0));
        kfree(pa);
    }
}
