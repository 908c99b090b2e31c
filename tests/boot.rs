#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(osmium::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use core::panic::PanicInfo;

use alloc::boxed::Box;

use osmium::page_table::MapFlags;
use osmium::param::PAGESIZE;
use osmium::{kalloc, vm};

#[no_mangle]
unsafe extern "C" fn kmain() -> ! {
    osmium::bootstrap();
    test_main();
    loop {
        osmium::proc::wfi();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    osmium::test_panic_handler(info)
}

// a VA outside RAM and every MMIO window
fn scratch_va() -> usize {
    0x9000_0000
}

#[test_case]
fn kernel_heap_allocation() {
    let v1 = Box::new(41);
    let v2 = Box::new(13);
    assert_eq!(*v1, 41);
    assert_eq!(*v2, 13);
}

#[test_case]
fn frame_round_trip() {
    let pa = kalloc::kalloc();
    assert!(!pa.is_null());
    assert_eq!(pa as usize % PAGESIZE, 0);
    kalloc::kfree(pa);
}

#[test_case]
fn map_then_translate() {
    let va = scratch_va();
    let pa = kalloc::kalloc();
    assert!(!pa.is_null());
    vm::map(va, pa as usize, MapFlags::RW | MapFlags::USER).unwrap();
    assert_eq!(vm::translate(va), Some(pa as usize));
    assert_eq!(vm::translate(va + 0xabc), Some(pa as usize + 0xabc));
    vm::unmap(va, true).unwrap();
    assert!(vm::translate(va).is_none());
}

#[test_case]
fn unmapped_frame_is_reusable() {
    let va = scratch_va();
    let pa = kalloc::kalloc();
    assert!(!pa.is_null());
    vm::map(va, pa as usize, MapFlags::RW).unwrap();
    vm::unmap(va, true).unwrap();
    // the frame is back at the head of the free list
    let again = kalloc::kalloc();
    assert_eq!(again, pa);
    kalloc::kfree(again);
}

#[test_case]
fn in_kernel_suites() {
    osmium::test::run_tests();
}
