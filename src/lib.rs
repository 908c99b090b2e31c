#![no_std]
#![cfg_attr(test, no_main)]
#![feature(alloc_error_handler)]
#![feature(custom_test_frameworks)]
#![test_runner(crate::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

pub mod printf;

pub mod console;
pub mod cpu;
pub mod fs;
pub mod kalloc;
pub mod logger;
pub mod page_table;
pub mod param;
pub mod plic;
pub mod proc;
pub mod process;
pub mod register;
pub mod spinlock;
pub mod syscall;
pub mod test;
pub mod trap;
pub mod uart;
pub mod user;
pub mod virtio;
pub mod vm;

use core::ptr;
use core::sync::atomic::AtomicBool;

use process::PROC_TABLE;
use register::mstatus;

pub static PANICKED: AtomicBool = AtomicBool::new(false);

// boot stack, handed to sp by entry.S before any Rust runs
#[no_mangle]
static mut BOOT_STACK: [u8; 4096 * 4] = [0; 4096 * 4];

extern "C" {
    fn _heap_start();
    fn _heap_end();
}

/// Bring the machine up, leaving interrupts disabled. The caller turns
/// them on and parks; from then on everything is interrupt-driven.
pub unsafe fn bootstrap() {
    console::init();
    logger::init();
    trap::init();
    plic::init();
    kalloc::heap_init();
    kalloc::kinit(_heap_start as usize, _heap_end as usize);
    vm::init();
    vm::activate();
    PROC_TABLE.init();
    virtio::init();
    fs::init();

    if PROC_TABLE.create(b"shell", user::shell::shell_main as usize, 0).is_none() {
        panic!("failed to create shell process");
    }

    log::info!("welcome to osmium");
}

/// Free every process and power the machine off through the sifive test
/// device.
pub fn power_off() -> ! {
    mstatus::intr_off();
    unsafe {
        PROC_TABLE.shutdown_all();
    }
    log::info!("power off");
    qemu_exit(QemuExit::Pass)
}

pub enum QemuExit {
    Pass,
    Fail,
}

/// Tell qemu to exit; only works on the virt machine.
pub fn qemu_exit(how: QemuExit) -> ! {
    let code: u32 = match how {
        QemuExit::Pass => 0x5555,
        QemuExit::Fail => (1 << 16) | 0x3333,
    };
    unsafe {
        ptr::write_volatile(param::QEMU_TEST_FINISHER as *mut u32, code);
    }
    loop {
        proc::wfi();
    }
}

pub fn test_runner(tests: &[&dyn Fn()]) {
    println!("running {} tests", tests.len());
    for t in tests {
        t();
    }
    println!("\x1b[0;32mall tests passed!\x1b[0m");
    qemu_exit(QemuExit::Pass)
}

pub fn test_panic_handler(info: &core::panic::PanicInfo) -> ! {
    use core::sync::atomic::Ordering;
    PANICKED.store(true, Ordering::Relaxed);
    println!("\x1b[0;31mtest failed\x1b[0m: {}", info);
    qemu_exit(QemuExit::Fail)
}

#[cfg(test)]
#[no_mangle]
unsafe fn kmain() -> ! {
    bootstrap();
    test_main();
    loop {
        proc::wfi();
    }
}

#[cfg(test)]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    test_panic_handler(info)
}
