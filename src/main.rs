#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(osmium::test_runner)]
#![reexport_test_harness_main = "test_main"]

use core::panic::PanicInfo;
use core::sync::atomic::Ordering;

use osmium::register::mstatus;
use osmium::{bootstrap, proc, println, PANICKED};

/// entry.S jumps here in machine mode with interrupts disabled.
#[no_mangle]
unsafe extern "C" fn kmain() -> ! {
    bootstrap();

    #[cfg(test)]
    test_main();

    // hand the hart over: the timer drives scheduling from here on
    mstatus::intr_on();
    loop {
        proc::wfi();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo<'_>) -> ! {
    PANICKED.store(true, Ordering::Relaxed);
    println!("{}", info);
    loop {
        proc::wfi();
    }
}
