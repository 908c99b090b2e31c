//! Demo programs reachable through exec. Each entry is a process entry
//! point registered in the program catalog at boot.

use core::fmt::Write;

use super::shell;
use super::syscall;
use crate::user::shell::Stdout;

pub type ProgEntry = extern "C" fn() -> !;

pub const BUILTINS: &[(&str, ProgEntry)] = &[
    ("shell", shell::shell_main),
    ("hello", hello),
    ("count", count),
    ("forktest", forktest),
    ("memtest", memtest),
    ("spin", spin),
    ("worker", worker),
];

fn delay() {
    for _ in 0..5_000_000u64 {
        core::hint::spin_loop();
    }
}

extern "C" fn hello() -> ! {
    let mut out = Stdout;
    let _ = writeln!(out, "hello, world (pid {})", syscall::getpid());
    syscall::exit();
}

/// CPU-bound counter; with two of these running, interleaved tags show
/// the timer slicing the hart.
extern "C" fn count() -> ! {
    let mut out = Stdout;
    let pid = syscall::getpid();
    for i in 1..=5 {
        let _ = writeln!(out, "count[{}]: {}", pid, i);
        delay();
    }
    syscall::exit();
}

/// fork returns twice: the child writes a tag and exits, the parent
/// reaps it.
extern "C" fn forktest() -> ! {
    let mut out = Stdout;
    let pid = syscall::fork();
    if pid == 0 {
        syscall::write(b"C\n");
        syscall::exit();
    }
    let reaped = syscall::wait();
    let _ = writeln!(out, "forktest: forked {}, reaped {}", pid, reaped);
    syscall::exit();
}

/// Grow the heap and scribble over it.
extern "C" fn memtest() -> ! {
    let mut out = Stdout;
    let old = syscall::sbrk(8192);
    if old < 0 {
        let _ = writeln!(out, "memtest: sbrk failed");
        syscall::exit();
    }
    let heap = unsafe { core::slice::from_raw_parts_mut(old as *mut u8, 8192) };
    for (i, b) in heap.iter_mut().enumerate() {
        *b = i as u8;
    }
    let ok = heap.iter().enumerate().all(|(i, &b)| b == i as u8);
    let _ = writeln!(
        out,
        "memtest: break {:#x}, 8192 bytes {}",
        old,
        if ok { "verified" } else { "CORRUPT" }
    );
    syscall::exit();
}

/// Busy loop until killed.
extern "C" fn spin() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// A background worker: parks itself on the blocked list so it exists
/// without consuming CPU. A wake-up just parks it again; kill reclaims
/// it. Shows up as blocked in ps.
extern "C" fn worker() -> ! {
    let mut out = Stdout;
    let _ = writeln!(out, "worker[{}]: parked", syscall::getpid());
    loop {
        unsafe { crate::process::PROC_TABLE.suspend_current() };
    }
}
