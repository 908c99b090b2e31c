use crate::{kalloc, println, process, vm};

/// Run every in-kernel suite against the live kernel. Reached from the
/// shell's `selftest` command and from the boot test harness.
pub fn run_tests() {
    type TestSuite = fn() -> &'static [(&'static str, fn())];
    let suites = [
        ("kalloc", kalloc::tests::tests as TestSuite),
        ("vm", vm::tests::tests as TestSuite),
        ("process", process::tests::tests as TestSuite),
    ];

    for (name, suite) in &suites {
        let tests = suite();
        println!("  {}", name);
        for (name, f) in tests {
            println!("      {}", name);
            f();
        }
    }
    println!("\x1b[0;32mall tests passed!\x1b[0m");
}
