//! The interactive shell: parses one-line commands and drives the
//! kernel through the syscall wrappers.

use core::fmt::{self, Write};

use super::progs;
use super::syscall;

/// Console output through the write syscall.
pub struct Stdout;

impl fmt::Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        syscall::write(s.as_bytes());
        Ok(())
    }
}

macro_rules! shprintln {
    ($($arg:tt)*) => {{
        let _ = writeln!(Stdout, $($arg)*);
    }};
}

pub extern "C" fn shell_main() -> ! {
    shprintln!("");
    shprintln!("osmium shell (pid {}); type 'help'", syscall::getpid());

    let mut line = [0u8; 128];
    loop {
        syscall::write(b"osmium$ ");
        let n = syscall::read(&mut line);
        if n <= 0 {
            continue;
        }
        let line = match core::str::from_utf8(&line[..n as usize]) {
            Ok(s) => s.trim(),
            Err(_) => {
                shprintln!("shell: not utf-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }

        let mut words = line.split_whitespace();
        let cmd = words.next().unwrap_or("");
        match cmd {
            "help" => help(),
            "ps" => {
                syscall::ps();
            }
            "getpid" => {
                shprintln!("{}", syscall::getpid());
            }
            "echo" => {
                let rest = line[4..].trim_start();
                shprintln!("{}", rest);
            }
            "run" => match words.next() {
                Some(name) => run(name, true),
                None => shprintln!("usage: run <program>"),
            },
            "bg" => match words.next() {
                Some(name) => run(name, false),
                // no program named: park a background worker
                None => run("worker", false),
            },
            "exec" => match words.next() {
                Some(name) => {
                    if syscall::exec(name) < 0 {
                        shprintln!("exec: {} not found", name);
                    }
                }
                None => shprintln!("usage: exec <program>"),
            },
            "wait" => {
                shprintln!("wait: {}", syscall::wait());
            }
            "kill" => match words.next().and_then(|w| w.parse::<isize>().ok()) {
                Some(pid) => {
                    if syscall::kill(pid) < 0 {
                        shprintln!("kill: no such pid");
                    }
                }
                None => shprintln!("usage: kill <pid>"),
            },
            "sbrk" => match words.next().and_then(|w| w.parse::<usize>().ok()) {
                Some(n) => {
                    let old = syscall::sbrk(n);
                    if old < 0 {
                        shprintln!("sbrk: failed");
                    } else {
                        shprintln!("old break: {:#x}", old);
                    }
                }
                None => shprintln!("usage: sbrk <bytes>"),
            },
            "selftest" => crate::test::run_tests(),
            "shutdown" => crate::power_off(),
            "exit" => syscall::exit(),
            _ => shprintln!("shell: unknown command '{}'", cmd),
        }
    }
}

fn help() {
    shprintln!("commands:");
    shprintln!("  help              this text");
    shprintln!("  ps                dump the process table");
    shprintln!("  getpid            print the shell's pid");
    shprintln!("  echo <text>       print <text>");
    shprintln!("  run <prog>        fork, exec <prog>, wait for it");
    shprintln!("  bg [prog]         fork and exec <prog> without waiting;");
    shprintln!("                    with no argument, park a background worker");
    shprintln!("  exec <prog>       replace the shell with <prog>");
    shprintln!("  wait              reap one child");
    shprintln!("  kill <pid>        kill a process");
    shprintln!("  sbrk <bytes>      grow the heap");
    shprintln!("  selftest          run the in-kernel test suites");
    shprintln!("  shutdown          free everything and power off");
    shprintln!("  exit              exit the shell");
    shprintln!("programs:");
    for &(name, _) in progs::BUILTINS {
        shprintln!("  {}", name);
    }
}

/// fork + exec; with `fg` the shell waits for the child.
fn run(name: &str, fg: bool) {
    let pid = syscall::fork();
    if pid < 0 {
        shprintln!("run: fork failed");
        return;
    }
    if pid == 0 {
        if syscall::exec(name) < 0 {
            shprintln!("run: {} not found", name);
        }
        // only reached when exec failed
        syscall::exit();
    }
    if fg {
        syscall::wait();
    } else {
        shprintln!("[{}] started", pid);
    }
}
