use core::slice;
use core::str;

use log::warn;

use crate::console;
use crate::fs;
use crate::param::NAMELEN;
use crate::process::PROC_TABLE;

pub const SYS_WRITE: usize = 1;
pub const SYS_READ: usize = 2;
pub const SYS_EXIT: usize = 3;
pub const SYS_GETPID: usize = 4;
pub const SYS_FORK: usize = 5;
pub const SYS_WAIT: usize = 6;
pub const SYS_EXEC: usize = 7;
pub const SYS_SBRK: usize = 8;
pub const SYS_PS: usize = 9;
pub const SYS_KILL: usize = 10;

pub type SysResult = Result<usize, &'static str>;

/// Decode and run a numbered syscall. The result lands in the caller's
/// saved a0: the value on success, -1 on any error. Exec never comes
/// through here; the trap dispatcher handles it because it rewrites the
/// program counter.
pub unsafe fn dispatch(num: usize, args: &[usize; 6], epc: usize) -> isize {
    let ret = match num {
        SYS_WRITE => sys_write(args),
        SYS_READ => sys_read(args),
        SYS_EXIT => PROC_TABLE.exit_current(),
        SYS_GETPID => sys_getpid(),
        SYS_FORK => sys_fork(epc),
        SYS_WAIT => sys_wait(),
        SYS_SBRK => sys_sbrk(args),
        SYS_PS => sys_ps(),
        SYS_KILL => sys_kill(args),
        _ => Err("unknown syscall"),
    };

    match ret {
        Ok(v) => v as isize,
        Err(msg) => {
            warn!("syscall {}: {}", num, msg);
            -1
        }
    }
}

/// Write `n` bytes from the caller's buffer to the UART.
fn sys_write(args: &[usize; 6]) -> SysResult {
    let buf = args[0] as *const u8;
    let n = args[1];
    if buf.is_null() {
        return Err("write: null buffer");
    }
    let bytes = unsafe { slice::from_raw_parts(buf, n) };
    for &c in bytes {
        console::putc(c);
    }
    Ok(n)
}

/// Blocking read of up to `n` bytes from the console.
fn sys_read(args: &[usize; 6]) -> SysResult {
    let buf = args[0] as *mut u8;
    let n = args[1];
    if buf.is_null() {
        return Err("read: null buffer");
    }
    let bytes = unsafe { slice::from_raw_parts_mut(buf, n) };
    Ok(console::read(bytes))
}

unsafe fn sys_getpid() -> SysResult {
    PROC_TABLE
        .current_pid()
        .map(|pid| pid as usize)
        .ok_or("getpid: no current process")
}

unsafe fn sys_fork(epc: usize) -> SysResult {
    match PROC_TABLE.fork(epc) {
        -1 => Err("fork: out of resources"),
        pid => Ok(pid as usize),
    }
}

unsafe fn sys_wait() -> SysResult {
    match PROC_TABLE.wait_and_reap() {
        -1 => Err("wait: no children"),
        pid => Ok(pid as usize),
    }
}

/// Resolve an exec target to its entry point and relabel the current
/// process. Returning the entry lets the trap dispatcher rewrite mepc.
pub unsafe fn sys_exec_lookup(args: &[usize; 6]) -> Option<usize> {
    let name_ptr = args[0] as *const u8;
    if name_ptr.is_null() {
        return None;
    }

    // NUL-terminated program name from the caller
    let mut name = [0u8; NAMELEN];
    let mut len = 0;
    while len < NAMELEN - 1 {
        let c = unsafe { *name_ptr.add(len) };
        if c == 0 {
            break;
        }
        name[len] = c;
        len += 1;
    }

    let name = &name[..len];
    let entry = match fs::lookup(name) {
        Some(entry) => entry,
        None => {
            warn!("exec: no program named {:?}", str::from_utf8(name).unwrap_or("?"));
            return None;
        }
    };

    if let Some(p) = PROC_TABLE.current_mut() {
        p.set_name(name);
        p.entrypoint = entry;
    }

    Some(entry)
}

/// Grow the caller's heap by `n` bytes; returns the old break.
unsafe fn sys_sbrk(args: &[usize; 6]) -> SysResult {
    PROC_TABLE.sbrk_current(args[0])
}

unsafe fn sys_ps() -> SysResult {
    PROC_TABLE.dump();
    Ok(0)
}

unsafe fn sys_kill(args: &[usize; 6]) -> SysResult {
    match PROC_TABLE.kill(args[0] as i32) {
        0 => Ok(0),
        _ => Err("kill: no such pid"),
    }
}
