use core::arch::asm;
use core::str;

use crate::param::NAMELEN;
use crate::process::PROC_TABLE;
use crate::register::mstatus;

/// Saved register image of a process. The layout is ABI with swtch.S:
/// `switch_context` saves/restores ra, sp, the callee-saved registers
/// and the trap CSRs; the caller-saved slots hold the trap-time mirror
/// written on ecall entry so fork copies the live caller state, and are
/// reloaded by `restore_image_ret` on a process's first activation.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RegState {
    /*   0 */ pub ra: usize,
    /*   8 */ pub sp: usize,
    /*  16 */ s0: usize,
    /*  24 */ s1: usize,
    /*  32 */ s2: usize,
    /*  40 */ s3: usize,
    /*  48 */ s4: usize,
    /*  56 */ s5: usize,
    /*  64 */ s6: usize,
    /*  72 */ s7: usize,
    /*  80 */ s8: usize,
    /*  88 */ s9: usize,
    /*  96 */ s10: usize,
    /* 104 */ s11: usize,
    /* 112 */ pub t0: usize,
    /* 120 */ pub t1: usize,
    /* 128 */ pub t2: usize,
    /* 136 */ pub a0: usize,
    /* 144 */ pub a1: usize,
    /* 152 */ pub a2: usize,
    /* 160 */ pub a3: usize,
    /* 168 */ pub a4: usize,
    /* 176 */ pub a5: usize,
    /* 184 */ pub a6: usize,
    /* 192 */ pub a7: usize,
    /* 200 */ pub sepc: usize,
    /* 208 */ pub mstatus: usize,
}

impl RegState {
    pub const fn new() -> Self {
        Self {
            ra: 0,
            sp: 0,
            s0: 0,
            s1: 0,
            s2: 0,
            s3: 0,
            s4: 0,
            s5: 0,
            s6: 0,
            s7: 0,
            s8: 0,
            s9: 0,
            s10: 0,
            s11: 0,
            t0: 0,
            t1: 0,
            t2: 0,
            a0: 0,
            a1: 0,
            a2: 0,
            a3: 0,
            a4: 0,
            a5: 0,
            a6: 0,
            a7: 0,
            sepc: 0,
            mstatus: 0,
        }
    }

    /// The image a new process starts from: first activation lands in
    /// forkret, which mrets into `entry` on `stacktop` with interrupts
    /// enabled.
    pub fn init_for(&mut self, entry: usize, stacktop: usize) {
        *self = Self::new();
        self.ra = forkret as usize;
        self.sepc = entry;
        self.sp = stacktop;
        self.mstatus = mstatus::initial_image();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Ready,
    Running,
    Blocked,
    Terminated,
}

impl ProcState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcState::Ready => "ready",
            ProcState::Running => "running",
            ProcState::Blocked => "blocked",
            ProcState::Terminated => "zombie",
        }
    }
}

/// Process control block. All PCBs live in the fixed process table;
/// the scheduler's sets hold slot indices, so a PCB can be in at most
/// one of them by construction.
pub struct Pcb {
    pub used: bool,
    pub pid: i32,
    pub ppid: i32,
    pub name: [u8; NAMELEN],
    pub state: ProcState,
    pub priority: i32,
    pub entrypoint: usize,
    pub regstate: RegState,
    /// top of the single 4 KiB kernel/user stack
    pub stacktop: usize,
    /// per-process user heap: base VA and current size in bytes
    pub brk_base: usize,
    pub brk_size: usize,
    /// wait channel while blocked; 0 when not waiting on one
    pub chan: usize,
}

impl Pcb {
    pub const fn new() -> Self {
        Self {
            used: false,
            pid: 0,
            ppid: 0,
            name: [0; NAMELEN],
            state: ProcState::Ready,
            priority: 0,
            entrypoint: 0,
            regstate: RegState::new(),
            stacktop: 0,
            brk_base: 0,
            brk_size: 0,
            chan: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Copy `name`, truncated to NAMELEN-1 bytes, always NUL-terminated.
    pub fn set_name(&mut self, name: &[u8]) {
        let n = name.len().min(NAMELEN - 1);
        self.name[..n].copy_from_slice(&name[..n]);
        self.name[n] = 0;
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(0);
        str::from_utf8(&self.name[..len]).unwrap_or("?")
    }
}

extern "C" {
    /// Save callee-saved registers, sp and trap CSRs into `old`, restore
    /// them from `new` and return through `new.ra`.
    pub fn switch_context(old: *mut RegState, new: *const RegState);
    fn restore_image_ret(rs: *const RegState) -> !;
}

/// First return out of `switch_context` for a freshly created PCB:
/// reload the caller-saved image and mret into sepc. MPIE in the saved
/// mstatus re-enables interrupts on the way out.
#[no_mangle]
pub extern "C" fn forkret() -> ! {
    unsafe {
        let rs = PROC_TABLE.current_regstate();
        restore_image_ret(rs)
    }
}

/// The distinguished pid-0 process: parks the hart until the timer hands
/// control to somebody runnable.
pub extern "C" fn idle_entry() -> ! {
    loop {
        mstatus::intr_on();
        wfi();
    }
}

#[inline]
pub fn wfi() {
    unsafe { asm!("wfi") };
}
