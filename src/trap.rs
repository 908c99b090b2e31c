use log::{error, trace, warn};

use crate::param::{QUANTUM, UART0_IRQ, VIRTIO_IRQ_MAX};
use crate::process::PROC_TABLE;
use crate::register::{clint, mcause, mhartid, mie, mstatus, mtval, mtvec};
use crate::{plic, proc, syscall, uart, virtio};

/// Install the trap vector and arm the first timer tick. Interrupts stay
/// globally disabled until boot finishes.
pub fn init() {
    extern "C" {
        fn trap_vector();
    }
    mtvec::write(trap_vector as usize);
    mie::enable_machine_timer();
    mie::enable_machine_external();
    clint::set_next_timer(mhartid::read(), QUANTUM);
}

/// The used bytes of the 128-byte frame trapentry.S builds on the
/// trapped stack. Slot order is ABI with the assembly; `epc` becomes
/// mepc again at mret.
#[repr(C)]
pub struct TrapFrame {
    pub ra: usize,
    pub t0: usize,
    pub t1: usize,
    pub t2: usize,
    pub a0: usize,
    pub a1: usize,
    pub a2: usize,
    pub a3: usize,
    pub a4: usize,
    pub a5: usize,
    pub a6: usize,
    pub a7: usize,
    pub epc: usize,
}

/// size of the full frame including the reserved tail
pub const TRAPFRAME_SIZE: usize = 128;

#[no_mangle]
pub unsafe extern "C" fn trap_handler(tf: *mut TrapFrame) {
    let epc = (*tf).epc;

    match mcause::get() {
        mcause::Trap::Interrupt(code) => match code {
            mcause::INT_M_TIMER => {
                // quantum expired: rearm and let the scheduler decide
                clint::set_next_timer(mhartid::read(), QUANTUM);
                PROC_TABLE.schedule();
            }
            mcause::INT_M_EXT => {
                external_intr();
            }
            _ => {
                error!("trap: unexpected interrupt code {}", code);
                park_hart();
            }
        },
        mcause::Trap::Exception(code) => match code {
            mcause::EXC_ECALL_U | mcause::EXC_ECALL_M => {
                ecall(&mut *tf, epc);
            }
            _ => {
                fault(code, epc);
            }
        },
    }
}

fn external_intr() {
    let irq = plic::claim();
    if irq == 0 {
        return;
    }
    match irq {
        1..=VIRTIO_IRQ_MAX => virtio::intr(),
        UART0_IRQ => uart::intr(),
        _ => warn!("trap: unexpected irq {}", irq),
    }
    plic::complete(irq);
}

/// A numbered syscall. The trap frame is mirrored into the current
/// process's register image first, so fork copies the live caller state
/// rather than the stale snapshot from the last context switch.
unsafe fn ecall(tf: &mut TrapFrame, epc: usize) {
    if let Some(p) = PROC_TABLE.current_mut() {
        let rs = &mut p.regstate;
        rs.ra = tf.ra;
        rs.t0 = tf.t0;
        rs.t1 = tf.t1;
        rs.t2 = tf.t2;
        rs.a0 = tf.a0;
        rs.a1 = tf.a1;
        rs.a2 = tf.a2;
        rs.a3 = tf.a3;
        rs.a4 = tf.a4;
        rs.a5 = tf.a5;
        rs.a6 = tf.a6;
        rs.a7 = tf.a7;
        rs.sepc = epc;
        // trapentry.S moved sp down to build the frame, so the pre-trap
        // sp is the frame pointer plus the frame size
        rs.sp = tf as *const TrapFrame as usize + TRAPFRAME_SIZE;
        rs.mstatus = mstatus::read();
    }

    let num = tf.a7;
    let args = [tf.a0, tf.a1, tf.a2, tf.a3, tf.a4, tf.a5];

    trace!("trap: ecall num={} a0={:#x} a1={:#x}", num, args[0], args[1]);

    // exec rewrites the program counter instead of returning through the
    // usual ecall+4 path
    if num == syscall::SYS_EXEC {
        match syscall::sys_exec_lookup(&args) {
            Some(entry) => {
                // fresh image: argc = 0, argv = NULL, pc = entry
                tf.a0 = 0;
                tf.a1 = 0;
                tf.epc = entry;
            }
            None => {
                tf.a0 = -1isize as usize;
                tf.epc = epc + 4;
            }
        }
        return;
    }

    let ret = syscall::dispatch(num, &args, epc);
    tf.a0 = ret as usize;
    tf.epc = epc + 4;
}

/// Every non-ecall exception terminates the offending process; repeated
/// faults must not wedge the hart. With no process to blame, the hart
/// parks.
unsafe fn fault(code: usize, epc: usize) -> ! {
    let name = mcause::exception_name(code);
    match PROC_TABLE.current_pid() {
        Some(pid) => {
            warn!(
                "trap: pid {} {} at {:#x} (mtval={:#x}), exiting",
                pid,
                name,
                epc,
                mtval::read()
            );
            PROC_TABLE.exit_current();
        }
        None => {
            error!("trap: {} at {:#x} with no current process", name, epc);
            park_hart();
        }
    }
}

fn park_hart() -> ! {
    loop {
        proc::wfi();
    }
}
