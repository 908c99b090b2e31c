use core::num::Wrapping;

use crate::process::PROC_TABLE;
use crate::register::mstatus;
use crate::spinlock::SpinLock;
use crate::uart;

pub fn init() {
    uart::init();
}

pub fn putc(c: u8) {
    uart::putc(c);
}

const INPUT_BUF: usize = 128;

const CTRL_BS: u8 = 0x08;
const CTRL_LF: u8 = 0x0A;
const CTRL_CR: u8 = 0x0D;
const CTRL_DEL: u8 = 0x7F;

struct Console {
    buf: [u8; INPUT_BUF],
    r: Wrapping<usize>, // read index
    w: Wrapping<usize>, // write index
    e: Wrapping<usize>, // edit index
}

impl Console {
    const fn new() -> Self {
        Self {
            buf: [0; INPUT_BUF],
            r: Wrapping(0),
            w: Wrapping(0),
            e: Wrapping(0),
        }
    }
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console::new());

fn input_chan() -> usize {
    &CONSOLE as *const _ as usize
}

/// Called from the UART receive interrupt with one input byte. Buffers
/// the line, echoes, and wakes any reader once a full line (or a full
/// buffer) is available.
pub fn intr(c: u8) {
    let mut cons = CONSOLE.lock();
    match c {
        CTRL_BS | CTRL_DEL => {
            if cons.e != cons.w {
                cons.e -= Wrapping(1);
                putc(CTRL_BS);
                putc(b' ');
                putc(CTRL_BS);
            }
        }
        _ => {
            if c != 0 && (cons.e - cons.r).0 < INPUT_BUF {
                let c = if c == CTRL_CR { CTRL_LF } else { c };
                // echo back to the user
                putc(c);
                let i = cons.e.0 % INPUT_BUF;
                cons.buf[i] = c;
                cons.e += Wrapping(1);
                if c == CTRL_LF || cons.e == cons.r + Wrapping(INPUT_BUF) {
                    cons.w = cons.e;
                    drop(cons);
                    unsafe { PROC_TABLE.wakeup(input_chan()) };
                    return;
                }
            }
        }
    }
    drop(cons);
}

/// Blocking read of up to `dst.len()` bytes, at most one line. The caller
/// parks on the blocked list until the receive interrupt delivers a line.
pub fn read(dst: &mut [u8]) -> usize {
    let mut n = 0;
    loop {
        // The interrupt gate closes before the buffer is checked, so a
        // line arriving between the check and the sleep cannot be missed.
        mstatus::intr_off();
        {
            let mut cons = CONSOLE.lock();
            if cons.r != cons.w {
                while n < dst.len() && cons.r != cons.w {
                    let c = cons.buf[cons.r.0 % INPUT_BUF];
                    cons.r += Wrapping(1);
                    dst[n] = c;
                    n += 1;
                    if c == CTRL_LF {
                        break;
                    }
                }
                drop(cons);
                mstatus::intr_on();
                return n;
            }
        }
        unsafe { PROC_TABLE.sleep_current(input_chan()) };
    }
}
