use crate::console;
use crate::cpu;
use crate::param::UART0;
use crate::spinlock::SpinLock;
use lazy_static::lazy_static;

lazy_static! {
    static ref UART: SpinLock<Uart> = {
        let mut uart = Uart::new(UART0);
        uart.init();
        SpinLock::new(uart)
    };
}

/// Force the 16550 into a known state early in boot.
pub fn init() {
    drop(UART.lock());
}

pub fn putc(c: u8) {
    UART.lock().put(c);
}

pub fn getc() -> Option<u8> {
    UART.lock().get()
}

/// RX interrupt: drain the receive FIFO into the console buffer.
pub fn intr() {
    loop {
        let c = match UART.lock().get() {
            Some(c) => c,
            None => break,
        };
        console::intr(c);
    }
}

// 16550 register offsets
const RHR: usize = 0; // receive holding register
const THR: usize = 0; // transmit holding register
const IER: usize = 1; // interrupt enable register
const FCR: usize = 2; // FIFO control register
const LCR: usize = 3; // line control register
const LSR: usize = 5; // line status register

const IER_RX_ENABLE: u8 = 1 << 0;
const LSR_RX_READY: u8 = 1 << 0;
const LSR_TX_IDLE: u8 = 1 << 5;

struct Uart {
    base_address: usize,
}

impl Uart {
    fn new(base_address: usize) -> Self {
        Self { base_address }
    }

    fn init(&mut self) {
        let ptr = self.base_address as *mut u8;
        unsafe {
            // disable interrupts while configuring
            ptr.add(IER).write_volatile(0x00);
            // special mode to set the baud rate divisor
            ptr.add(LCR).write_volatile(0x80);
            // 38.4K baud
            ptr.add(0).write_volatile(0x03);
            ptr.add(1).write_volatile(0x00);
            // 8 bits, no parity
            ptr.add(LCR).write_volatile(0x03);
            // reset and enable FIFOs
            ptr.add(FCR).write_volatile(0x07);
            // receive interrupts only; transmit is polled
            ptr.add(IER).write_volatile(IER_RX_ENABLE);
        }
    }

    fn put(&mut self, c: u8) {
        cpu::push_off();
        let ptr = self.base_address as *mut u8;
        unsafe {
            while ptr.add(LSR).read_volatile() & LSR_TX_IDLE == 0 {}
            ptr.add(THR).write_volatile(c);
        }
        cpu::pop_off();
    }

    fn get(&mut self) -> Option<u8> {
        let ptr = self.base_address as *mut u8;
        unsafe {
            if ptr.add(LSR).read_volatile() & LSR_RX_READY == 0 {
                None
            } else {
                Some(ptr.add(RHR).read_volatile())
            }
        }
    }
}
