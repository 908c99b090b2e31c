use core::arch::asm;

const MTIE: usize = 1 << 7;
const MEIE: usize = 1 << 11;

#[inline]
pub fn enable_machine_timer() {
    unsafe { asm!("csrs mie, {}", in(reg) MTIE) };
}

#[inline]
pub fn enable_machine_external() {
    unsafe { asm!("csrs mie, {}", in(reg) MEIE) };
}
