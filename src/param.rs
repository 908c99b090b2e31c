// the kernel expects there to be RAM
// for use by the kernel and user pages
// from physical address 0x80000000 to PHYSTOP.
pub const KERNBASE: usize = 0x8000_0000;
pub const PHYSTOP: usize = KERNBASE + 128 * 1024 * 1024;
pub const PAGESIZE: usize = 4096;

// qemu puts UART registers here in physical memory.
pub const UART0: usize = 0x1000_0000;
pub const UART0_MAP_SIZE: usize = PAGESIZE;
pub const UART0_IRQ: u32 = 10;

// virtio mmio window: eight device slots, IRQs 1..=8. The block device
// sits in slot 0.
pub const VIRTIO0: usize = 0x1000_1000;
pub const VIRTIO_MMIO_END: usize = 0x1000_9000;
pub const VIRTIO0_IRQ: u32 = 1;
pub const VIRTIO_IRQ_MAX: u32 = 8;

// core local interruptor (CLINT), which contains the timer.
pub const CLINT: usize = 0x0200_0000;
pub const CLINT_MAP_SIZE: usize = 0x10000;

// qemu puts the platform-level interrupt controller here.
pub const PLIC: usize = 0x0c00_0000;
pub const PLIC_MAP_SIZE: usize = 0x20_0000;

// sifive test finisher; a magic store here powers qemu off.
pub const QEMU_TEST_FINISHER: usize = 0x10_0000;

// cycles between timer interrupts; about 1/10th second in qemu.
pub const QUANTUM: u64 = 1_000_000;

pub const NPROC: usize = 64;

// process name, NUL included.
pub const NAMELEN: usize = 20;

// Per-process user heaps live in a fixed band of the address space,
// keyed on pid and grown page by page through sbrk. The band is kept out
// of the frame pool by the linker script.
pub const HEAP_USER_BASE: usize = 0x8040_0000;
pub const PER_PROC_HEAP: usize = 8 * 1024;

pub const USER_HEAP_END: usize = HEAP_USER_BASE + NPROC * PER_PROC_HEAP;

pub const fn proc_heap_base(pid: i32) -> usize {
    HEAP_USER_BASE + pid as usize * PER_PROC_HEAP
}

/// Whether `pid`'s heap band fits below the frame pool. Pids can grow
/// past the band while slots churn; such a process simply cannot grow a
/// heap.
pub const fn proc_heap_fits(pid: i32) -> bool {
    proc_heap_base(pid) + PER_PROC_HEAP <= USER_HEAP_END
}

pub const fn align_down(addr: usize, align: usize) -> usize {
    addr & !(align - 1)
}

pub const fn align_up(addr: usize, align: usize) -> usize {
    (addr + align - 1) & !(align - 1)
}
