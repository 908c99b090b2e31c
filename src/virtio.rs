//! Driver for the qemu virtio-mmio block device, bus slot 0 / IRQ 1.
//! One virtqueue; each request is a three-descriptor chain (header,
//! data, status). Process-context requests sleep until the completion
//! interrupt; boot-time requests poll.

use core::ptr;
use core::sync::atomic::{fence, Ordering};

use log::{info, warn};

use crate::param::VIRTIO0;
use crate::process::PROC_TABLE;
use crate::register::mstatus;
use crate::spinlock::SpinLock;

pub const SECTOR_SIZE: usize = 512;

// this many virtio descriptors. must be a power of two.
const NUM: usize = 8;

#[inline]
unsafe fn reg_read(offset: usize) -> u32 {
    let src = (VIRTIO0 + offset) as *const u32;
    ptr::read_volatile(src)
}

#[inline]
unsafe fn reg_write(offset: usize, v: u32) {
    let dst = (VIRTIO0 + offset) as *mut u32;
    ptr::write_volatile(dst, v);
}

const VIRTIO_MMIO_MAGIC_VALUE: usize = 0x000;
const VIRTIO_MMIO_VERSION: usize = 0x004;
const VIRTIO_MMIO_DEVICE_ID: usize = 0x008; // device type; 1 is net, 2 is disk
const VIRTIO_MMIO_VENDOR_ID: usize = 0x00c;
const VIRTIO_MMIO_DEVICE_FEATURES: usize = 0x010;
const VIRTIO_MMIO_DRIVER_FEATURES: usize = 0x020;
const VIRTIO_MMIO_GUEST_PAGE_SIZE: usize = 0x028; // legacy only, write-only
const VIRTIO_MMIO_QUEUE_SEL: usize = 0x030;
const VIRTIO_MMIO_QUEUE_NUM_MAX: usize = 0x034;
const VIRTIO_MMIO_QUEUE_NUM: usize = 0x038;
const VIRTIO_MMIO_QUEUE_ALIGN: usize = 0x03c; // legacy only
const VIRTIO_MMIO_QUEUE_PFN: usize = 0x040; // legacy only
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_READY: usize = 0x044;
const VIRTIO_MMIO_QUEUE_NOTIFY: usize = 0x050;
const VIRTIO_MMIO_INTERRUPT_STATUS: usize = 0x060;
const VIRTIO_MMIO_INTERRUPT_ACK: usize = 0x064;
const VIRTIO_MMIO_STATUS: usize = 0x070;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_DESC_LOW: usize = 0x080;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_DESC_HIGH: usize = 0x084;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_AVAIL_LOW: usize = 0x090;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_AVAIL_HIGH: usize = 0x094;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_USED_LOW: usize = 0x0a0;
#[cfg(feature = "virtio-modern")]
const VIRTIO_MMIO_QUEUE_USED_HIGH: usize = 0x0a4;

const VIRTIO_CONFIG_S_ACKNOWLEDGE: u32 = 1;
const VIRTIO_CONFIG_S_DRIVER: u32 = 2;
const VIRTIO_CONFIG_S_DRIVER_OK: u32 = 4;
const VIRTIO_CONFIG_S_FEATURE_OK: u32 = 8;

const VIRTIO_BLK_F_RO: u32 = 5;
const VIRTIO_BLK_F_SCSI: u32 = 7;
const VIRTIO_BLK_F_CONFIG_WCE: u32 = 11;
const VIRTIO_BLK_F_MQ: u32 = 12;
const VIRTIO_F_ANY_LAYOUT: u32 = 27;
const VIRTIO_RING_F_INDIRECT_DESC: u32 = 28;
const VIRTIO_RING_F_EVENT_IDX: u32 = 29;

const VRING_DESC_F_NEXT: u16 = 1;
const VRING_DESC_F_WRITE: u16 = 2;

const VIRTIO_BLK_T_IN: u32 = 0; // read the disk
const VIRTIO_BLK_T_OUT: u32 = 1; // write the disk

#[repr(C)]
#[derive(Clone, Copy)]
struct VqDesc {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

impl VqDesc {
    const fn zeroed() -> Self {
        Self {
            addr: 0,
            len: 0,
            flags: 0,
            next: 0,
        }
    }
}

#[repr(C)]
struct VqAvail {
    flags: u16,
    idx: u16,
    ring: [u16; NUM],
    unused: u16,
}

#[repr(C)]
#[derive(Clone, Copy)]
struct VqUsedElem {
    id: u32,
    len: u32,
}

#[repr(C)]
struct VqUsed {
    flags: u16,
    idx: u16,
    ring: [VqUsedElem; NUM],
}

// Legacy layout: descriptor table and available ring in the first page,
// used ring in the second. The page alignment of the substructs makes
// the split.
#[repr(C, align(4096))]
struct RingPage1 {
    desc: [VqDesc; NUM],
    avail: VqAvail,
}

#[repr(C, align(4096))]
struct RingPage2 {
    used: VqUsed,
}

#[repr(C, align(4096))]
struct Ring {
    page1: RingPage1,
    page2: RingPage2,
}

static mut RING: Ring = Ring {
    page1: RingPage1 {
        desc: [VqDesc::zeroed(); NUM],
        avail: VqAvail {
            flags: 0,
            idx: 0,
            ring: [0; NUM],
            unused: 0,
        },
    },
    page2: RingPage2 {
        used: VqUsed {
            flags: 0,
            idx: 0,
            ring: [VqUsedElem { id: 0, len: 0 }; NUM],
        },
    },
};

#[repr(C)]
#[derive(Clone, Copy)]
struct BlkReqHdr {
    type_: u32,
    reserved: u32,
    sector: u64,
}

#[derive(Clone, Copy)]
struct Track {
    busy: bool,
    done: bool,
}

struct Disk {
    free: [bool; NUM],
    used_idx: u16,
    track: [Track; NUM],
    hdr: [BlkReqHdr; NUM],
    status: [u8; NUM],
}

static DISK: SpinLock<Disk> = SpinLock::new(Disk {
    free: [true; NUM],
    used_idx: 0,
    track: [Track {
        busy: false,
        done: false,
    }; NUM],
    hdr: [BlkReqHdr {
        type_: 0,
        reserved: 0,
        sector: 0,
    }; NUM],
    status: [0; NUM],
});

fn desc_chan(head: usize) -> usize {
    &DISK as *const _ as usize + head
}

pub fn init() {
    unsafe {
        if reg_read(VIRTIO_MMIO_MAGIC_VALUE) != 0x7472_6976
            || reg_read(VIRTIO_MMIO_DEVICE_ID) != 2
            || reg_read(VIRTIO_MMIO_VENDOR_ID) != 0x554d_4551
        {
            panic!("virtio: could not find block device");
        }
        check_version();

        let mut status: u32 = 0;
        status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
        reg_write(VIRTIO_MMIO_STATUS, status);
        status |= VIRTIO_CONFIG_S_DRIVER;
        reg_write(VIRTIO_MMIO_STATUS, status);

        // negotiate features
        let mut features = reg_read(VIRTIO_MMIO_DEVICE_FEATURES);
        features &= !(1 << VIRTIO_BLK_F_RO);
        features &= !(1 << VIRTIO_BLK_F_SCSI);
        features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
        features &= !(1 << VIRTIO_BLK_F_MQ);
        features &= !(1 << VIRTIO_F_ANY_LAYOUT);
        features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
        features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
        reg_write(VIRTIO_MMIO_DRIVER_FEATURES, features);

        // tell device that feature negotiation is complete.
        status |= VIRTIO_CONFIG_S_FEATURE_OK;
        reg_write(VIRTIO_MMIO_STATUS, status);

        // initialize queue 0.
        reg_write(VIRTIO_MMIO_QUEUE_SEL, 0);
        let max = reg_read(VIRTIO_MMIO_QUEUE_NUM_MAX);
        if max == 0 {
            panic!("virtio: disk has no queue 0");
        } else if (max as usize) < NUM {
            panic!("virtio: disk max queue too short");
        }
        reg_write(VIRTIO_MMIO_QUEUE_NUM, NUM as u32);

        install_ring();

        // tell device we're completely ready.
        status |= VIRTIO_CONFIG_S_DRIVER_OK;
        reg_write(VIRTIO_MMIO_STATUS, status);
    }

    info!("virtio: block device ready");
}

#[cfg(not(feature = "virtio-modern"))]
unsafe fn check_version() {
    if reg_read(VIRTIO_MMIO_VERSION) != 1 {
        panic!("virtio: not a legacy device");
    }
}

#[cfg(feature = "virtio-modern")]
unsafe fn check_version() {
    if reg_read(VIRTIO_MMIO_VERSION) != 2 {
        panic!("virtio: not a modern device");
    }
}

#[cfg(not(feature = "virtio-modern"))]
unsafe fn install_ring() {
    use crate::param::PAGESIZE;

    reg_write(VIRTIO_MMIO_GUEST_PAGE_SIZE, PAGESIZE as u32);
    reg_write(VIRTIO_MMIO_QUEUE_ALIGN, PAGESIZE as u32);
    let pfn = (&RING as *const Ring as usize) >> 12;
    reg_write(VIRTIO_MMIO_QUEUE_PFN, pfn as u32);
}

#[cfg(feature = "virtio-modern")]
unsafe fn install_ring() {
    let desc = &RING.page1.desc as *const _ as u64;
    let avail = &RING.page1.avail as *const _ as u64;
    let used = &RING.page2.used as *const _ as u64;
    reg_write(VIRTIO_MMIO_QUEUE_DESC_LOW, desc as u32);
    reg_write(VIRTIO_MMIO_QUEUE_DESC_HIGH, (desc >> 32) as u32);
    reg_write(VIRTIO_MMIO_QUEUE_AVAIL_LOW, avail as u32);
    reg_write(VIRTIO_MMIO_QUEUE_AVAIL_HIGH, (avail >> 32) as u32);
    reg_write(VIRTIO_MMIO_QUEUE_USED_LOW, used as u32);
    reg_write(VIRTIO_MMIO_QUEUE_USED_HIGH, (used >> 32) as u32);
    reg_write(VIRTIO_MMIO_QUEUE_READY, 1);
}

impl Disk {
    fn alloc_desc(&mut self) -> Option<usize> {
        let i = self.free.iter().position(|&f| f)?;
        self.free[i] = false;
        Some(i)
    }

    fn free_desc(&mut self, i: usize) {
        debug_assert!(!self.free[i]);
        self.free[i] = true;
        unsafe { RING.page1.desc[i] = VqDesc::zeroed() };
    }

    fn alloc3_desc(&mut self) -> Option<[usize; 3]> {
        let mut idx = [0; 3];
        for k in 0..3 {
            match self.alloc_desc() {
                Some(i) => idx[k] = i,
                None => {
                    for &i in idx.iter().take(k) {
                        self.free_desc(i);
                    }
                    return None;
                }
            }
        }
        Some(idx)
    }

    /// Drain the used ring, marking finished requests.
    unsafe fn process_used(&mut self) {
        fence(Ordering::SeqCst);
        while self.used_idx != RING.page2.used.idx {
            let elem = RING.page2.used.ring[self.used_idx as usize % NUM];
            let head = elem.id as usize;
            if !self.track[head].busy {
                warn!("virtio: spurious completion for request {}", head);
            }
            if self.status[head] != 0 {
                warn!("virtio: request {} failed, status {}", head, self.status[head]);
            }
            self.track[head].done = true;
            self.used_idx = self.used_idx.wrapping_add(1);
            PROC_TABLE.wakeup(desc_chan(head));
        }
    }
}

/// Completion ISR, reached through the PLIC.
pub fn intr() {
    let mut disk = DISK.lock();
    unsafe {
        let isr = reg_read(VIRTIO_MMIO_INTERRUPT_STATUS);
        reg_write(VIRTIO_MMIO_INTERRUPT_ACK, isr & 0x3);
        disk.process_used();
    }
}

fn rw(sector: u64, buf: *mut u8, write: bool) {
    let head;
    {
        let mut disk = DISK.lock();

        // three descriptors per request; drop the lock between attempts
        // so completions can drain the ring
        let idx = loop {
            match disk.alloc3_desc() {
                Some(idx) => break idx,
                None => {
                    unsafe { disk.process_used() };
                    drop(disk);
                    core::hint::spin_loop();
                    disk = DISK.lock();
                }
            }
        };
        head = idx[0];

        disk.hdr[head] = BlkReqHdr {
            type_: if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN },
            reserved: 0,
            sector,
        };
        disk.status[head] = 0xff;
        disk.track[head] = Track {
            busy: true,
            done: false,
        };

        unsafe {
            let desc = &mut RING.page1.desc;
            desc[idx[0]] = VqDesc {
                addr: &disk.hdr[head] as *const _ as u64,
                len: core::mem::size_of::<BlkReqHdr>() as u32,
                flags: VRING_DESC_F_NEXT,
                next: idx[1] as u16,
            };
            desc[idx[1]] = VqDesc {
                addr: buf as u64,
                len: SECTOR_SIZE as u32,
                flags: if write { 0 } else { VRING_DESC_F_WRITE } | VRING_DESC_F_NEXT,
                next: idx[2] as u16,
            };
            desc[idx[2]] = VqDesc {
                addr: &disk.status[head] as *const _ as u64,
                len: 1,
                flags: VRING_DESC_F_WRITE,
                next: 0,
            };

            let avail = &mut RING.page1.avail;
            avail.ring[avail.idx as usize % NUM] = head as u16;
            fence(Ordering::SeqCst);
            avail.idx = avail.idx.wrapping_add(1);
            fence(Ordering::SeqCst);
            reg_write(VIRTIO_MMIO_QUEUE_NOTIFY, 0);
        }
    }

    wait_done(head);

    let mut disk = DISK.lock();
    disk.track[head] = Track {
        busy: false,
        done: false,
    };
    let mut i = head;
    loop {
        let next = unsafe { RING.page1.desc[i].next } as usize;
        let has_next = unsafe { RING.page1.desc[i].flags } & VRING_DESC_F_NEXT != 0;
        disk.free_desc(i);
        if !has_next {
            break;
        }
        i = next;
    }
}

/// Block until the device retires the request at `head`. In process
/// context the caller sleeps; during boot (no process, interrupts still
/// globally off) the used ring is polled.
fn wait_done(head: usize) {
    loop {
        if unsafe { PROC_TABLE.has_current() } {
            // the gate closes before the check, so the completion
            // interrupt cannot slip in between check and sleep
            mstatus::intr_off();
            let done = DISK.lock().track[head].done;
            if done {
                mstatus::intr_on();
                return;
            }
            unsafe { PROC_TABLE.sleep_current(desc_chan(head)) };
        } else {
            let done = {
                let mut disk = DISK.lock();
                unsafe { disk.process_used() };
                disk.track[head].done
            };
            if done {
                return;
            }
            core::hint::spin_loop();
        }
    }
}

pub fn read_sector(sector: u64, buf: &mut [u8]) {
    assert_eq!(buf.len(), SECTOR_SIZE);
    rw(sector, buf.as_mut_ptr(), false);
}

pub fn write_sector(sector: u64, buf: &[u8]) {
    assert_eq!(buf.len(), SECTOR_SIZE);
    rw(sector, buf.as_ptr() as *mut u8, true);
}
