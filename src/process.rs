use core::ptr;

use array_macro::array;
use log::{info, warn};

use crate::kalloc::{kalloc, kfree};
use crate::page_table::MapFlags;
use crate::param::{align_up, proc_heap_base, proc_heap_fits, NPROC, PAGESIZE};
use crate::proc::{idle_entry, switch_context, Pcb, ProcState, RegState};
use crate::register::mstatus;
use crate::{cpu, println, vm};

/// slot of the distinguished idle process
pub const IDLE: usize = 0;

/// FIFO of ready slot indices, backing round-robin scheduling.
pub struct ReadyQueue {
    items: [usize; NPROC],
    head: usize,
    tail: usize,
    count: usize,
}

impl ReadyQueue {
    const fn new() -> Self {
        Self {
            items: [0; NPROC],
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    fn enqueue(&mut self, slot: usize) {
        debug_assert!(self.count < NPROC);
        self.items[self.tail] = slot;
        self.tail = (self.tail + 1) % NPROC;
        self.count += 1;
    }

    fn dequeue(&mut self) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let slot = self.items[self.head];
        self.head = (self.head + 1) % NPROC;
        self.count -= 1;
        Some(slot)
    }

    /// Unlink the first entry matching `pred`, preserving FIFO order of
    /// the rest.
    fn remove_where<F: Fn(usize) -> bool>(&mut self, pred: F) -> Option<usize> {
        for k in 0..self.count {
            let pos = (self.head + k) % NPROC;
            if pred(self.items[pos]) {
                let found = self.items[pos];
                let mut cur = pos;
                for _ in k + 1..self.count {
                    let next = (cur + 1) % NPROC;
                    self.items[cur] = self.items[next];
                    cur = next;
                }
                self.tail = (self.tail + NPROC - 1) % NPROC;
                self.count -= 1;
                return Some(found);
            }
        }
        None
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.count).map(move |k| self.items[(self.head + k) % NPROC])
    }

    pub fn len(&self) -> usize {
        self.count
    }
}

/// An unordered set of slot indices (the blocked and zombie sets).
pub struct IndexList {
    items: [usize; NPROC],
    len: usize,
}

impl IndexList {
    const fn new() -> Self {
        Self {
            items: [0; NPROC],
            len: 0,
        }
    }

    fn push(&mut self, slot: usize) {
        debug_assert!(self.len < NPROC);
        self.items[self.len] = slot;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.items[self.len])
    }

    fn remove_at(&mut self, pos: usize) -> usize {
        debug_assert!(pos < self.len);
        let slot = self.items[pos];
        self.len -= 1;
        self.items[pos] = self.items[self.len];
        slot
    }

    fn find<F: Fn(usize) -> bool>(&self, pred: F) -> Option<usize> {
        (0..self.len).find(|&pos| pred(self.items[pos]))
    }

    fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.items[..self.len].iter().copied()
    }
}

pub static mut PROC_TABLE: ProcTable = ProcTable::new();

/// The process table and every scheduler set, collected in one place.
/// All mutation happens with machine interrupts disabled; on a single
/// hart that gate is the only lock the scheduler needs.
pub struct ProcTable {
    table: [Pcb; NPROC],
    ready: ReadyQueue,
    blocked: IndexList,
    zombies: IndexList,
    current: Option<usize>,
    next_pid: i32,
    boot_ctx: RegState,
}

impl ProcTable {
    const fn new() -> Self {
        Self {
            table: array![_ => Pcb::new(); NPROC],
            ready: ReadyQueue::new(),
            blocked: IndexList::new(),
            zombies: IndexList::new(),
            current: None,
            next_pid: 1,
            boot_ctx: RegState::new(),
        }
    }

    /// Set up slot 0 as the idle process. It owns a stack and a register
    /// image like everybody else but never enters the ready queue.
    pub fn init(&mut self) {
        let stk = kalloc();
        if stk.is_null() {
            panic!("proc: no frame for idle stack");
        }
        let idle = &mut self.table[IDLE];
        idle.used = true;
        idle.pid = 0;
        idle.set_name(b"IDLE");
        idle.state = ProcState::Ready;
        idle.stacktop = stk as usize + PAGESIZE;
        idle.regstate.init_for(idle_entry as usize, idle.stacktop);

        info!("proc: scheduler and idle process initialized");
    }

    fn alloc_slot(&mut self) -> Option<usize> {
        (1..NPROC).find(|&i| !self.table[i].used)
    }

    /// Create a READY process running `entry` and put it on the ready
    /// queue. Returns the new pid, or None when out of slots or frames.
    pub fn create(&mut self, name: &[u8], entry: usize, priority: i32) -> Option<i32> {
        cpu::push_off();
        let ret = self.create_locked(name, entry, priority);
        cpu::pop_off();
        ret
    }

    fn create_locked(&mut self, name: &[u8], entry: usize, priority: i32) -> Option<i32> {
        let slot = self.alloc_slot()?;

        let stk = kalloc();
        if stk.is_null() {
            return None;
        }

        let pid = self.next_pid;
        self.next_pid += 1;

        let p = &mut self.table[slot];
        p.reset();
        p.used = true;
        p.pid = pid;
        p.ppid = 0;
        p.set_name(name);
        p.state = ProcState::Ready;
        p.priority = priority;
        p.entrypoint = entry;
        p.stacktop = stk as usize + PAGESIZE;
        p.regstate.init_for(entry, p.stacktop);

        self.ready.enqueue(slot);
        Some(pid)
    }

    /// Round-robin scheduler. Runs with interrupts disabled and
    /// re-enables them at the tail, after control has come back to the
    /// chosen process.
    pub unsafe fn schedule(&mut self) {
        mstatus::intr_off();

        let next = match self.ready.dequeue() {
            Some(slot) => slot,
            None => match self.current {
                // nobody else to run: a running process keeps the hart
                Some(c) if c != IDLE && self.table[c].state == ProcState::Running => c,
                _ => IDLE,
            },
        };

        if Some(next) == self.current && self.table[next].state == ProcState::Running {
            self.zombies_free();
            mstatus::intr_on();
            return;
        }

        let old = self.current;
        self.current = Some(next);

        match old {
            None => {
                // very first schedule: switch away from the boot stack,
                // which is never resumed
                self.table[next].state = ProcState::Running;
                let new_rs: *const RegState = &self.table[next].regstate;
                switch_context(&mut self.boot_ctx, new_rs);
            }
            Some(o) => {
                if self.table[o].state == ProcState::Running {
                    self.table[o].state = ProcState::Ready;
                    if o != IDLE {
                        self.ready.enqueue(o);
                    }
                }
                // a TERMINATED old process is already on the zombie list

                self.table[next].state = ProcState::Running;
                let old_rs: *mut RegState = &mut self.table[o].regstate;
                let new_rs: *const RegState = &self.table[next].regstate;
                switch_context(old_rs, new_rs);
            }
        }

        // back on this process's stack: reap orphans in passing
        self.zombies_free();
        mstatus::intr_on();
    }

    /// Duplicate the current process. `mepc` is the trap pc, so the
    /// child resumes at the instruction after the ecall. Returns the
    /// child pid, or -1 with everything unwound on failure.
    pub unsafe fn fork(&mut self, mepc: usize) -> isize {
        mstatus::intr_off();

        let parent_slot = match self.current {
            Some(c) => c,
            None => {
                mstatus::intr_on();
                return -1;
            }
        };

        let child_slot = match self.alloc_slot() {
            Some(s) => s,
            None => {
                mstatus::intr_on();
                return -1;
            }
        };

        let stk = kalloc();
        if stk.is_null() {
            mstatus::intr_on();
            return -1;
        }

        let pid = self.next_pid;
        self.next_pid += 1;

        let parent = &self.table[parent_slot];
        let parent_pid = parent.pid;
        let parent_name = parent.name;
        let parent_priority = parent.priority;
        let parent_entry = parent.entrypoint;
        // the register image was mirrored from the trap frame on ecall
        // entry, so this is the live caller state
        let parent_regstate = parent.regstate;
        let parent_stacktop = parent.stacktop;
        let parent_brk_base = parent.brk_base;
        let parent_brk_size = parent.brk_size;

        let child = &mut self.table[child_slot];
        child.reset();
        child.used = true;
        child.pid = pid;
        child.ppid = parent_pid;
        child.name = parent_name;
        child.state = ProcState::Ready;
        child.priority = parent_priority;
        child.entrypoint = parent_entry;

        child.regstate = parent_regstate;
        child.regstate.a0 = 0; // fork returns 0 in the child
        child.regstate.sepc = mepc + 4;

        // clone the stack and rebase the stack pointer
        let parent_stk = parent_stacktop - PAGESIZE;
        ptr::copy_nonoverlapping(parent_stk as *const u8, stk, PAGESIZE);
        child.stacktop = stk as usize + PAGESIZE;
        let sp_offset = parent_stacktop - parent_regstate.sp;
        child.regstate.sp = child.stacktop - sp_offset;

        // deep-copy the user heap into the child's own heap band
        if parent_brk_size > 0 {
            if !proc_heap_fits(pid) {
                kfree(stk);
                child.reset();
                self.next_pid -= 1;
                mstatus::intr_on();
                return -1;
            }
            child.brk_base = proc_heap_base(pid);
            child.brk_size = parent_brk_size;

            let child_brk_base = child.brk_base;
            let pages = align_up(parent_brk_size, PAGESIZE) / PAGESIZE;
            for i in 0..pages {
                let child_va = child_brk_base + i * PAGESIZE;
                let parent_va = parent_brk_base + i * PAGESIZE;

                if vm::map_page(child_va, MapFlags::RW | MapFlags::USER).is_err() {
                    for j in 0..i {
                        let _ = vm::unmap(child_brk_base + j * PAGESIZE, true);
                    }
                    kfree(stk);
                    child.reset();
                    self.next_pid -= 1;
                    mstatus::intr_on();
                    return -1;
                }

                ptr::copy_nonoverlapping(parent_va as *const u8, child_va as *mut u8, PAGESIZE);
            }
        }

        self.ready.enqueue(child_slot);
        mstatus::intr_on();
        pid as isize
    }

    /// Terminate the current process: it becomes a zombie, a parent
    /// blocked in wait is woken, and the hart moves on. Never returns.
    pub unsafe fn exit_current(&mut self) -> ! {
        mstatus::intr_off();

        let c = self.current.expect("exit: no current process");
        self.table[c].state = ProcState::Terminated;
        self.zombies.push(c);
        info!("proc: pid {} exited", self.table[c].pid);

        let ppid = self.table[c].ppid;
        if ppid != 0 {
            if let Some(pos) = self.blocked.find(|s| self.table[s].pid == ppid) {
                let parent = self.blocked.remove_at(pos);
                self.table[parent].state = ProcState::Ready;
                self.table[parent].chan = 0;
                self.ready.enqueue(parent);
            }
        }

        self.schedule();

        // a zombie is never scheduled again
        loop {
            crate::proc::wfi();
        }
    }

    /// Reap one zombie child: free its stack, heap pages and slot, and
    /// return its pid. Blocks while live children exist but none has
    /// exited yet; returns -1 once the caller has no children at all.
    pub unsafe fn wait_and_reap(&mut self) -> isize {
        loop {
            mstatus::intr_off();

            let c = match self.current {
                Some(c) => c,
                None => {
                    mstatus::intr_on();
                    return -1;
                }
            };
            let mypid = self.table[c].pid;

            if let Some(pos) = self.zombies.find(|s| self.table[s].ppid == mypid) {
                let z = self.zombies.remove_at(pos);
                let childpid = self.table[z].pid;
                info!("proc: reaping child pid {}", childpid);
                self.free_slot_resources(z);
                self.maybe_retire_pid(childpid);
                mstatus::intr_on();
                return childpid as isize;
            }

            if !self.has_live_child(mypid) {
                mstatus::intr_on();
                return -1;
            }

            self.table[c].state = ProcState::Blocked;
            self.blocked.push(c);
            self.schedule();
            // woken by a child's exit: scan again
        }
    }

    fn has_live_child(&self, pid: i32) -> bool {
        self.table
            .iter()
            .any(|p| p.used && p.ppid == pid && p.state != ProcState::Terminated)
    }

    /// Opportunistic reaping from the scheduler: collect zombies whose
    /// parent will never wait (ppid 0). Parented zombies are left for
    /// wait.
    pub unsafe fn zombies_free(&mut self) {
        let mut pos = 0;
        while pos < self.zombies.len {
            let slot = self.zombies.items[pos];
            if self.table[slot].ppid == 0 {
                self.zombies.remove_at(pos);
                let pid = self.table[slot].pid;
                info!("proc: reaping orphan pid {}", pid);
                self.free_slot_resources(slot);
                self.maybe_retire_pid(pid);
            } else {
                pos += 1;
            }
        }
    }

    /// Hard-kill `pid`: unlink it from whichever set holds it and free
    /// its resources immediately. Killing yourself is exit. Returns 0,
    /// or -1 if the pid is idle or unknown.
    pub unsafe fn kill(&mut self, pid: i32) -> isize {
        cpu::push_off();

        if pid <= 0 {
            // pid 0 is the idle process
            cpu::pop_off();
            return -1;
        }

        if let Some(c) = self.current {
            if self.table[c].pid == pid {
                cpu::pop_off();
                self.exit_current();
            }
        }

        let table = &self.table;
        let found = self
            .ready
            .remove_where(|s| table[s].pid == pid)
            .or_else(|| {
                self.blocked
                    .find(|s| table[s].pid == pid)
                    .map(|pos| self.blocked.remove_at(pos))
            })
            .or_else(|| {
                self.zombies
                    .find(|s| table[s].pid == pid)
                    .map(|pos| self.zombies.remove_at(pos))
            });

        let ret = match found {
            Some(slot) => {
                self.free_slot_resources(slot);
                0
            }
            None => -1,
        };
        cpu::pop_off();
        ret
    }

    /// Park the current process on the blocked list; it runs again only
    /// when something wakes it.
    pub unsafe fn suspend_current(&mut self) {
        mstatus::intr_off();
        let c = match self.current {
            Some(c) if c != IDLE => c,
            _ => {
                mstatus::intr_on();
                return;
            }
        };
        self.table[c].state = ProcState::Blocked;
        self.blocked.push(c);
        self.schedule();
    }

    /// Block the current process on `chan` until `wakeup(chan)`.
    pub unsafe fn sleep_current(&mut self, chan: usize) {
        mstatus::intr_off();
        let c = self.current.expect("sleep: no current process");
        self.table[c].chan = chan;
        self.table[c].state = ProcState::Blocked;
        self.blocked.push(c);
        self.schedule();
    }

    /// Ready every process blocked on `chan`.
    pub unsafe fn wakeup(&mut self, chan: usize) {
        cpu::push_off();
        loop {
            let table = &self.table;
            match self.blocked.find(|s| table[s].chan == chan) {
                Some(pos) => {
                    let slot = self.blocked.remove_at(pos);
                    self.table[slot].chan = 0;
                    self.table[slot].state = ProcState::Ready;
                    self.ready.enqueue(slot);
                }
                None => break,
            }
        }
        cpu::pop_off();
    }

    /// Free every process except idle and the caller. Interrupts must be
    /// off and nothing may schedule afterwards; idle's and the caller's
    /// stacks are still live.
    pub unsafe fn shutdown_all(&mut self) {
        while let Some(slot) = self.ready.dequeue() {
            if slot != IDLE && Some(slot) != self.current {
                self.free_slot_resources(slot);
            }
        }
        while let Some(slot) = self.blocked.pop() {
            if slot != IDLE && Some(slot) != self.current {
                self.free_slot_resources(slot);
            }
        }
        while let Some(slot) = self.zombies.pop() {
            if slot != IDLE && Some(slot) != self.current {
                self.free_slot_resources(slot);
            }
        }
    }

    /// Grow the current process's heap by `n` bytes, page by page.
    /// Returns the old break.
    pub fn sbrk_current(&mut self, n: usize) -> Result<usize, &'static str> {
        cpu::push_off();
        let ret = self.sbrk_locked(n);
        cpu::pop_off();
        ret
    }

    fn sbrk_locked(&mut self, n: usize) -> Result<usize, &'static str> {
        let slot = self.current.ok_or("sbrk: no current process")?;
        let (brk_base, brk_size) = {
            let p = &mut self.table[slot];
            if p.brk_base == 0 {
                if !proc_heap_fits(p.pid) {
                    return Err("sbrk: pid outside the heap band");
                }
                p.brk_base = proc_heap_base(p.pid);
            }
            (p.brk_base, p.brk_size)
        };
        let old_break = brk_base + brk_size;
        if n == 0 {
            return Ok(old_break);
        }

        let new_size = brk_size + n;
        if new_size > crate::param::PER_PROC_HEAP {
            return Err("sbrk: per-process heap limit");
        }

        let first = align_up(brk_size, PAGESIZE) / PAGESIZE;
        let last = align_up(new_size, PAGESIZE) / PAGESIZE;
        for i in first..last {
            let va = brk_base + i * PAGESIZE;
            if let Err(msg) = vm::map_page(va, MapFlags::RW | MapFlags::USER) {
                for j in first..i {
                    let _ = vm::unmap(brk_base + j * PAGESIZE, true);
                }
                return Err(msg);
            }
        }

        self.table[slot].brk_size = new_size;
        Ok(old_break)
    }

    /// Release a dead process's stack, heap pages and table slot.
    fn free_slot_resources(&mut self, slot: usize) {
        let p = &mut self.table[slot];
        let stk = (p.stacktop - PAGESIZE) as *mut u8;
        kfree(stk);

        if p.brk_size > 0 {
            let pages = align_up(p.brk_size, PAGESIZE) / PAGESIZE;
            for i in 0..pages {
                let va = p.brk_base + i * PAGESIZE;
                if let Err(msg) = vm::unmap(va, true) {
                    warn!("proc: freeing pid {} heap page {:#x}: {}", p.pid, va, msg);
                }
            }
        }

        p.reset();
    }

    // The last pid handed out can be reused once its owner is reaped.
    fn maybe_retire_pid(&mut self, pid: i32) {
        if pid == self.next_pid - 1 && self.next_pid > 1 {
            self.next_pid -= 1;
        }
    }

    pub fn current_pid(&self) -> Option<i32> {
        self.current.map(|c| self.table[c].pid)
    }

    pub fn has_current(&self) -> bool {
        self.current.is_some()
    }

    pub fn current_mut(&mut self) -> Option<&mut Pcb> {
        match self.current {
            Some(c) => Some(&mut self.table[c]),
            None => None,
        }
    }

    pub fn current_regstate(&self) -> *const RegState {
        let c = self.current.expect("no current process");
        &self.table[c].regstate
    }

    pub fn find_pid(&self, pid: i32) -> bool {
        self.table.iter().any(|p| p.used && p.pid == pid)
    }

    /// Dump the process table to the console (the ps syscall).
    pub fn dump(&self) {
        cpu::push_off();
        println!("==== process list ====");
        if let Some(c) = self.current {
            let p = &self.table[c];
            println!(
                "current pid={} state={} name={}",
                p.pid,
                p.state.as_str(),
                p.name_str()
            );
        }
        let idle = &self.table[IDLE];
        if idle.used {
            println!(
                "idle    pid={} state={} name={}",
                idle.pid,
                idle.state.as_str(),
                idle.name_str()
            );
        }
        for slot in self.ready.iter() {
            let p = &self.table[slot];
            println!(
                "ready   pid={} state={} name={}",
                p.pid,
                p.state.as_str(),
                p.name_str()
            );
        }
        for slot in self.blocked.iter() {
            let p = &self.table[slot];
            println!(
                "blocked pid={} state={} name={}",
                p.pid,
                p.state.as_str(),
                p.name_str()
            );
        }
        for slot in self.zombies.iter() {
            let p = &self.table[slot];
            println!(
                "zombie  pid={} state={} name={}",
                p.pid,
                p.state.as_str(),
                p.name_str()
            );
        }
        cpu::pop_off();
    }
}

pub mod tests {
    use super::*;

    pub fn tests() -> &'static [(&'static str, fn())] {
        &[
            ("ready_queue_is_fifo", ready_queue_is_fifo),
            ("ready_queue_remove_keeps_order", ready_queue_remove_keeps_order),
            ("kill_unknown_pid_fails", kill_unknown_pid_fails),
            ("create_then_kill", create_then_kill),
        ]
    }

    fn ready_queue_is_fifo() {
        let mut q = ReadyQueue::new();
        for slot in [3, 1, 4] {
            q.enqueue(slot);
        }
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(4));
        assert_eq!(q.dequeue(), None);
    }

    fn ready_queue_remove_keeps_order() {
        let mut q = ReadyQueue::new();
        for slot in [5, 6, 7, 8] {
            q.enqueue(slot);
        }
        assert_eq!(q.remove_where(|s| s == 6), Some(6));
        assert_eq!(q.remove_where(|s| s == 9), None);
        assert_eq!(q.dequeue(), Some(5));
        assert_eq!(q.dequeue(), Some(7));
        assert_eq!(q.dequeue(), Some(8));
        assert_eq!(q.dequeue(), None);
    }

    fn kill_unknown_pid_fails() {
        unsafe {
            assert_eq!(PROC_TABLE.kill(12345), -1);
            assert_eq!(PROC_TABLE.kill(0), -1);
            assert_eq!(PROC_TABLE.kill(-1), -1);
        }
    }

    fn create_then_kill() {
        cpu::push_off();
        unsafe {
            let before = PROC_TABLE.ready.len();
            let pid = PROC_TABLE
                .create(b"probe", idle_entry as usize, 0)
                .expect("create failed");
            assert!(PROC_TABLE.find_pid(pid));
            assert_eq!(PROC_TABLE.ready.len(), before + 1);
            assert_eq!(PROC_TABLE.kill(pid), 0);
            assert!(!PROC_TABLE.find_pid(pid));
            assert_eq!(PROC_TABLE.ready.len(), before);
        }
        cpu::pop_off();
    }
}
