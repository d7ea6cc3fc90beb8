//! A hosted simulator for the ARC fast-interrupt port.
//!
//! The real sequencers are naked assembly and only exist on the target. What
//! *can* run anywhere is everything they delegate to: the nesting tracker,
//! the frame codec, and the exit-time reschedule decision. This crate builds
//! a small ARC machine model (two register banks, an un-banked stack
//! pointer, the loop registers, the relevant auxiliary registers) and drives
//! those shared pieces through the same protocol the assembly follows, step
//! for step. Integration tests then assert the protocol's observable
//! properties on transitions between simulated threads.
//!
//! The simulator models the banked build. The single-bank build differs only
//! in where the entry spill happens and where the stack-pointer carry lives;
//! the shared logic under test is identical.

use core::ptr::NonNull;

use tern_kernel::{CalleeSaved, KernelState, RelinquishCause, StackLimits, ThreadCb};
use tern_port_arc::{
    arc::{Status32, FIRQ_BANK, IRQ_ACT_ACTIVE_MASK},
    firq::{
        frame::{self, IrqFrame, MinFrame},
        nesting,
        resched::{self, ExitPlan},
    },
    InterruptDispatch, ThreadingOptions,
};

tern_port_arc::use_port!(unsafe pub struct SimPort);

impl ThreadingOptions for SimPort {}

impl InterruptDispatch for SimPort {
    // The simulator passes handlers as closures instead of routing them
    // through the trait; this is never reached.
    unsafe fn dispatch(_interrupted_sp: *mut usize) {
        unreachable!("the simulator invokes handlers directly")
    }
}

/// Words per simulated stack.
const STACK_WORDS: usize = 256;

const WORD: usize = core::mem::size_of::<usize>();

/// Register indices within the callee-saved array (`r13` is index 0).
const R22: usize = 9;
const R23: usize = 10;
const R24: usize = 11;
const R25: usize = 12;

/// One general-purpose register bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gprs {
    /// `r0`–`r12`.
    pub caller: [usize; 13],
    /// `r13`–`r25`.
    pub callee: [usize; 13],
    pub gp: usize,
    pub fp: usize,
    pub r30: usize,
    pub blink: usize,
}

impl Gprs {
    /// A register file filled with values derived from `seed`, distinct per
    /// register, for later whole-bank comparisons.
    pub fn seeded(seed: usize) -> Self {
        let mut caller = [0; 13];
        let mut callee = [0; 13];
        for (i, r) in caller.iter_mut().enumerate() {
            *r = seed.wrapping_mul(0x100).wrapping_add(i);
        }
        for (i, r) in callee.iter_mut().enumerate() {
            *r = seed.wrapping_mul(0x100).wrapping_add(13 + i);
        }
        Self {
            caller,
            callee,
            gp: seed.wrapping_mul(0x100).wrapping_add(26),
            fp: seed.wrapping_mul(0x100).wrapping_add(27),
            r30: seed.wrapping_mul(0x100).wrapping_add(30),
            blink: seed.wrapping_mul(0x100).wrapping_add(31),
        }
    }

    const ZERO: Self = Self {
        caller: [0; 13],
        callee: [0; 13],
        gp: 0,
        fp: 0,
        r30: 0,
        blink: 0,
    };
}

/// A simulated thread: its control block and its stack.
pub struct SimThread {
    cb: Box<ThreadCb>,
    stack: Box<[usize]>,
}

/// Index into the simulator's thread table.
pub type ThreadId = usize;

/// What a completed fast-interrupt round trip did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Returned into a still-active outer interrupt.
    NestedReturn,
    /// Returned to the interrupted thread.
    OutermostReturn,
    /// Switched threads.
    Switched { from: ThreadId, to: ThreadId },
}

/// The machine model plus the per-CPU kernel state it interoperates with.
///
/// Most fields are public so tests can snapshot and compare them directly.
pub struct SimCpu {
    /// The per-CPU state the interrupt path mutates. The simulator owns its
    /// own instance instead of the image-global one.
    pub state: KernelState,
    /// Register banks; index [`FIRQ_BANK`] is the interrupt bank.
    pub banks: [Gprs; 2],
    /// The un-banked stack pointer, as a host address.
    pub sp: usize,
    /// The simulated program counter.
    pub pc: usize,
    pub ilink: usize,
    pub status32: Status32,
    pub status32_p0: usize,
    /// `AUX_IRQ_ACT`: one bit per active priority level.
    pub irq_act: usize,
    /// The auxiliary scratch pair used by the nested bank-swap protocol.
    pub aux_user_sp: usize,
    pub aux_scratch: usize,
    /// `{lp_count, lp_start, lp_end}`.
    pub lp: [usize; 3],
    threads: Vec<SimThread>,
    irq_stack: Box<[usize]>,
}

impl SimCpu {
    pub fn new() -> Self {
        let irq_stack = vec![0usize; STACK_WORDS].into_boxed_slice();
        let mut cpu = Self {
            state: KernelState::new(),
            banks: [Gprs::ZERO, Gprs::ZERO],
            sp: 0,
            pc: 0,
            ilink: 0,
            status32: Status32::IE,
            status32_p0: 0,
            irq_act: 0,
            aux_user_sp: 0,
            aux_scratch: 0,
            lp: [0; 3],
            threads: Vec::new(),
            irq_stack,
        };
        let top = cpu.irq_stack_top();
        // Exclusive: the simulated core is not running yet.
        unsafe { cpu.state.set_irq_stack_top(top as *mut usize) };
        cpu
    }

    /// One past the highest word of the interrupt stack.
    pub fn irq_stack_top(&self) -> usize {
        self.irq_stack.as_ptr() as usize + STACK_WORDS * WORD
    }

    /// Whether `addr` lies within the interrupt stack region.
    pub fn on_irq_stack(&self, addr: usize) -> bool {
        let base = self.irq_stack.as_ptr() as usize;
        addr >= base && addr <= self.irq_stack_top()
    }

    pub fn thread_cb(&self, id: ThreadId) -> *mut ThreadCb {
        &*self.threads[id].cb as *const ThreadCb as *mut ThreadCb
    }

    fn thread_id_of(&self, cb: *mut ThreadCb) -> ThreadId {
        self.threads
            .iter()
            .position(|t| &*t.cb as *const ThreadCb as *mut ThreadCb == cb)
            .expect("control block not owned by this simulator")
    }

    fn spawn(&mut self, seed: usize) -> (ThreadId, usize) {
        let stack = vec![0usize; STACK_WORDS].into_boxed_slice();
        let top = stack.as_ptr() as usize + STACK_WORDS * WORD;
        let id = self.threads.len();
        let cb = Box::new(ThreadCb::new());
        unsafe {
            *cb.stack_limits.get() = StackLimits {
                base: stack.as_ptr() as usize,
                top,
            };
            let saved = &mut *cb.callee_saved.get();
            let regs = Gprs::seeded(seed);
            saved.r = regs.callee;
            saved.gp = regs.gp;
            saved.fp = regs.fp;
            saved.r30 = regs.r30;
        }
        self.threads.push(SimThread { cb, stack });
        (id, top)
    }

    /// Create a thread that went off-CPU through the yield primitive: a
    /// cooperative frame on its stack, seeded callee-saved registers in its
    /// control block.
    pub fn spawn_cooperative(&mut self, seed: usize, pc: usize, status32: usize) -> ThreadId {
        let (id, top) = self.spawn(seed);
        let sp = unsafe { frame::push_coop(top as *mut usize, pc, status32) };
        unsafe {
            (*self.thread_cb(id)).set_relinquish_cause(RelinquishCause::Cooperative);
            (*(*self.thread_cb(id)).callee_saved.get()).sp = sp as usize;
        }
        id
    }

    /// Create a thread that was preempted from interrupt context: a full
    /// interrupt frame on its stack.
    pub fn spawn_interrupted(
        &mut self,
        seed: usize,
        cause: RelinquishCause,
        irq_frame: &IrqFrame,
    ) -> ThreadId {
        assert_ne!(cause, RelinquishCause::Cooperative);
        let (id, top) = self.spawn(seed);
        let sp = unsafe { frame::push_irq(top as *mut usize, irq_frame) };
        unsafe {
            (*self.thread_cb(id)).set_relinquish_cause(cause);
            (*(*self.thread_cb(id)).callee_saved.get()).sp = sp as usize;
        }
        id
    }

    /// Put a spawned thread on the CPU directly, bypassing any switch: loads
    /// the seeded registers into the thread bank and points `sp` at the top
    /// of its (empty) stack.
    pub fn make_running(&mut self, id: ThreadId, seed: usize, pc: usize) {
        assert_eq!(self.status32.bank(), 0, "a handler is still active");
        self.banks[0] = Gprs::seeded(seed);
        self.sp = self.threads[id].stack.as_ptr() as usize + STACK_WORDS * WORD;
        self.pc = pc;
        unsafe { self.state.set_current(self.thread_cb(id)) };
    }

    /// Publish the scheduler's pick for the next reschedule opportunity.
    pub fn set_ready(&mut self, id: Option<ThreadId>) {
        let ptr = id.map_or(core::ptr::null_mut(), |id| self.thread_cb(id));
        unsafe { self.state.set_ready_queue_cache(ptr) };
    }

    /// Raise a regular (non-fast) interrupt at priority `prio` and run
    /// `handler` inside it.
    ///
    /// Only the pieces a nested fast interrupt interoperates with are
    /// modeled: the shared nesting counter, the active-priority bit, and the
    /// stack displacement with its `r22` carry.
    pub fn rirq_raise<F: FnOnce(&mut SimCpu)>(&mut self, prio: u32, handler: F) {
        assert!((1..16).contains(&prio), "fast interrupts own priority 0");
        assert_eq!(self.irq_act & (1 << prio), 0);
        assert_eq!(self.status32.bank(), 0);

        self.irq_act |= 1 << prio;
        let saved_status = self.status32;
        let saved_pc = self.pc;
        let outermost = unsafe { nesting::enter(&self.state) };
        if outermost {
            self.banks[0].callee[R22] = self.sp;
            self.sp = self.irq_stack_top();
        }
        log::trace!("rirq enter: prio={} outermost={}", prio, outermost);

        handler(self);

        unsafe { nesting::leave(&self.state) };
        if outermost {
            self.sp = self.banks[0].callee[R22];
        }
        self.irq_act &= !(1 << prio);
        self.status32 = saved_status;
        self.pc = saved_pc;
        log::trace!("rirq return: prio={}", prio);
    }

    /// Raise a fast interrupt, run `handler` as its dispatched service
    /// routine, and run the exit sequence.
    ///
    /// The handler receives the interrupted thread's stack pointer exactly
    /// as the dispatch collaborator would.
    pub fn firq_raise<F: FnOnce(&mut SimCpu, *mut usize)>(&mut self, handler: F) -> Transition {
        // Hardware vectoring: capture the return state and switch banks.
        assert_eq!(self.irq_act & 1, 0, "a fast interrupt is already active");
        self.irq_act |= 1;
        self.status32_p0 = self.status32.bits() as usize;
        self.ilink = self.pc;
        self.status32 = self.status32.with_bank(FIRQ_BANK);

        let interrupted_sp = self.firq_entry();
        log::trace!("firq enter: interrupted_sp={:#x}", interrupted_sp);

        handler(self, interrupted_sp as *mut usize);

        self.firq_exit()
    }

    /// The entry sequence: preserve the loop registers, account the nesting,
    /// and resolve the interrupted thread's stack pointer.
    fn firq_entry(&mut self) -> usize {
        let fb = FIRQ_BANK as usize;
        self.banks[fb].callee[R23] = self.lp[1];
        self.banks[fb].callee[R24] = self.lp[2];
        self.banks[fb].callee[R25] = self.lp[0];

        if unsafe { nesting::enter(&self.state) } {
            // Outermost: displace to the interrupt stack, carrying the
            // interrupted stack pointer in this bank's r22.
            self.banks[fb].callee[R22] = self.sp;
            self.sp = self.irq_stack_top();
            self.banks[fb].callee[R22]
        } else {
            // Nested: the carry sits in the other bank's r22. Fetch it
            // through the auxiliary scratch pair, mirroring the assembly
            // word for word; the un-banked stack pointer is the only
            // temporary available on the far side.
            let saved_user_sp = self.aux_user_sp;
            let saved_scratch = self.aux_scratch;

            self.aux_scratch = self.status32.bits() as usize;
            let r5 = self.sp;
            self.status32 = self.status32.with_bank(0);
            self.aux_user_sp = self.banks[0].callee[R22];
            self.sp = self.aux_scratch;
            self.status32 = Status32::from_bits_retain(self.sp as u32);
            self.sp = r5;
            let carried = self.aux_user_sp;
            self.aux_user_sp = saved_user_sp;
            self.aux_scratch = saved_scratch;

            assert_eq!(self.status32.bank(), FIRQ_BANK);
            carried
        }
    }

    /// The exit sequence: restore the loop registers, run the shared
    /// decision, and take whichever return path it names.
    fn firq_exit(&mut self) -> Transition {
        let fb = FIRQ_BANK as usize;
        // Restored before the decision so every path sees them live.
        self.lp = [
            self.banks[fb].callee[R25],
            self.banks[fb].callee[R23],
            self.banks[fb].callee[R24],
        ];

        let outgoing = unsafe { self.state.current() };
        let plan = unsafe { resched::exit_decide_on::<SimPort>(&self.state, self.irq_act) };
        match plan {
            ExitPlan::NestedReturn => {
                self.rtie();
                log::trace!("firq return: nested");
                Transition::NestedReturn
            }
            ExitPlan::OutermostReturn => {
                self.sp = self.banks[fb].callee[R22];
                self.rtie();
                log::trace!("firq return: outermost");
                Transition::OutermostReturn
            }
            ExitPlan::Switch(incoming) => self.switch(outgoing, incoming),
        }
    }

    fn switch(&mut self, outgoing: *mut ThreadCb, incoming: NonNull<ThreadCb>) -> Transition {
        let fb = FIRQ_BANK as usize;
        let from = self.thread_id_of(outgoing);
        let to = self.thread_id_of(incoming.as_ptr());

        // Cross back to the outgoing thread's stack, drop into its bank, and
        // materialize the interrupt frame the restore procedure expects.
        self.sp = self.banks[fb].callee[R22];
        self.status32 = self.status32.with_bank(0);
        let irq_frame = IrqFrame {
            ret: MinFrame {
                status32: self.status32_p0,
                pc: self.ilink,
            },
            r: self.banks[0].caller,
            blink: self.banks[0].blink,
            lp_count: self.lp[0],
            lp_start: self.lp[1],
            lp_end: self.lp[2],
        };
        self.sp = unsafe { frame::push_irq(self.sp as *mut usize, &irq_frame) } as usize;

        // Save the outgoing callee-saved block, stack pointer last.
        unsafe {
            *(*outgoing).callee_saved.get() = CalleeSaved {
                r: self.banks[0].callee,
                gp: self.banks[0].gp,
                fp: self.banks[0].fp,
                r30: self.banks[0].r30,
                sp: self.sp,
            };
        }

        // Restore the incoming thread, branching on the frame shape its
        // relinquish cause names.
        let (saved, cause) = unsafe {
            let cb = incoming.as_ptr();
            (*(*cb).callee_saved.get(), (*cb).relinquish_cause())
        };
        self.banks[0].callee = saved.r;
        self.banks[0].gp = saved.gp;
        self.banks[0].fp = saved.fp;
        self.banks[0].r30 = saved.r30;
        self.sp = saved.sp;
        match cause {
            RelinquishCause::Cooperative => {
                let (coop, sp) = unsafe { frame::pop_coop(self.sp as *mut usize) };
                self.sp = sp as usize;
                self.status32_p0 = coop.status32;
                self.ilink = coop.pc;
            }
            RelinquishCause::RegularIrq | RelinquishCause::FastIrq => {
                let (irq, sp) = unsafe { frame::pop_irq(self.sp as *mut usize) };
                self.sp = sp as usize;
                self.banks[0].caller = irq.r;
                self.banks[0].blink = irq.blink;
                self.lp = [irq.lp_count, irq.lp_start, irq.lp_end];
                self.status32_p0 = irq.ret.status32;
                self.ilink = irq.ret.pc;
            }
        }
        self.rtie();
        log::trace!("firq return: switched {} -> {}", from, to);
        Transition::Switched { from, to }
    }

    /// The interrupt-return instruction: clear the highest-priority active
    /// bit and resume at the staged return state.
    fn rtie(&mut self) {
        let active = self.irq_act & IRQ_ACT_ACTIVE_MASK;
        assert_ne!(active, 0, "rtie with no active interrupt");
        self.irq_act &= !(1 << active.trailing_zeros());
        self.status32 = Status32::from_bits_retain(self.status32_p0 as u32);
        self.pc = self.ilink;
    }
}

impl Default for SimCpu {
    fn default() -> Self {
        Self::new()
    }
}
