//! The fast-interrupt entry/exit sequencers (target-only).
//!
//! Everything here runs at priority 0 with nothing able to preempt it but an
//! exception, which is fatal anyway. The sequencers are naked functions; all
//! non-trivial bookkeeping is delegated to `extern "C"` helpers once a valid
//! stack is established.
//!
//! Two builds exist:
//!
//!  - The default build assumes a spare register bank: the core switched to
//!    bank 1 on entry, so no general register is saved on entry at all. A
//!    full [`IrqFrame`] is materialized only if the exit path decides to
//!    reschedule.
//!  - The `single-rgf-bank` build assumes a low-level vector wrapper spilled
//!    the caller-saved registers and the loop registers onto the interrupted
//!    stack before branching here; the entry sequencer completes that spill
//!    into an [`IrqFrame`] by pushing the return words.
//!
//! The stack pointer is not banked. The outermost entry displaces it to the
//! per-CPU interrupt stack and carries the displaced value to the exit path:
//! in a register (`r22`, callee-saved, so it survives the dispatch call) in
//! the banked build, and in [`SP_CARRY`] in the single-bank build, where
//! every register belongs to the interrupted context. The regular-interrupt
//! path uses the same carry convention, which is what lets a nested fast
//! interrupt resolve the interrupted thread's stack pointer.
use core::{arch::naked_asm, cell::UnsafeCell, mem::offset_of};

use tern_kernel::{CalleeSaved, KernelState, ThreadCb, NUM_CPUS};

use super::{
    cfg::PortInstance,
    frame::{CoopFrame, IrqFrame, MinFrame, COOP_FRAME_WORDS, IRQ_FRAME_WORDS},
    resched::{self, ExitPlan},
};
use crate::arc::{aux, Status32};

const WORD: usize = core::mem::size_of::<usize>();

/// A pointer slot written during init or from the owning core's interrupt
/// path only.
#[repr(transparent)]
struct PtrCell<T>(UnsafeCell<*mut T>);

unsafe impl<T> Sync for PtrCell<T> {}

impl<T> PtrCell<T> {
    #[allow(clippy::declare_interior_mutable_const)] // array seed
    const INIT: Self = Self(UnsafeCell::new(core::ptr::null_mut()));
}

/// Per-core pointer to the [`KernelState`] instance, resolved once by
/// [`init`] so the naked sequencers can reach it without a stack.
static CPU_STATE: [PtrCell<KernelState>; NUM_CPUS] = [PtrCell::INIT; NUM_CPUS];

/// The outgoing thread of an in-progress switch. Written by
/// [`firq_exit_decide`]; consumed by the switch tail, which cannot carry a
/// pointer in a register across the bank change.
static SWITCH_OUTGOING: [PtrCell<ThreadCb>; NUM_CPUS] = [PtrCell::INIT; NUM_CPUS];

/// The displaced stack pointer of the outermost interrupt. Only the
/// single-bank build uses memory for the carry; the banked build keeps it in
/// `r22` of the interrupt bank.
#[cfg(feature = "single-rgf-bank")]
static SP_CARRY: [PtrCell<usize>; NUM_CPUS] = [PtrCell::INIT; NUM_CPUS];

/// Resolve the per-core pointers and record the interrupt stack.
///
/// # Safety
///
/// Must complete on each configured core before its first interrupt is
/// enabled.
pub unsafe fn init<Traits: PortInstance>(irq_stack_top: *mut usize) {
    let state = tern_kernel::kernel().cpu(Traits::CPU_ID);
    // Interrupts are not enabled yet, so the plain store is exclusive.
    unsafe { state.set_irq_stack_top(irq_stack_top) };
    unsafe {
        *CPU_STATE[Traits::CPU_ID].0.get() = state as *const KernelState as *mut KernelState
    };
}

/// ABI shim: the dispatch trait method is a Rust-ABI function.
extern "C" fn firq_dispatch<Traits: PortInstance>(interrupted_sp: *mut usize) {
    // Safety: only the entry sequencer branches here
    unsafe { Traits::dispatch(interrupted_sp) };
}

/// Exit-time bookkeeping, callable from the naked exit sequencer.
///
/// Encodes the [`ExitPlan`] as a machine word: 0 for a nested return, 1 for
/// an outermost return, and the incoming control-block pointer (aligned, so
/// never 0 or 1) for a switch. On a switch the outgoing pointer is parked in
/// [`SWITCH_OUTGOING`] for the switch tail.
extern "C" fn firq_exit_decide<Traits: PortInstance>(irq_act: usize) -> usize {
    let state = tern_kernel::kernel().cpu(Traits::CPU_ID);
    // Safety: we are the owning core's interrupt path
    let outgoing = unsafe { state.current() };
    match unsafe { resched::exit_decide_on::<Traits>(state, irq_act) } {
        ExitPlan::NestedReturn => 0,
        ExitPlan::OutermostReturn => 1,
        ExitPlan::Switch(incoming) => {
            unsafe { *SWITCH_OUTGOING[Traits::CPU_ID].0.get() = outgoing };
            incoming.as_ptr() as usize
        }
    }
}

/// Per-switch reconfiguration of the incoming thread's protection state.
///
/// Kept out of the naked switch tail so the feature set does not multiply
/// the assembly variants; with no relevant feature enabled this compiles to
/// an immediate return.
extern "C" fn configure_incoming<Traits: PortInstance>(incoming: *mut ThreadCb) {
    let _ = incoming;
    #[cfg(feature = "stack-guard")]
    // Safety: `incoming` is the control block just selected by the exit
    // decision; its limit fields are stable while it is off-CPU.
    unsafe {
        let limits = *(*incoming).stack_limits.get();
        core::arch::asm!(
            "sr {base}, [{kstack_base}]",
            "sr {top}, [{kstack_top}]",
            base = in(reg) limits.base,
            top = in(reg) limits.top,
            kstack_base = const aux::KSTACK_BASE,
            kstack_top = const aux::KSTACK_TOP,
            options(nostack),
        );
    }
    #[cfg(feature = "mpu")]
    // Safety: called on switch, before the incoming thread resumes
    unsafe {
        Traits::reconfigure_mpu(incoming)
    };
}

/// The fast-interrupt entry sequencer (banked build).
///
/// Entered in the interrupt register bank with the return pc in `ilink` and
/// the interrupted status word in `STATUS32_P0`.
#[cfg(not(feature = "single-rgf-bank"))]
#[unsafe(naked)]
pub unsafe extern "C" fn firq_entry<Traits: PortInstance>() -> ! {
    naked_asm!(
        "
        # The loop registers are not banked; preserve them in callee-saved
        # registers of this bank so they survive the dispatch call.
        lr r23, [{lp_start}]
        lr r24, [{lp_end}]
        mov r25, lp_count

        # The interrupt stack is not covered by the interrupted thread's
        # limit registers; disable stack checking until the interrupt return
        # restores STATUS32 from STATUS32_P0. A no-op when the check is not
        # configured.
        lr r4, [{status32}]
        bclr r4, r4, {sc_bit}
        kflag r4

        # nested += 1, remembering whether we were outermost. No stack is
        # available yet, so this is done with bare loads and stores.
        mov r3, {cpu_state}
        ld r3, [r3, {cpu_off}]
        ld r4, [r3, {st_nested}]
        add r5, r4, 1
        st r5, [r3, {st_nested}]
        brne r4, 0, 0f

        # Outermost: displace to the interrupt stack. `r22` carries the
        # interrupted stack pointer until the exit sequencer crosses back.
        mov r22, sp
        ld sp, [r3, {st_irq_stack_top}]
        mov r0, r22
        bl {dispatch}
        b {firq_exit}

    0:
        # Nested over the regular-interrupt path: the stack pointer is
        # already on the interrupt stack, but the interrupted thread's stack
        # pointer (the dispatch argument) sits in the *other* bank's r22.
        # Fetch it through the auxiliary scratch pair, using the un-banked
        # stack pointer as the only temporary on the far side:
        #
        #   saved_pair = {{USER_SP, SCRATCH}};
        #   SCRATCH = status32;          // the way back, RB = interrupt bank
        #   r5 = sp;
        #   enter thread bank;
        #   USER_SP = r22;               // the regular path's carry
        #   sp = SCRATCH; kflag sp;      // back to the interrupt bank
        #   sp = r5;
        #   r0 = USER_SP;
        #   {{USER_SP, SCRATCH}} = saved_pair;
        #
        lr r2, [{user_sp}]
        lr r3, [{scratch}]
        lr r4, [{status32}]
        sr r4, [{scratch}]
        mov r5, sp
        and r6, r4, {rb_clear}
        kflag r6
        sr r22, [{user_sp}]
        lr sp, [{scratch}]
        kflag sp
        mov sp, r5
        lr r0, [{user_sp}]
        sr r2, [{user_sp}]
        sr r3, [{scratch}]
        bl {dispatch}
        b {firq_exit}
        ",
        cpu_state = sym CPU_STATE,
        cpu_off = const Traits::CPU_ID * WORD,
        st_nested = const KernelState::OFFSET_NESTED,
        st_irq_stack_top = const KernelState::OFFSET_IRQ_STACK_TOP,
        dispatch = sym firq_dispatch::<Traits>,
        firq_exit = sym firq_exit::<Traits>,
        lp_start = const aux::LP_START,
        lp_end = const aux::LP_END,
        status32 = const aux::STATUS32,
        user_sp = const aux::USER_SP,
        scratch = const aux::SCRATCH,
        rb_clear = const !Status32::RB_MASK.bits(),
        sc_bit = const Status32::SC.bits().trailing_zeros(),
    )
}

/// The fast-interrupt exit sequencer (banked build). Reached by an
/// unconditional branch from [`firq_entry`] after the dispatch call returns.
#[cfg(not(feature = "single-rgf-bank"))]
#[unsafe(naked)]
unsafe extern "C" fn firq_exit<Traits: PortInstance>() -> ! {
    naked_asm!(
        "
        # Restore the loop registers before anything else so every return
        # path below sees the interrupted context's values.
        sr r23, [{lp_start}]
        sr r24, [{lp_end}]
        mov lp_count, r25

        lr r0, [{irq_act}]
        bl {exit_decide}
        brne r0, 1, 0f

        # Outermost, no reschedule: cross back to the interrupted stack and
        # return. The banks take care of every general register.
        mov sp, r22
        rtie

    0:
        brne r0, 0, 1f
        # Nested: the stack was never switched for this entry.
        rtie

    1:
        # Reschedule. Cross back to the outgoing thread's stack, drop into
        # its register bank, and materialize the full interrupt frame the
        # restore procedure expects.
        mov sp, r22
        lr r6, [{status32}]
        and r6, r6, {rb_clear}
        kflag r6

        # Thread bank: every general register is the outgoing thread's.
        sub sp, sp, {irq_frame_bytes}
        st r0, [sp, {f_r0} + 0]
        st r1, [sp, {f_r0} + 4]
        st r2, [sp, {f_r0} + 8]
        st r3, [sp, {f_r0} + 12]
        st r4, [sp, {f_r0} + 16]
        st r5, [sp, {f_r0} + 20]
        st r6, [sp, {f_r0} + 24]
        st r7, [sp, {f_r0} + 28]
        st r8, [sp, {f_r0} + 32]
        st r9, [sp, {f_r0} + 36]
        st r10, [sp, {f_r0} + 40]
        st r11, [sp, {f_r0} + 44]
        st r12, [sp, {f_r0} + 48]
        st blink, [sp, {f_blink}]
        mov r0, lp_count
        st r0, [sp, {f_lp_count}]
        lr r0, [{lp_start}]
        st r0, [sp, {f_lp_start}]
        lr r0, [{lp_end}]
        st r0, [sp, {f_lp_end}]
        lr r0, [{status32_p0}]
        st r0, [sp, {f_status32}]
        st ilink, [sp, {f_pc}]
        b {switch_to_incoming}
        ",
        exit_decide = sym firq_exit_decide::<Traits>,
        switch_to_incoming = sym switch_to_incoming::<Traits>,
        irq_act = const aux::IRQ_ACT,
        status32 = const aux::STATUS32,
        status32_p0 = const aux::STATUS32_P0,
        lp_start = const aux::LP_START,
        lp_end = const aux::LP_END,
        rb_clear = const !Status32::RB_MASK.bits(),
        irq_frame_bytes = const IRQ_FRAME_WORDS * WORD,
        f_r0 = const IrqFrame::OFFSET_R0,
        f_blink = const IrqFrame::OFFSET_BLINK,
        f_lp_count = const IrqFrame::OFFSET_LP_COUNT,
        f_lp_start = const offset_of!(IrqFrame, lp_start),
        f_lp_end = const offset_of!(IrqFrame, lp_end),
        f_status32 = const MinFrame::OFFSET_STATUS32,
        f_pc = const MinFrame::OFFSET_PC,
    )
}

/// The fast-interrupt entry sequencer (single-bank build).
///
/// The low-level vector wrapper has already pushed `r0`–`r12`, `blink`, and
/// the loop registers in [`IrqFrame`] order, leaving room for the return
/// words; this sequencer completes the frame and dispatches.
#[cfg(feature = "single-rgf-bank")]
#[unsafe(naked)]
pub unsafe extern "C" fn firq_entry<Traits: PortInstance>() -> ! {
    naked_asm!(
        "
        # Complete the interrupt frame: push pc, then the status word, so
        # the status word lands at the final stack pointer.
        mov r0, ilink
        st.aw r0, [sp, -4]
        lr r0, [{status32_p0}]
        st.aw r0, [sp, -4]

        # Disable stack checking while on the interrupt stack; the interrupt
        # return restores STATUS32 from the frame.
        lr r0, [{status32}]
        bclr r0, r0, {sc_bit}
        kflag r0

        # nested += 1, remembering whether we were outermost.
        mov r3, {cpu_state}
        ld r3, [r3, {cpu_off}]
        ld r4, [r3, {st_nested}]
        add r5, r4, 1
        st r5, [r3, {st_nested}]
        brne r4, 0, 0f

        # Outermost: displace to the interrupt stack. With a single bank the
        # carry slot is memory; every register belongs to the interrupted
        # context.
        mov r6, {sp_carry}
        st sp, [r6, {cpu_off}]
        mov r0, sp
        ld sp, [r3, {st_irq_stack_top}]
        bl {dispatch}
        b {firq_exit}

    0:
        # Nested: already on the interrupt stack. The outermost interrupt's
        # carry slot still names the interrupted thread's frame.
        mov r6, {sp_carry}
        ld r0, [r6, {cpu_off}]
        bl {dispatch}
        b {firq_exit}
        ",
        cpu_state = sym CPU_STATE,
        sp_carry = sym SP_CARRY,
        cpu_off = const Traits::CPU_ID * WORD,
        st_nested = const KernelState::OFFSET_NESTED,
        st_irq_stack_top = const KernelState::OFFSET_IRQ_STACK_TOP,
        dispatch = sym firq_dispatch::<Traits>,
        firq_exit = sym firq_exit::<Traits>,
        status32 = const aux::STATUS32,
        status32_p0 = const aux::STATUS32_P0,
        sc_bit = const Status32::SC.bits().trailing_zeros(),
    )
}

/// The fast-interrupt exit sequencer (single-bank build).
#[cfg(feature = "single-rgf-bank")]
#[unsafe(naked)]
unsafe extern "C" fn firq_exit<Traits: PortInstance>() -> ! {
    naked_asm!(
        "
        lr r0, [{irq_act}]
        bl {exit_decide}
        brne r0, 1, 0f

        # Outermost, no reschedule: back onto the interrupted stack, where
        # the entry-time frame waits at the carried stack pointer.
        mov r3, {sp_carry}
        ld sp, [r3, {cpu_off}]
        b 2f

    0:
        brne r0, 0, 1f
        # Nested: the frame sits at the current stack pointer.
        b 2f

    1:
        # Reschedule: the outgoing thread's frame is already complete on its
        # own stack. Point sp at it and fall into the common switch tail.
        mov r3, {sp_carry}
        ld sp, [r3, {cpu_off}]
        b {switch_to_incoming}

    2:
        # Unwind the interrupt frame and return.
        ld r4, [sp, {f_status32}]
        sr r4, [{status32_p0}]
        ld r4, [sp, {f_pc}]
        mov ilink, r4
        ld r4, [sp, {f_lp_count}]
        mov lp_count, r4
        ld r4, [sp, {f_lp_start}]
        sr r4, [{lp_start}]
        ld r4, [sp, {f_lp_end}]
        sr r4, [{lp_end}]
        ld blink, [sp, {f_blink}]
        ld r0, [sp, {f_r0} + 0]
        ld r1, [sp, {f_r0} + 4]
        ld r2, [sp, {f_r0} + 8]
        ld r3, [sp, {f_r0} + 12]
        ld r4, [sp, {f_r0} + 16]
        ld r5, [sp, {f_r0} + 20]
        ld r6, [sp, {f_r0} + 24]
        ld r7, [sp, {f_r0} + 28]
        ld r8, [sp, {f_r0} + 32]
        ld r9, [sp, {f_r0} + 36]
        ld r10, [sp, {f_r0} + 40]
        ld r11, [sp, {f_r0} + 44]
        ld r12, [sp, {f_r0} + 48]
        add sp, sp, {irq_frame_bytes}
        rtie
        ",
        exit_decide = sym firq_exit_decide::<Traits>,
        switch_to_incoming = sym switch_to_incoming::<Traits>,
        sp_carry = sym SP_CARRY,
        cpu_off = const Traits::CPU_ID * WORD,
        irq_act = const aux::IRQ_ACT,
        status32_p0 = const aux::STATUS32_P0,
        lp_start = const aux::LP_START,
        lp_end = const aux::LP_END,
        irq_frame_bytes = const IRQ_FRAME_WORDS * WORD,
        f_r0 = const IrqFrame::OFFSET_R0,
        f_blink = const IrqFrame::OFFSET_BLINK,
        f_lp_count = const IrqFrame::OFFSET_LP_COUNT,
        f_lp_start = const offset_of!(IrqFrame, lp_start),
        f_lp_end = const offset_of!(IrqFrame, lp_end),
        f_status32 = const MinFrame::OFFSET_STATUS32,
        f_pc = const MinFrame::OFFSET_PC,
    )
}

/// The common switch tail.
///
/// On entry: executing in the outgoing thread's register bank with its
/// callee-saved registers live, `sp` at the base of its completed
/// [`IrqFrame`], [`SWITCH_OUTGOING`] naming the outgoing control block, and
/// `state.current` already naming the incoming one.
#[unsafe(naked)]
unsafe extern "C" fn switch_to_incoming<Traits: PortInstance>() -> ! {
    naked_asm!(
        "
        # Save the outgoing thread's callee-saved block, stack pointer last.
        mov r3, {switch_outgoing}
        ld r3, [r3, {cpu_off}]
        st r13, [r3, {cb_r13} + 0]
        st r14, [r3, {cb_r13} + 4]
        st r15, [r3, {cb_r13} + 8]
        st r16, [r3, {cb_r13} + 12]
        st r17, [r3, {cb_r13} + 16]
        st r18, [r3, {cb_r13} + 20]
        st r19, [r3, {cb_r13} + 24]
        st r20, [r3, {cb_r13} + 28]
        st r21, [r3, {cb_r13} + 32]
        st r22, [r3, {cb_r13} + 36]
        st r23, [r3, {cb_r13} + 40]
        st r24, [r3, {cb_r13} + 44]
        st r25, [r3, {cb_r13} + 48]
        st gp, [r3, {cb_gp}]
        st fp, [r3, {cb_fp}]
        st r30, [r3, {cb_r30}]
        st sp, [r3, {cb_sp}]

        # Reconfigure protection state for the incoming thread while the
        # outgoing stack is still valid.
        mov r3, {cpu_state}
        ld r3, [r3, {cpu_off}]
        ld r0, [r3, {st_current}]
        bl {configure_incoming}

        # Restore the incoming thread's callee-saved block, stack pointer
        # last, then unwind whichever frame shape its relinquish cause names.
        mov r3, {cpu_state}
        ld r3, [r3, {cpu_off}]
        ld r2, [r3, {st_current}]
        ld r13, [r2, {cb_r13} + 0]
        ld r14, [r2, {cb_r13} + 4]
        ld r15, [r2, {cb_r13} + 8]
        ld r16, [r2, {cb_r13} + 12]
        ld r17, [r2, {cb_r13} + 16]
        ld r18, [r2, {cb_r13} + 20]
        ld r19, [r2, {cb_r13} + 24]
        ld r20, [r2, {cb_r13} + 28]
        ld r21, [r2, {cb_r13} + 32]
        ld r22, [r2, {cb_r13} + 36]
        ld r23, [r2, {cb_r13} + 40]
        ld r24, [r2, {cb_r13} + 44]
        ld r25, [r2, {cb_r13} + 48]
        ld gp, [r2, {cb_gp}]
        ld fp, [r2, {cb_fp}]
        ld r30, [r2, {cb_r30}]
        ld r4, [r2, {cb_cause}]
        ld sp, [r2, {cb_sp}]
        breq r4, 0, 2f

        # Interrupt frame: stage the return words, then the bulk registers.
        ld r4, [sp, {f_status32}]
        sr r4, [{status32_p0}]
        ld r4, [sp, {f_pc}]
        mov ilink, r4
        ld r4, [sp, {f_lp_count}]
        mov lp_count, r4
        ld r4, [sp, {f_lp_start}]
        sr r4, [{lp_start}]
        ld r4, [sp, {f_lp_end}]
        sr r4, [{lp_end}]
        ld blink, [sp, {f_blink}]
        ld r0, [sp, {f_r0} + 0]
        ld r1, [sp, {f_r0} + 4]
        ld r2, [sp, {f_r0} + 8]
        ld r3, [sp, {f_r0} + 12]
        ld r4, [sp, {f_r0} + 16]
        ld r5, [sp, {f_r0} + 20]
        ld r6, [sp, {f_r0} + 24]
        ld r7, [sp, {f_r0} + 28]
        ld r8, [sp, {f_r0} + 32]
        ld r9, [sp, {f_r0} + 36]
        ld r10, [sp, {f_r0} + 40]
        ld r11, [sp, {f_r0} + 44]
        ld r12, [sp, {f_r0} + 48]
        add sp, sp, {irq_frame_bytes}
        rtie

    2:
        # Cooperative frame: only the return words; the yield primitive's
        # caller saved everything else.
        ld r4, [sp, {c_status32}]
        sr r4, [{status32_p0}]
        ld r4, [sp, {c_pc}]
        mov ilink, r4
        add sp, sp, {coop_frame_bytes}
        rtie
        ",
        switch_outgoing = sym SWITCH_OUTGOING,
        cpu_state = sym CPU_STATE,
        configure_incoming = sym configure_incoming::<Traits>,
        cpu_off = const Traits::CPU_ID * WORD,
        st_current = const KernelState::OFFSET_CURRENT,
        cb_r13 = const ThreadCb::OFFSET_CALLEE_SAVED + offset_of!(CalleeSaved, r),
        cb_gp = const ThreadCb::OFFSET_CALLEE_SAVED + offset_of!(CalleeSaved, gp),
        cb_fp = const ThreadCb::OFFSET_CALLEE_SAVED + offset_of!(CalleeSaved, fp),
        cb_r30 = const ThreadCb::OFFSET_CALLEE_SAVED + offset_of!(CalleeSaved, r30),
        cb_sp = const ThreadCb::OFFSET_CALLEE_SAVED + offset_of!(CalleeSaved, sp),
        cb_cause = const ThreadCb::OFFSET_RELINQUISH_CAUSE,
        status32_p0 = const aux::STATUS32_P0,
        lp_start = const aux::LP_START,
        lp_end = const aux::LP_END,
        irq_frame_bytes = const IRQ_FRAME_WORDS * WORD,
        coop_frame_bytes = const COOP_FRAME_WORDS * WORD,
        f_r0 = const IrqFrame::OFFSET_R0,
        f_blink = const IrqFrame::OFFSET_BLINK,
        f_lp_count = const IrqFrame::OFFSET_LP_COUNT,
        f_lp_start = const offset_of!(IrqFrame, lp_start),
        f_lp_end = const offset_of!(IrqFrame, lp_end),
        f_status32 = const MinFrame::OFFSET_STATUS32,
        f_pc = const MinFrame::OFFSET_PC,
        c_status32 = const CoopFrame::OFFSET_STATUS32,
        c_pc = const CoopFrame::OFFSET_PC,
    )
}
