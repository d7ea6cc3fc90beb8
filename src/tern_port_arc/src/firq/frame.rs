//! The stack-frame codec.
//!
//! Every interrupt path sharing the interrupt stack region interoperates on
//! these layouts, so the offsets here are load-bearing: the entry sequencer,
//! the exit sequencer, and the cooperative-yield path must agree
//! byte-for-byte.
//!
//! Three shapes exist:
//!
//!  - [`MinFrame`] — the minimal interrupt-return frame `{pc, status32}`,
//!    pushed pc-then-status on fast-interrupt entry when no spare register
//!    bank exists.
//!  - [`IrqFrame`] — the full interrupt frame left behind when a thread is
//!    rescheduled out from interrupt context. Its lowest-address words are
//!    exactly a [`MinFrame`], so after the general registers are popped the
//!    remaining stack decodes with the minimal-frame procedure.
//!  - [`CoopFrame`] — the shorter, *differently shaped* frame left by the
//!    cooperative-yield path. The two shapes must not be unified: collapsing
//!    them would corrupt the resumed register state.
use core::mem::{offset_of, size_of};

use tern_kernel::utils::Init;

/// Machine words per frame type.
pub const MIN_FRAME_WORDS: usize = size_of::<MinFrame>() / size_of::<usize>();
pub const IRQ_FRAME_WORDS: usize = size_of::<IrqFrame>() / size_of::<usize>();
pub const COOP_FRAME_WORDS: usize = size_of::<CoopFrame>() / size_of::<usize>();

/// The minimal interrupt-return frame.
///
/// Pushed pc-then-status, so in memory (ascending addresses from the final
/// stack pointer) `status32` comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct MinFrame {
    pub status32: usize,
    pub pc: usize,
}

impl MinFrame {
    pub const OFFSET_STATUS32: usize = offset_of!(MinFrame, status32);
    pub const OFFSET_PC: usize = offset_of!(MinFrame, pc);
}

impl Init for MinFrame {
    const INIT: Self = Self { status32: 0, pc: 0 };
}

/// The full interrupt frame.
///
/// `ret` sits at the lowest addresses; see the module docs for why.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct IrqFrame {
    /// The interrupt-return words, at [`MinFrame`]'s offsets.
    pub ret: MinFrame,
    /// Caller-saved `r0`–`r12`.
    pub r: [usize; 13],
    pub blink: usize,
    pub lp_count: usize,
    pub lp_start: usize,
    pub lp_end: usize,
}

impl IrqFrame {
    pub const OFFSET_RET: usize = offset_of!(IrqFrame, ret);
    pub const OFFSET_R0: usize = offset_of!(IrqFrame, r);
    pub const OFFSET_BLINK: usize = offset_of!(IrqFrame, blink);
    pub const OFFSET_LP_COUNT: usize = offset_of!(IrqFrame, lp_count);
}

impl Init for IrqFrame {
    const INIT: Self = Self {
        ret: MinFrame::INIT,
        r: [0; 13],
        blink: 0,
        lp_count: 0,
        lp_start: 0,
        lp_end: 0,
    };
}

/// The frame left on a thread's stack by the cooperative-yield path: only
/// the return words, in the opposite order to [`MinFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CoopFrame {
    pub pc: usize,
    pub status32: usize,
}

impl CoopFrame {
    pub const OFFSET_PC: usize = offset_of!(CoopFrame, pc);
    pub const OFFSET_STATUS32: usize = offset_of!(CoopFrame, status32);
}

impl Init for CoopFrame {
    const INIT: Self = Self { pc: 0, status32: 0 };
}

/// Push a [`MinFrame`] below `sp` and return the new stack pointer.
///
/// # Safety
///
/// `sp` must point one-past-the-end of at least [`MIN_FRAME_WORDS`] writable
/// words.
#[inline]
pub unsafe fn push_min(sp: *mut usize, pc: usize, status32: usize) -> *mut usize {
    let sp = unsafe { sp.sub(MIN_FRAME_WORDS) };
    unsafe { sp.cast::<MinFrame>().write(MinFrame { status32, pc }) };
    sp
}

/// Pop a [`MinFrame`] at `sp`; returns the frame and the unwound stack
/// pointer.
///
/// # Safety
///
/// `sp` must point at a frame previously written by [`push_min`] (or by an
/// interoperating interrupt path using the same layout).
#[inline]
pub unsafe fn pop_min(sp: *mut usize) -> (MinFrame, *mut usize) {
    let frame = unsafe { sp.cast::<MinFrame>().read() };
    (frame, unsafe { sp.add(MIN_FRAME_WORDS) })
}

/// Push a full [`IrqFrame`] below `sp` and return the new stack pointer.
///
/// # Safety
///
/// `sp` must point one-past-the-end of at least [`IRQ_FRAME_WORDS`] writable
/// words.
#[inline]
pub unsafe fn push_irq(sp: *mut usize, frame: &IrqFrame) -> *mut usize {
    let sp = unsafe { sp.sub(IRQ_FRAME_WORDS) };
    unsafe { sp.cast::<IrqFrame>().write(*frame) };
    sp
}

/// Pop a full [`IrqFrame`] at `sp`.
///
/// # Safety
///
/// `sp` must point at a frame previously written by [`push_irq`].
#[inline]
pub unsafe fn pop_irq(sp: *mut usize) -> (IrqFrame, *mut usize) {
    let frame = unsafe { sp.cast::<IrqFrame>().read() };
    (frame, unsafe { sp.add(IRQ_FRAME_WORDS) })
}

/// Push a [`CoopFrame`] below `sp` and return the new stack pointer.
///
/// # Safety
///
/// `sp` must point one-past-the-end of at least [`COOP_FRAME_WORDS`] writable
/// words.
#[inline]
pub unsafe fn push_coop(sp: *mut usize, pc: usize, status32: usize) -> *mut usize {
    let sp = unsafe { sp.sub(COOP_FRAME_WORDS) };
    unsafe { sp.cast::<CoopFrame>().write(CoopFrame { pc, status32 }) };
    sp
}

/// Pop a [`CoopFrame`] at `sp`.
///
/// # Safety
///
/// `sp` must point at a frame previously written by the cooperative-yield
/// path (or [`push_coop`]).
#[inline]
pub unsafe fn pop_coop(sp: *mut usize) -> (CoopFrame, *mut usize) {
    let frame = unsafe { sp.cast::<CoopFrame>().read() };
    (frame, unsafe { sp.add(COOP_FRAME_WORDS) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn min_frame_layout() {
        // pc-then-status push order puts the status word at the final stack
        // pointer and the pc one word above it.
        assert_eq!(MinFrame::OFFSET_STATUS32, 0);
        assert_eq!(MinFrame::OFFSET_PC, size_of::<usize>());
        assert_eq!(MIN_FRAME_WORDS, 2);
    }

    #[test]
    fn irq_frame_tail_matches_min_frame() {
        // After the general registers are popped, what remains must decode
        // as a `MinFrame`.
        assert_eq!(IrqFrame::OFFSET_RET, 0);
        assert_eq!(
            IrqFrame::OFFSET_RET + MinFrame::OFFSET_PC,
            MinFrame::OFFSET_PC
        );
    }

    #[test]
    fn coop_frame_is_a_different_shape() {
        assert_ne!(CoopFrame::OFFSET_PC, MinFrame::OFFSET_PC);
        assert_ne!(CoopFrame::OFFSET_STATUS32, MinFrame::OFFSET_STATUS32);
    }

    #[quickcheck]
    fn min_round_trip_touches_nothing_else(pc: usize, status32: usize) -> bool {
        // Canary words on both sides of the frame area.
        let mut stack = [0xa5a5_a5a5usize; 8];
        let base = unsafe { stack.as_mut_ptr().add(6) };
        let sp = unsafe { push_min(base, pc, status32) };
        assert_eq!(sp as usize, base as usize - 2 * size_of::<usize>());
        let (frame, sp2) = unsafe { pop_min(sp) };
        assert_eq!(sp2, base);
        frame.pc == pc
            && frame.status32 == status32
            && stack[..4].iter().all(|&w| w == 0xa5a5_a5a5)
            && stack[6..].iter().all(|&w| w == 0xa5a5_a5a5)
    }

    #[quickcheck]
    fn irq_round_trip(r0: usize, blink: usize, lp_count: usize, pc: usize) -> bool {
        let mut frame = IrqFrame::INIT;
        frame.r[0] = r0;
        frame.r[12] = !r0;
        frame.blink = blink;
        frame.lp_count = lp_count;
        frame.ret = MinFrame { status32: 0x8000_0000, pc };

        let mut stack = vec![0usize; IRQ_FRAME_WORDS + 4];
        let base = unsafe { stack.as_mut_ptr().add(IRQ_FRAME_WORDS + 2) };
        let sp = unsafe { push_irq(base, &frame) };
        let (read_back, sp2) = unsafe { pop_irq(sp) };
        sp2 == base && read_back == frame
    }

    #[test]
    fn coop_round_trip() {
        let mut stack = [0usize; 4];
        let base = unsafe { stack.as_mut_ptr().add(4) };
        let sp = unsafe { push_coop(base, 0x1234, 0x8000_0006) };
        let (frame, sp2) = unsafe { pop_coop(sp) };
        assert_eq!(sp2, base);
        assert_eq!(frame.pc, 0x1234);
        assert_eq!(frame.status32, 0x8000_0006);
    }
}
