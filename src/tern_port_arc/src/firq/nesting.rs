//! The interrupt-nesting tracker.
//!
//! The counter lives in the per-CPU [`KernelState`] and is shared with the
//! regular-interrupt path: both increment on entry and decrement on exit.
//! Because the counter alone cannot distinguish "unwinding past another
//! still-active interrupt" (the regular path may have been preempted mid-
//! handler), the outermost-unwind test additionally consults the hardware
//! per-priority active mask (`AUX_IRQ_ACT`).
use tern_kernel::KernelState;

use crate::arc::IRQ_ACT_ACTIVE_MASK;

/// Increment the nesting counter; `true` iff this is the outermost interrupt
/// (the pre-increment value was zero), in which case the caller must switch
/// to the interrupt stack.
///
/// # Safety
///
/// Caller must be the owning core's interrupt path (or a hosted simulation
/// owning `state`).
#[inline]
pub unsafe fn enter(state: &KernelState) -> bool {
    let depth = unsafe { state.nested() };
    unsafe { state.set_nested(depth + 1) };
    depth == 0
}

/// Decrement the nesting counter.
///
/// # Safety
///
/// Same contract as [`enter`]. The counter must be positive: every `leave`
/// pairs with exactly one `enter`.
#[inline]
pub unsafe fn leave(state: &KernelState) {
    let depth = unsafe { state.nested() };
    debug_assert!(depth > 0, "unbalanced interrupt nesting");
    unsafe { state.set_nested(depth - 1) };
}

/// Whether this unwind is still nested, judging from the `AUX_IRQ_ACT`
/// active mask sampled before the interrupt return.
///
/// Our own priority bit is still set at this point, so "nested" means more
/// than one active bit: the lowest and the highest set bit differ. A
/// reschedule may only occur when this returns `false` — never while
/// returning to a still-interrupted context.
#[inline]
pub fn unwind_is_nested(irq_act: usize) -> bool {
    let active = irq_act & IRQ_ACT_ACTIVE_MASK;
    match active {
        0 => false,
        _ => active.trailing_zeros() != usize::BITS - 1 - active.leading_zeros(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn balanced_nesting_restores_depth(depth: u8) -> bool {
        let depth = usize::from(depth % 64) + 1;
        let state = KernelState::new();

        let mut outermost_entries = 0;
        for _ in 0..depth {
            if unsafe { enter(&state) } {
                outermost_entries += 1;
            }
        }
        for _ in 0..depth {
            unsafe { leave(&state) };
        }

        // Only the first `enter` crosses the stack boundary, and the counter
        // returns to its original value.
        outermost_entries == 1 && unsafe { state.nested() } == 0
    }

    #[test]
    fn reentry_after_full_unwind_is_outermost_again() {
        let state = KernelState::new();
        assert!(unsafe { enter(&state) });
        unsafe { leave(&state) };
        assert!(unsafe { enter(&state) });
        assert!(!unsafe { enter(&state) });
        unsafe { leave(&state) };
        unsafe { leave(&state) };
    }

    #[test]
    fn unwind_nesting_mask() {
        // Only our own priority bit set: outermost unwind.
        assert!(!unwind_is_nested(0b0001));
        assert!(!unwind_is_nested(0b1000));
        // A lower-priority interrupt is still active beneath us.
        assert!(unwind_is_nested(0b0011));
        assert!(unwind_is_nested(0b1001));
        // Bits above the active half are ignored.
        assert!(!unwind_is_nested(0x5a5a_0000 | 0b0100));
        assert!(!unwind_is_nested(0));
    }
}
