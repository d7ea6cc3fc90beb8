//! Thread control blocks.
use core::{cell::UnsafeCell, fmt, mem::offset_of};

use crate::utils::Init;

/// Why a thread last went off-CPU.
///
/// Stored in [`ThreadCb`] as a machine word so that the interrupt-exit path
/// can read and write it with a single load/store. The restore procedure
/// branches on this tag: the cooperative-yield path and the interrupt paths
/// leave genuinely different stack layouts behind, and the tag selects which
/// one to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum RelinquishCause {
    /// The thread called the yield primitive itself.
    Cooperative = 0,
    /// The thread was preempted by a regular interrupt.
    RegularIrq = 1,
    /// The thread was preempted by a fast interrupt.
    FastIrq = 2,
}

impl RelinquishCause {
    /// Decode a raw tag value previously stored by a port.
    ///
    /// Returns `None` for values no port ever writes.
    pub const fn from_raw(x: usize) -> Option<Self> {
        match x {
            0 => Some(Self::Cooperative),
            1 => Some(Self::RegularIrq),
            2 => Some(Self::FastIrq),
            _ => None,
        }
    }
}

/// The ARC callee-saved register block: `r13`–`r25`, `gp`, `fp`, `r30`, and
/// the stack pointer.
///
/// A port treats this as opaque bulk storage ("save all, restore all"). The
/// stack pointer is deliberately last so the restore sequence can load it
/// after every other register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct CalleeSaved {
    /// `r13`–`r25`. `r23`–`r25` double as the loop-register save slots on
    /// fast-interrupt entry, but by the time this block is written they hold
    /// the interrupted thread's values again.
    pub r: [usize; 13],
    pub gp: usize,
    pub fp: usize,
    pub r30: usize,
    pub sp: usize,
}

impl Init for CalleeSaved {
    const INIT: Self = Self {
        r: [0; 13],
        gp: 0,
        fp: 0,
        r30: 0,
        sp: 0,
    };
}

/// Hardware stack-limit registers of a thread, used when stack checking is
/// configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct StackLimits {
    pub base: usize,
    pub top: usize,
}

impl Init for StackLimits {
    const INIT: Self = Self { base: 0, top: 0 };
}

/// A thread control block, as seen by an architecture port.
///
/// The fields an interrupt path touches are `UnsafeCell`s: they are mutated
/// from naked functions and from `extern "C"` helpers running at the highest
/// interrupt priority, where the owning core has exclusive access by
/// construction.
#[repr(C)]
pub struct ThreadCb {
    /// Callee-saved registers of the thread while it is off-CPU.
    pub callee_saved: UnsafeCell<CalleeSaved>,
    /// The [`RelinquishCause`] tag, stored raw.
    pub relinquish_cause: UnsafeCell<usize>,
    /// Stack-limit registers, loaded on switch when stack checking is
    /// configured.
    pub stack_limits: UnsafeCell<StackLimits>,
}

// Only the owning core's interrupt path mutates these fields, with interrupts
// at the highest priority.
unsafe impl Sync for ThreadCb {}

impl Init for ThreadCb {
    #[allow(clippy::declare_interior_mutable_const)] // it's intentional
    const INIT: Self = Self {
        callee_saved: UnsafeCell::new(CalleeSaved::INIT),
        relinquish_cause: UnsafeCell::new(RelinquishCause::Cooperative as usize),
        stack_limits: UnsafeCell::new(StackLimits::INIT),
    };
}

impl ThreadCb {
    pub const OFFSET_CALLEE_SAVED: usize = offset_of!(ThreadCb, callee_saved);
    pub const OFFSET_RELINQUISH_CAUSE: usize = offset_of!(ThreadCb, relinquish_cause);
    pub const OFFSET_STACK_LIMITS: usize = offset_of!(ThreadCb, stack_limits);

    pub const fn new() -> Self {
        Self::INIT
    }

    /// Read the relinquish-cause tag.
    ///
    /// # Safety
    ///
    /// No port may be concurrently writing the tag. Callers on the owning
    /// core at fast-interrupt priority satisfy this trivially.
    #[inline]
    pub unsafe fn relinquish_cause(&self) -> RelinquishCause {
        let raw = unsafe { *self.relinquish_cause.get() };
        match RelinquishCause::from_raw(raw) {
            Some(cause) => cause,
            // A port only ever stores one of the three tags.
            None => unreachable!("corrupted relinquish cause: {}", raw),
        }
    }

    /// Write the relinquish-cause tag.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::relinquish_cause`].
    #[inline]
    pub unsafe fn set_relinquish_cause(&self, cause: RelinquishCause) {
        unsafe { *self.relinquish_cause.get() = cause as usize };
    }
}

impl Default for ThreadCb {
    fn default() -> Self {
        Self::INIT
    }
}

impl fmt::Debug for ThreadCb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCb").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn only_the_three_tags_decode(x: usize) -> bool {
        match RelinquishCause::from_raw(x) {
            Some(cause) => x == cause as usize,
            None => x > 2,
        }
    }

    #[test]
    fn cause_raw_round_trip() {
        for cause in [
            RelinquishCause::Cooperative,
            RelinquishCause::RegularIrq,
            RelinquishCause::FastIrq,
        ] {
            assert_eq!(RelinquishCause::from_raw(cause as usize), Some(cause));
        }
        assert_eq!(RelinquishCause::from_raw(3), None);
    }

    #[test]
    fn callee_saved_precedes_cause() {
        // The bulk save sequence stores at ascending offsets from the control
        // block base; the cause tag must not alias any of its slots.
        assert!(
            ThreadCb::OFFSET_CALLEE_SAVED + core::mem::size_of::<CalleeSaved>()
                <= ThreadCb::OFFSET_RELINQUISH_CAUSE
        );
    }
}
