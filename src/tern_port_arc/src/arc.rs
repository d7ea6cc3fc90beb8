//! ARC v2 (EM/HS) architecture definitions shared by the sequencers, the
//! frame codec, and hosted simulations.
#![allow(clippy::identity_op)]

use bitflags::bitflags;

/// Auxiliary-register numbers, as used by `lr`/`sr`.
pub mod aux {
    /// `LP_START` — zero-overhead loop start address.
    pub const LP_START: u32 = 0x002;
    /// `LP_END` — zero-overhead loop end address.
    pub const LP_END: u32 = 0x003;
    /// `STATUS32` — the processor status word.
    pub const STATUS32: u32 = 0x00a;
    /// `STATUS32_P0` — the status word captured on priority-0 (fast)
    /// interrupt entry.
    pub const STATUS32_P0: u32 = 0x00b;
    /// `USER_SP` — the user-stack save slot. Doubles as the first half of the
    /// scratch pair in the nested bank-swap protocol: fast interrupts are
    /// uninterruptible by anything but an exception, so the transient use
    /// cannot collide with the slot's architectural role mid-protocol.
    pub const USER_SP: u32 = 0x00d;
    /// The second half of the scratch pair: a port-reserved auxiliary slot
    /// in this architecture abstraction. Both halves are saved before the
    /// bank swap and restored after it.
    pub const SCRATCH: u32 = 0x00e;
    /// `AUX_IRQ_ACT` — one active bit per interrupt priority level.
    pub const IRQ_ACT: u32 = 0x043;
    /// `KSTACK_TOP` — hardware stack-limit check register (top bound).
    pub const KSTACK_TOP: u32 = 0x264;
    /// `KSTACK_BASE` — hardware stack-limit check register (base bound).
    pub const KSTACK_BASE: u32 = 0x265;
}

bitflags! {
    /// `STATUS32` bits this layer touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[repr(transparent)]
    pub struct Status32: u32 {
        /// `U` — user mode.
        const U = 1 << 7;
        /// `SC` — stack checking enable. Cleared on fast-interrupt entry
        /// because the interrupt stack is not covered by the interrupted
        /// thread's limit registers.
        const SC = 1 << 14;
        /// `IE` — interrupt enable.
        const IE = 1 << 31;
        /// `RB` — the active register-bank field (3 bits).
        const RB_MASK = 0b111 << Self::RB_SHIFT;
    }
}

impl Status32 {
    pub const RB_SHIFT: u32 = 16;

    /// The status word with the register-bank field replaced by `bank`.
    #[inline]
    pub const fn with_bank(self, bank: u32) -> Self {
        Self::from_bits_retain(
            (self.bits() & !Self::RB_MASK.bits()) | ((bank & 0b111) << Self::RB_SHIFT),
        )
    }

    /// The active register bank.
    #[inline]
    pub const fn bank(self) -> u32 {
        (self.bits() & Self::RB_MASK.bits()) >> Self::RB_SHIFT
    }
}

/// The register bank fast interrupts run in when the CPU has more than one.
pub const FIRQ_BANK: u32 = 1;

/// The low half of `AUX_IRQ_ACT`: one bit per priority level with an
/// interrupt currently active.
pub const IRQ_ACT_ACTIVE_MASK: usize = 0xffff;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_field_round_trip() {
        let s = Status32::IE.with_bank(1);
        assert_eq!(s.bank(), 1);
        assert!(s.contains(Status32::IE));
        assert_eq!(s.with_bank(0).bank(), 0);
        // Only the RB field changes.
        assert_eq!(s.with_bank(0) | Status32::RB_MASK, s | Status32::RB_MASK);
    }
}
