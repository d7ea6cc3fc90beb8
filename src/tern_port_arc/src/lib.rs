//! ARC EM/HS fast-interrupt (FIRQ) port for the Tern kernel.
//!
//! This crate implements the fast-interrupt entry/exit transition layer: the
//! path executed on every hardware interrupt of the highest priority class.
//! The generic interrupt demultiplexer, the scheduler's thread-selection
//! policy, the regular-interrupt path, and cross-core handoff are external
//! collaborators reached through the traits in [`firq::cfg`].
//!
//! The protocol logic that does not touch privileged state — the nesting
//! tracker, the stack-frame codec, and the reschedule decision — is plain
//! Rust and compiles (and is unit-tested) on any host. The entry/exit
//! sequencers themselves are naked functions full of ARC inline assembly and
//! only build for bare-metal targets.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arc;

/// The fast-interrupt transition layer.
pub mod firq {
    pub mod cfg;
    pub mod frame;
    #[cfg(target_os = "none")]
    pub mod imp;
    pub mod nesting;
    pub mod resched;
}

pub use self::firq::cfg::*;
