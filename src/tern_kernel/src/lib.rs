//! The kernel-side data model consumed by the Tern port crates.
//!
//! This crate deliberately contains no scheduling policy. It defines the
//! control-block and per-CPU state *layouts* that an architecture port
//! interoperates with, plus the constants describing them. The scheduler
//! populates [`KernelState::ready_queue_cache`]; a port only ever reads it.
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]

mod state;
mod thread;
pub mod utils;

pub use self::{
    state::{kernel, Kernel, KernelState, NUM_CPUS},
    thread::{CalleeSaved, RelinquishCause, StackLimits, ThreadCb},
};
