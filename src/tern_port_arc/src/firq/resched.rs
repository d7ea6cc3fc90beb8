//! The exit-time reschedule decision.
//!
//! The decision proper is a pure function of the per-CPU scheduling state
//! and the unwind nesting, so the assembly exit path and the hosted
//! simulation share one implementation: the exit sequencer calls
//! [`exit_decide_on`] through a thin `extern "C"` shim and branches on the
//! returned value.
use core::ptr::NonNull;

use tern_kernel::{KernelState, RelinquishCause, ThreadCb};

use super::{cfg::PortInstance, nesting};

/// The outcome of the reschedule check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Resume the interrupted context unchanged.
    ReturnUnchanged,
    /// Switch to the ready-queue cache thread.
    Switch,
}

/// What the exit sequencer is to do after the bookkeeping ran.
///
/// The two no-reschedule cases are distinct because only the outermost
/// unwind crossed the interrupt-stack boundary on entry and must cross back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPlan {
    /// A nested unwind: resume the still-interrupted context. The stack
    /// pointer was never switched for this entry, so it is left alone.
    NestedReturn,
    /// The outermost unwind with no preemption needed: restore the carried
    /// stack pointer and resume the interrupted thread.
    OutermostReturn,
    /// Switch to this thread.
    Switch(NonNull<ThreadCb>),
}

/// Decide between resuming the interrupted context and switching threads.
///
/// Pure: the result depends only on the arguments and the compile-time
/// `preempt` setting. `still_nested` is the [`nesting::unwind_is_nested`]
/// result for this unwind; rescheduling never occurs while returning to a
/// still-interrupted context.
#[inline]
pub fn decide(
    current: *mut ThreadCb,
    ready_queue_cache: *mut ThreadCb,
    still_nested: bool,
) -> Decision {
    if still_nested || !cfg!(feature = "preempt") {
        return Decision::ReturnUnchanged;
    }
    if ready_queue_cache.is_null() || ready_queue_cache == current {
        // No higher- or equal-priority thread is ready.
        Decision::ReturnUnchanged
    } else {
        Decision::Switch
    }
}

/// Run the exit-time bookkeeping against `state`: decrement the nesting
/// counter, make the reschedule decision, and on a switch record the
/// outgoing thread's relinquish cause and update `current`.
///
/// The caller performs the actual register save/restore around this; the
/// outgoing thread's callee-saved registers are untouched here, so a save
/// done afterwards still captures their entry-time values.
///
/// `irq_act` is the `AUX_IRQ_ACT` value sampled by the caller.
///
/// # Safety
///
/// Caller must be the owning core's interrupt path at fast-interrupt
/// priority (or a hosted simulation owning `state`), with `state.current`
/// pointing at a valid control block.
pub unsafe fn exit_decide_on<Traits: PortInstance>(
    state: &KernelState,
    irq_act: usize,
) -> ExitPlan {
    unsafe { nesting::leave(state) };
    let still_nested = nesting::unwind_is_nested(irq_act);
    let current = unsafe { state.current() };

    #[cfg(feature = "stack-guard")]
    unsafe {
        Traits::check_stack_sentinel(current)
    };

    let incoming = {
        #[cfg(feature = "smp")]
        {
            if still_nested || !cfg!(feature = "preempt") {
                return no_reschedule(still_nested);
            }
            // The handoff collaborator may itself pick a different incoming
            // thread; "no change" comes back as `None`.
            match unsafe { Traits::smp_switch_target(current) } {
                Some(incoming) if incoming.as_ptr() != current => incoming.as_ptr(),
                _ => return no_reschedule(still_nested),
            }
        }
        #[cfg(not(feature = "smp"))]
        {
            let cache = unsafe { state.ready_queue_cache() };
            match decide(current, cache, still_nested) {
                Decision::ReturnUnchanged => return no_reschedule(still_nested),
                Decision::Switch => cache,
            }
        }
    };

    unsafe { (*current).set_relinquish_cause(RelinquishCause::FastIrq) };
    unsafe { state.set_current(incoming) };
    // `incoming` came from a non-null, non-equal comparison above.
    match NonNull::new(incoming) {
        Some(incoming) => ExitPlan::Switch(incoming),
        None => ExitPlan::OutermostReturn,
    }
}

#[inline]
fn no_reschedule(still_nested: bool) -> ExitPlan {
    if still_nested {
        ExitPlan::NestedReturn
    } else {
        ExitPlan::OutermostReturn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr;

    use crate::firq::cfg::{InterruptDispatch, ThreadingOptions};

    crate::use_port!(unsafe struct TestPort);

    impl ThreadingOptions for TestPort {}

    impl InterruptDispatch for TestPort {
        unsafe fn dispatch(_interrupted_sp: *mut usize) {}
    }

    fn thread() -> ThreadCb {
        ThreadCb::new()
    }

    #[test]
    fn equal_cache_never_reschedules() {
        let a = thread();
        let p = &a as *const _ as *mut ThreadCb;
        assert_eq!(decide(p, p, false), Decision::ReturnUnchanged);
        assert_eq!(decide(p, p, true), Decision::ReturnUnchanged);
    }

    #[test]
    fn unequal_cache_reschedules_only_on_outermost_unwind() {
        let a = thread();
        let b = thread();
        let pa = &a as *const _ as *mut ThreadCb;
        let pb = &b as *const _ as *mut ThreadCb;
        assert_eq!(decide(pa, pb, false), Decision::Switch);
        assert_eq!(decide(pa, pb, true), Decision::ReturnUnchanged);
        assert_eq!(decide(pa, ptr::null_mut(), false), Decision::ReturnUnchanged);
    }

    #[test]
    fn switch_records_cause_and_updates_current() {
        let a = thread();
        let b = thread();
        let pa = &a as *const _ as *mut ThreadCb;
        let pb = &b as *const _ as *mut ThreadCb;

        let state = KernelState::new();
        unsafe {
            state.set_current(pa);
            state.set_ready_queue_cache(pb);
            // One outstanding interrupt: ours.
            state.set_nested(1);
        }

        let plan = unsafe { exit_decide_on::<TestPort>(&state, 0b0001) };
        assert_eq!(plan, ExitPlan::Switch(NonNull::new(pb).unwrap()));
        unsafe {
            assert_eq!(a.relinquish_cause(), RelinquishCause::FastIrq);
            assert_eq!(state.current(), pb);
            assert_eq!(state.nested(), 0);
        }
    }

    #[test]
    fn nested_unwind_touches_nothing_but_the_counter() {
        let a = thread();
        let b = thread();
        let pa = &a as *const _ as *mut ThreadCb;
        let pb = &b as *const _ as *mut ThreadCb;

        let state = KernelState::new();
        unsafe {
            state.set_current(pa);
            state.set_ready_queue_cache(pb);
            state.set_nested(2);
        }

        // A lower-priority interrupt is still active: two bits set.
        let plan = unsafe { exit_decide_on::<TestPort>(&state, 0b0011) };
        assert_eq!(plan, ExitPlan::NestedReturn);
        unsafe {
            assert_eq!(a.relinquish_cause(), RelinquishCause::Cooperative);
            assert_eq!(state.current(), pa);
            assert_eq!(state.nested(), 1);
        }
    }

    #[test]
    fn outermost_unwind_without_ready_work_returns_unchanged() {
        let a = thread();
        let pa = &a as *const _ as *mut ThreadCb;

        let state = KernelState::new();
        unsafe {
            state.set_current(pa);
            state.set_ready_queue_cache(pa);
            state.set_nested(1);
        }

        let plan = unsafe { exit_decide_on::<TestPort>(&state, 0b0001) };
        assert_eq!(plan, ExitPlan::OutermostReturn);
        unsafe { assert_eq!(state.current(), pa) };
    }
}
