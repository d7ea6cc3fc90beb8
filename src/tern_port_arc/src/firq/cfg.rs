//! The configuration surface of the port.
#[cfg(feature = "smp")]
use core::ptr::NonNull;

#[cfg(any(feature = "smp", feature = "mpu", feature = "stack-guard"))]
use tern_kernel::ThreadCb;

/// The configuration of the port.
pub trait ThreadingOptions {
    /// The zero-based ID of the core this image instance runs on. Selects
    /// the [`KernelState`] instance the interrupt path mutates.
    ///
    /// [`KernelState`]: tern_kernel::KernelState
    const CPU_ID: usize = 0;

    /// Select a different incoming thread on a reschedule under symmetric
    /// multiprocessing. `None` means "no change": resume the interrupted
    /// context. The result is consumed as a black box; any cross-core
    /// synchronization happens inside.
    ///
    /// # Safety
    ///
    /// Only intended to be called by the port, on the outermost interrupt
    /// unwind.
    #[cfg(feature = "smp")]
    unsafe fn smp_switch_target(outgoing: *mut ThreadCb) -> Option<NonNull<ThreadCb>>;

    /// Reconfigure the memory-protection unit for the incoming thread on a
    /// switch, clearing any interrupt-active marking the protection state
    /// keeps for it.
    ///
    /// # Safety
    ///
    /// Only intended to be called by the port, after the incoming thread's
    /// registers are restored.
    #[cfg(feature = "mpu")]
    unsafe fn reconfigure_mpu(incoming: *const ThreadCb);

    /// Check the outgoing thread's stack sentinel. A failure is fatal to the
    /// running image (panic), never a propagated error.
    ///
    /// # Safety
    ///
    /// Only intended to be called by the port, before the reschedule
    /// decision.
    #[cfg(feature = "stack-guard")]
    unsafe fn check_stack_sentinel(outgoing: *const ThreadCb);
}

/// The generic interrupt dispatch collaborator: maps the pending interrupt
/// line to its registered handler and invokes it.
pub trait InterruptDispatch {
    /// Dispatch the pending fast interrupt.
    ///
    /// `interrupted_sp` is the interrupted thread's stack-pointer value,
    /// resolved by the entry sequencer even when the interrupt nested over
    /// another handler (the outermost interrupt's carry is consulted in that
    /// case).
    ///
    /// An invalid or unregistered interrupt line is this collaborator's
    /// responsibility; the sequencers have no error path.
    ///
    /// # Safety
    ///
    ///  - Only intended to be called by the entry sequencer.
    ///  - The implementation must not clobber the designated stack-carry
    ///    register ([`SP_CARRY_REG`]). Any ABI-conforming function satisfies
    ///    this: the register is callee-saved by the ARC calling convention,
    ///    but the invariant is stated here because the exit sequencer reads
    ///    it *as a register*, not through a call-return.
    unsafe fn dispatch(interrupted_sp: *mut usize);
}

/// The register carrying the interrupted context's stack pointer from entry
/// to exit, across the dispatch call, in the banked build. No separate
/// storage exists there: pairing of the stack switch is preserved through
/// both exit sub-paths via this register alone. The single-bank build keeps
/// the carry in per-core memory instead, since every register belongs to the
/// interrupted context.
pub const SP_CARRY_REG: &str = "r22";

/// Implemented on a port trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
pub unsafe trait PortInstance: ThreadingOptions + InterruptDispatch + 'static {}

/// Defines the entry points of a port instantiation. Implemented by
/// [`use_port!`].
pub trait EntryPoint {
    /// The fast-interrupt entry sequencer. Install this as the handler for
    /// every priority-0 interrupt vector.
    ///
    /// # Safety
    ///
    ///  - The processor must have entered fast-interrupt context through the
    ///    hardware vectoring mechanism (return pc in `ILINK`, status in
    ///    `STATUS32_P0`, register bank switched if the CPU has more than
    ///    one).
    ///  - In the single-bank build, the low-level wrapper must already have
    ///    spilled the general-purpose registers.
    #[cfg(target_os = "none")]
    const FIRQ_ENTRY: unsafe extern "C" fn() -> !;

    /// Resolve the per-core pointers and record the interrupt stack.
    ///
    /// # Safety
    ///
    /// Must complete on each configured core before its first interrupt is
    /// enabled. `irq_stack_top` must name the highest address of a region
    /// large enough for the deepest interrupt nest.
    #[cfg(target_os = "none")]
    unsafe fn init(irq_stack_top: *mut usize);
}

/// Define a port trait type implementing [`PortInstance`] and [`EntryPoint`].
/// **Requires [`ThreadingOptions`] and [`InterruptDispatch`].**
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $Traits:ident) => {
        $vis struct $Traits;

        mod port_arc_impl {
            use super::$Traits;
            use $crate::firq::cfg::{EntryPoint, PortInstance};

            unsafe impl PortInstance for $Traits {}

            impl EntryPoint for $Traits {
                #[cfg(target_os = "none")]
                const FIRQ_ENTRY: unsafe extern "C" fn() -> ! =
                    $crate::firq::imp::firq_entry::<$Traits>;

                #[cfg(target_os = "none")]
                unsafe fn init(irq_stack_top: *mut usize) {
                    unsafe { $crate::firq::imp::init::<$Traits>(irq_stack_top) }
                }
            }
        }

        const _: () = $crate::firq::cfg::validate::<$Traits>();
    };
}

/// Used by `use_port!`
#[doc(hidden)]
pub const fn validate<Traits: PortInstance>() {
    assert!(
        Traits::CPU_ID < tern_kernel::NUM_CPUS,
        "`CPU_ID` must name a configured core"
    );
}
