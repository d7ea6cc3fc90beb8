//! Per-CPU kernel scheduling state.
use core::{cell::UnsafeCell, mem::offset_of};

use crate::{thread::ThreadCb, utils::Init};

/// The number of per-CPU state instances in the image.
#[cfg(feature = "smp")]
pub const NUM_CPUS: usize = 2;
#[cfg(not(feature = "smp"))]
pub const NUM_CPUS: usize = 1;

/// The per-CPU scheduling state an interrupt path interoperates with.
///
/// All fields are owned by one core. Only that core's interrupt path may
/// mutate them, and it does so with interrupts at the highest priority, so no
/// further synchronization exists here. Cross-core agreement is entirely the
/// SMP handoff collaborator's concern.
#[repr(C)]
pub struct KernelState {
    /// Interrupt nesting counter. Incremented on every fast or regular
    /// interrupt entry, decremented on exit. Zero at the moment of entry
    /// identifies the outermost interrupt.
    pub nested: UnsafeCell<usize>,
    /// Top of the per-CPU interrupt stack (grows downwards).
    pub irq_stack_top: UnsafeCell<*mut usize>,
    /// The running thread.
    pub current: UnsafeCell<*mut ThreadCb>,
    /// The highest-priority ready thread, precomputed by the scheduler. A
    /// port never searches a ready list itself.
    pub ready_queue_cache: UnsafeCell<*mut ThreadCb>,
}

// See the struct-level comment for the ownership discipline.
unsafe impl Sync for KernelState {}

impl Init for KernelState {
    #[allow(clippy::declare_interior_mutable_const)] // it's intentional
    const INIT: Self = Self {
        nested: UnsafeCell::new(0),
        irq_stack_top: UnsafeCell::new(core::ptr::null_mut()),
        current: UnsafeCell::new(core::ptr::null_mut()),
        ready_queue_cache: UnsafeCell::new(core::ptr::null_mut()),
    };
}

impl KernelState {
    pub const OFFSET_NESTED: usize = offset_of!(KernelState, nested);
    pub const OFFSET_IRQ_STACK_TOP: usize = offset_of!(KernelState, irq_stack_top);
    pub const OFFSET_CURRENT: usize = offset_of!(KernelState, current);
    pub const OFFSET_READY_QUEUE_CACHE: usize = offset_of!(KernelState, ready_queue_cache);

    pub const fn new() -> Self {
        Self::INIT
    }

    /// # Safety
    ///
    /// Caller must be the owning core's interrupt path, or hold an equivalent
    /// exclusivity guarantee (e.g., interrupts not yet enabled, or a hosted
    /// simulation owning the instance).
    #[inline]
    pub unsafe fn nested(&self) -> usize {
        unsafe { *self.nested.get() }
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn set_nested(&self, value: usize) {
        unsafe { *self.nested.get() = value };
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn current(&self) -> *mut ThreadCb {
        unsafe { *self.current.get() }
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn set_current(&self, thread: *mut ThreadCb) {
        unsafe { *self.current.get() = thread };
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn ready_queue_cache(&self) -> *mut ThreadCb {
        unsafe { *self.ready_queue_cache.get() }
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn set_ready_queue_cache(&self, thread: *mut ThreadCb) {
        unsafe { *self.ready_queue_cache.get() = thread };
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn irq_stack_top(&self) -> *mut usize {
        unsafe { *self.irq_stack_top.get() }
    }

    /// # Safety
    ///
    /// See [`Self::nested`].
    #[inline]
    pub unsafe fn set_irq_stack_top(&self, top: *mut usize) {
        unsafe { *self.irq_stack_top.get() = top };
    }
}

impl Default for KernelState {
    fn default() -> Self {
        Self::INIT
    }
}

/// The image-wide kernel state: one [`KernelState`] per CPU.
#[repr(C)]
pub struct Kernel {
    pub cpus: [KernelState; NUM_CPUS],
}

impl Kernel {
    /// The state instance owned by the given core.
    #[inline]
    pub fn cpu(&self, id: usize) -> &KernelState {
        &self.cpus[id]
    }
}

static KERNEL: Kernel = Kernel {
    cpus: [KernelState::INIT; NUM_CPUS],
};

/// The global kernel state instance referenced by the interrupt paths.
///
/// Hosted simulations construct their own [`KernelState`] instances instead.
#[inline]
pub fn kernel() -> &'static Kernel {
    &KERNEL
}
