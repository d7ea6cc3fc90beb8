//! Utilities shared between the kernel and the ports.
use core::cell::UnsafeCell;

/// Trait for types having a constant default value, usable in a `const`
/// context (unlike `Default::default`).
pub trait Init {
    /// The default value.
    const INIT: Self;
}

impl Init for usize {
    const INIT: Self = 0;
}

impl Init for u32 {
    const INIT: Self = 0;
}

impl<T> Init for *mut T {
    const INIT: Self = core::ptr::null_mut();
}

impl<T: Init> Init for UnsafeCell<T> {
    const INIT: Self = UnsafeCell::new(T::INIT);
}

impl<T: Init, const N: usize> Init for [T; N] {
    const INIT: Self = [T::INIT; N];
}
