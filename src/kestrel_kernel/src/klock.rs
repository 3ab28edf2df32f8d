//! Kernel state locking mechanism
//!
//! The kernel's only lock is the preemption-disabled state. Holding
//! [`PreemptGuard`] (or a [`KernelTokenRefMut`] borrowed from it) grants
//! access to every [`KernelCell`] of the kernel instance.
use core::{ops, sync::atomic::Ordering};
use tokenlock::UnsyncTokenLock;

use crate::{error::FatalError, state, utils::Init, KernelTraits};

#[doc(hidden)]
pub struct PreemptLockTag<Traits>(Traits);

/// The key that "unlocks" [`KernelCell`].
pub(super) type KernelToken<Traits> = tokenlock::UnsyncSingletonToken<PreemptLockTag<Traits>>;

/// The keyhole type for [`UnsyncTokenLock`] that can be "unlocked" by
/// [`KernelToken`].
pub(super) type KernelKeyhole<Traits> = tokenlock::SingletonTokenId<PreemptLockTag<Traits>>;

/// Cell type that can be accessed by [`KernelToken`] (which can be obtained
/// by [`lock_preempt`]).
pub struct KernelCell<Traits, T: ?Sized>(UnsyncTokenLock<T, KernelKeyhole<Traits>>);

impl<Traits, T> KernelCell<Traits, T> {
    pub const fn new(x: T) -> Self {
        Self(UnsyncTokenLock::new(KernelKeyhole::INIT, x))
    }
}

impl<Traits, T: Init> Init for KernelCell<Traits, T> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new(T::INIT);
}

impl<Traits, T> ops::Deref for KernelCell<Traits, T> {
    type Target = UnsyncTokenLock<T, KernelKeyhole<Traits>>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<Traits, T> ops::DerefMut for KernelCell<Traits, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Disable preemption and get an RAII guard. The calling context must be a
/// task context in which preemption is enabled; anything else is a fatal
/// `BadContext` error.
pub(super) fn lock_preempt<Traits: KernelTraits>() -> PreemptGuard<Traits> {
    state::expect_task_context::<Traits>();

    let state = Traits::state();
    if state.preempt_disabled.load(Ordering::Relaxed) {
        Traits::fatal_error(FatalError::BadContext);
    }
    state.preempt_disabled.store(true, Ordering::Relaxed);

    // Safety: We just disabled preemption. This also means there are no
    //         instances of `PreemptGuard` existing at this point.
    unsafe { assume_preempt_lock() }
}

/// Assume preemption is disabled and get `PreemptGuard`.
///
/// # Safety
///
/// Preemption must be really disabled. There must be no instances of
/// `PreemptGuard` existing at the point of the call, except for the ones
/// belonging to suspended contexts.
pub(super) unsafe fn assume_preempt_lock<Traits: KernelTraits>() -> PreemptGuard<Traits> {
    debug_assert!(Traits::state().preempt_disabled.load(Ordering::Relaxed));

    PreemptGuard {
        // Safety: There are no other usable instances of `KernelToken`; this
        //         is upheld by the caller.
        token: unsafe { KernelToken::new_unchecked() },
    }
}

/// RAII guard for the preemption-disabled state. Dropping it re-enables
/// preemption, running the scheduler first if a task switch became due in
/// the meantime.
///
/// [`KernelToken`] can be borrowed from this type.
pub(super) struct PreemptGuard<Traits: KernelTraits> {
    token: KernelToken<Traits>,
}

impl<Traits: KernelTraits> PreemptGuard<Traits> {
    /// Construct a [`KernelTokenRefMut`] by borrowing `self`.
    pub(super) fn borrow_mut(&mut self) -> KernelTokenRefMut<'_, Traits> {
        self.token.borrow_mut()
    }
}

impl<Traits: KernelTraits> Drop for PreemptGuard<Traits> {
    fn drop(&mut self) {
        // Safety: Preemption is currently disabled, and it's us (the kernel)
        // who are controlling the preemption state
        unsafe { state::preempt_enable::<Traits>(self.token.borrow_mut()) };
    }
}

impl<Traits: KernelTraits> ops::Deref for PreemptGuard<Traits> {
    type Target = KernelToken<Traits>;
    fn deref(&self) -> &Self::Target {
        &self.token
    }
}

impl<Traits: KernelTraits> ops::DerefMut for PreemptGuard<Traits> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.token
    }
}

/// Borrowed version of [`PreemptGuard`]. This is equivalent to
/// `&'a mut PreemptGuard` but does not consume memory.
///
///  - Always prefer this over `&mut PreemptGuard` in function parameters.
///  - The compiler doesn't reborrow this type automatically. You have to
///    call [`borrow_mut`] manually to pass it to a function and keep using
///    it afterwards.
///
/// [`borrow_mut`]: tokenlock::UnsyncSingletonTokenRefMut::borrow_mut
pub(super) type KernelTokenRefMut<'a, Traits> =
    tokenlock::UnsyncSingletonTokenRefMut<'a, PreemptLockTag<Traits>>;
