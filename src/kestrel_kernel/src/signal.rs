//! Signals
use crate::{
    klock::{self, KernelTokenRefMut},
    state, task, KernelTraits, TaskId,
};

/// A set of signals, one bit each. Every bit is available to the
/// application.
pub type SignalSet = u32;

/// Clear the pending subset of `set` on `task` and return it.
fn take<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    set: SignalSet,
) -> SignalSet {
    let pending = task
        .cb::<Traits>()
        .signals
        .replace_with(&mut *lock, |pending| *pending & !set);
    pending & set
}

/// Block the current task `task` until a signal in `set` is pending, then
/// clear and return the pending subset of `set`.
pub(super) fn wait_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    set: SignalSet,
) -> SignalSet {
    loop {
        let received = take::<Traits>(lock.borrow_mut(), task, set);
        if received != 0 {
            return received;
        }
        task::block_current::<Traits>(lock.borrow_mut());
    }
}

/// Add `set` to the pending signals of `task` and make it runnable, whether
/// or not it's waiting for these signals. The caller is responsible for
/// requesting a task switch if it's outside the dispatcher.
pub(super) fn send_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    set: SignalSet,
) {
    task.cb::<Traits>()
        .signals
        .replace_with(&mut *lock, |pending| *pending | set);
    task::make_runnable::<Traits>(lock, task);
}

pub(super) fn is_pending<Traits: KernelTraits>(
    lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    set: SignalSet,
) -> bool {
    task.cb::<Traits>().signals.get(&*lock) & set != 0
}

pub(super) fn wait_set<Traits: KernelTraits>(set: SignalSet) -> SignalSet {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    let received = wait_inner::<Traits>(lock.borrow_mut(), current, set);
    received
}

pub(super) fn poll_set<Traits: KernelTraits>(set: SignalSet) -> SignalSet {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    let received = take::<Traits>(lock.borrow_mut(), current, set);
    received
}

pub(super) fn peek_set<Traits: KernelTraits>(set: SignalSet) -> SignalSet {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    let pending = current.cb::<Traits>().signals.get(&*lock);
    pending & set
}

pub(super) fn send_set<Traits: KernelTraits>(task: TaskId, set: SignalSet) {
    let mut lock = klock::lock_preempt::<Traits>();
    send_inner::<Traits>(lock.borrow_mut(), task, set);
    state::preempt_pend::<Traits>();
}
