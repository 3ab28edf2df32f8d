//! Mutexes
//!
//! Waiting is a retry loop rather than a queue: `unlock` wakes every waiter,
//! and the scheduler's priority order decides which of them gets to retry
//! first and acquire the mutex.
use core::fmt;

use crate::{
    error::{fatal, FatalError},
    klock::{self, KernelCell, KernelTokenRefMut},
    sched::Scheduler,
    state,
    task::{self, WaitObject},
    timer::{self, TicksRelative},
    utils::Init,
    KernelCfg, KernelTraits, TaskId,
};

/// Identifies a mutex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MutexId(usize);

impl MutexId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Get the control block of the mutex, raising `BadId` if the id is out
    /// of range.
    pub(crate) fn cb<Traits: KernelTraits>(self) -> &'static MutexCb<Traits> {
        match Traits::mutex_cb_pool().get(self.0) {
            Some(mutex_cb) => mutex_cb,
            None => fatal::<Traits>(FatalError::BadId),
        }
    }
}

/// The static properties of a mutex.
#[derive(Clone, Copy, Debug)]
pub struct MutexAttr {
    /// The priority ceiling, expressed as the highest-priority task that may
    /// lock the mutex. Required by [`PriorityCeiling`] and ignored otherwise.
    ///
    /// [`PriorityCeiling`]: crate::sched::PriorityCeiling
    pub ceiling: Option<TaskId>,
}

impl MutexAttr {
    pub const fn new() -> Self {
        Self { ceiling: None }
    }

    pub const fn ceiling(self, task: TaskId) -> Self {
        Self {
            ceiling: Some(task),
        }
    }
}

impl Default for MutexAttr {
    fn default() -> Self {
        Self::new()
    }
}

/// *Mutex control block* - the state data of a mutex.
pub struct MutexCb<Traits: KernelCfg> {
    pub attr: MutexAttr,

    /// The task holding the mutex.
    pub(crate) holder: KernelCell<Traits, Option<TaskId>>,

    /// Scheduler-specific data.
    pub(super) sched_data: <Traits::Sched as Scheduler<Traits>>::PerMutexData,
}

impl<Traits: KernelCfg> MutexCb<Traits> {
    pub const fn new(attr: MutexAttr) -> Self {
        Self {
            attr,
            holder: Init::INIT,
            sched_data: Init::INIT,
        }
    }
}

impl<Traits: KernelCfg> fmt::Debug for MutexCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexCb")
            .field("self", &(self as *const _))
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

/// Check the preconditions of `lock` and `lock_timeout`.
fn expect_lockable<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    mutex: MutexId,
    task: TaskId,
) {
    if mutex.cb::<Traits>().holder.get(&*lock) == Some(task) {
        fatal::<Traits>(FatalError::MutexDeadlock);
    }
    Traits::state()
        .sched
        .check_lock(lock.borrow_mut().into(), mutex, task);
}

fn try_lock_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    mutex: MutexId,
    task: TaskId,
) -> bool {
    let mutex_cb = mutex.cb::<Traits>();
    if mutex_cb.holder.get(&*lock).is_some() {
        return false;
    }

    mutex_cb.holder.replace(&mut *lock, Some(task));
    Traits::state()
        .sched
        .mutex_locked(lock.borrow_mut().into(), mutex, task);
    true
}

/// Block until `mutex` is unlocked or, if `timeout` is given, the timeout
/// elapses.
fn wait_for_unlock<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    mutex: MutexId,
    task: TaskId,
    timeout: Option<TicksRelative>,
) {
    let sched = &Traits::state().sched;

    task::set_wait::<Traits>(lock.borrow_mut(), task, Some(WaitObject::Mutex(mutex)));
    sched.mutex_waiters_changed(lock.borrow_mut().into());

    match timeout {
        Some(timeout) => task::block_current_timeout::<Traits>(lock.borrow_mut(), timeout),
        None => task::block_current::<Traits>(lock.borrow_mut()),
    }

    // `unlock` clears the record, but a timeout or a signal doesn't
    task::set_wait::<Traits>(lock.borrow_mut(), task, None);
    sched.mutex_waiters_changed(lock.into());
}

pub(super) fn lock<Traits: KernelTraits>(mutex: MutexId) {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    expect_lockable::<Traits>(lock.borrow_mut(), mutex, current);

    while !try_lock_inner::<Traits>(lock.borrow_mut(), mutex, current) {
        wait_for_unlock::<Traits>(lock.borrow_mut(), mutex, current, None);
    }
}

pub(super) fn try_lock<Traits: KernelTraits>(mutex: MutexId) -> bool {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    Traits::state()
        .sched
        .check_lock(lock.borrow_mut().into(), mutex, current);

    let locked = try_lock_inner::<Traits>(lock.borrow_mut(), mutex, current);
    locked
}

pub(super) fn lock_timeout<Traits: KernelTraits>(mutex: MutexId, timeout: TicksRelative) -> bool {
    timer::expect_valid_timeout::<Traits>(timeout);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    expect_lockable::<Traits>(lock.borrow_mut(), mutex, current);

    let deadline = timer::deadline::<Traits>(lock.borrow_mut(), timeout);
    loop {
        if try_lock_inner::<Traits>(lock.borrow_mut(), mutex, current) {
            return true;
        }
        let Some(remaining) = timer::remaining_until::<Traits>(lock.borrow_mut(), deadline) else {
            return false;
        };
        wait_for_unlock::<Traits>(lock.borrow_mut(), mutex, current, Some(remaining));
    }
}

pub(super) fn unlock<Traits: KernelTraits>(mutex: MutexId) {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    let mutex_cb = mutex.cb::<Traits>();
    let sched = &Traits::state().sched;

    if mutex_cb.holder.get(&*lock) != Some(current) {
        fatal::<Traits>(FatalError::MutexNotOwner);
    }

    mutex_cb.holder.replace(&mut *lock, None);
    sched.mutex_unlocked(lock.borrow_mut().into(), mutex);

    if task::wake_waiters::<Traits>(lock.borrow_mut(), WaitObject::Mutex(mutex)) {
        sched.mutex_waiters_changed(lock.borrow_mut().into());
    }

    // The current task may have lost a raised priority
    state::preempt_pend::<Traits>();
}

pub(super) fn holder_is_current<Traits: KernelTraits>(mutex: MutexId) -> bool {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    let holder = mutex.cb::<Traits>().holder.get(&*lock);
    holder == Some(current)
}

pub(super) fn is_locked<Traits: KernelTraits>(mutex: MutexId) -> bool {
    let lock = klock::lock_preempt::<Traits>();
    let holder = mutex.cb::<Traits>().holder.get(&*lock);
    holder.is_some()
}
