//! Counting semaphores
use core::fmt;

use crate::{
    error::{fatal, FatalError},
    klock::{self, KernelCell, KernelTokenRefMut},
    task::{self, WaitObject},
    timer::{self, TicksRelative},
    KernelCfg, KernelTraits, TaskId,
};

/// Identifies a semaphore.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SemaphoreId(usize);

impl SemaphoreId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Get the control block of the semaphore, raising `BadId` if the id is
    /// out of range.
    pub(crate) fn cb<Traits: KernelTraits>(self) -> &'static SemaphoreCb<Traits> {
        match Traits::semaphore_cb_pool().get(self.0) {
            Some(semaphore_cb) => semaphore_cb,
            None => fatal::<Traits>(FatalError::BadId),
        }
    }
}

pub type SemaphoreValue = u32;

/// The static properties of a semaphore.
#[derive(Clone, Copy, Debug)]
pub struct SemaphoreAttr {
    pub initial: SemaphoreValue,

    /// The maximum value. Posting to a semaphore at its maximum value is a
    /// fatal error. `None` leaves the value unbounded until
    /// `System::sem_max_init` sets a maximum.
    pub max: Option<SemaphoreValue>,
}

impl SemaphoreAttr {
    pub const fn new() -> Self {
        Self {
            initial: 0,
            max: None,
        }
    }

    pub const fn initial(self, initial: SemaphoreValue) -> Self {
        Self { initial, ..self }
    }

    pub const fn max(self, max: SemaphoreValue) -> Self {
        Self {
            max: Some(max),
            ..self
        }
    }
}

impl Default for SemaphoreAttr {
    fn default() -> Self {
        Self::new()
    }
}

/// *Semaphore control block* - the state data of a semaphore.
pub struct SemaphoreCb<Traits: KernelCfg> {
    pub attr: SemaphoreAttr,

    pub(crate) value: KernelCell<Traits, SemaphoreValue>,

    pub(crate) max: KernelCell<Traits, Option<SemaphoreValue>>,
}

impl<Traits: KernelCfg> SemaphoreCb<Traits> {
    pub const fn new(attr: SemaphoreAttr) -> Self {
        Self {
            attr,
            value: KernelCell::new(attr.initial),
            max: KernelCell::new(attr.max),
        }
    }
}

impl<Traits: KernelCfg> fmt::Debug for SemaphoreCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SemaphoreCb")
            .field("self", &(self as *const _))
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

/// Validate the semaphore table. Called at boot.
pub(super) fn init<Traits: KernelTraits>(_lock: KernelTokenRefMut<'_, Traits>) {
    for semaphore_cb in Traits::semaphore_cb_pool() {
        match semaphore_cb.attr.max {
            Some(0) => fatal::<Traits>(FatalError::InvalidConfig),
            Some(max) if semaphore_cb.attr.initial > max => {
                fatal::<Traits>(FatalError::InvalidConfig)
            }
            _ => {}
        }
    }
}

fn try_wait_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    semaphore: SemaphoreId,
) -> bool {
    let value = &semaphore.cb::<Traits>().value;
    match value.get(&*lock) {
        0 => false,
        x => {
            value.replace(&mut *lock, x - 1);
            true
        }
    }
}

/// Block until `semaphore` is posted or, if `timeout` is given, the timeout
/// elapses.
fn wait_for_post<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    semaphore: SemaphoreId,
    task: TaskId,
    timeout: Option<TicksRelative>,
) {
    task::set_wait::<Traits>(
        lock.borrow_mut(),
        task,
        Some(WaitObject::Semaphore(semaphore)),
    );

    match timeout {
        Some(timeout) => task::block_current_timeout::<Traits>(lock.borrow_mut(), timeout),
        None => task::block_current::<Traits>(lock.borrow_mut()),
    }

    task::set_wait::<Traits>(lock, task, None);
}

pub(super) fn wait<Traits: KernelTraits>(semaphore: SemaphoreId) {
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());
    semaphore.cb::<Traits>();

    while !try_wait_inner::<Traits>(lock.borrow_mut(), semaphore) {
        wait_for_post::<Traits>(lock.borrow_mut(), semaphore, current, None);
    }
}

pub(super) fn try_wait<Traits: KernelTraits>(semaphore: SemaphoreId) -> bool {
    let mut lock = klock::lock_preempt::<Traits>();
    let acquired = try_wait_inner::<Traits>(lock.borrow_mut(), semaphore);
    acquired
}

pub(super) fn wait_timeout<Traits: KernelTraits>(
    semaphore: SemaphoreId,
    timeout: TicksRelative,
) -> bool {
    timer::expect_valid_timeout::<Traits>(timeout);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    let deadline = timer::deadline::<Traits>(lock.borrow_mut(), timeout);
    loop {
        if try_wait_inner::<Traits>(lock.borrow_mut(), semaphore) {
            return true;
        }
        let Some(remaining) = timer::remaining_until::<Traits>(lock.borrow_mut(), deadline) else {
            return false;
        };
        wait_for_post::<Traits>(lock.borrow_mut(), semaphore, current, Some(remaining));
    }
}

pub(super) fn post<Traits: KernelTraits>(semaphore: SemaphoreId) {
    let mut lock = klock::lock_preempt::<Traits>();
    let semaphore_cb = semaphore.cb::<Traits>();
    let value = semaphore_cb.value.get(&*lock);

    let new_value = match (value.checked_add(1), semaphore_cb.max.get(&*lock)) {
        (Some(new_value), Some(max)) if new_value <= max => new_value,
        (Some(new_value), None) => new_value,
        _ => fatal::<Traits>(FatalError::SemaphoreMaxExceeded),
    };
    semaphore_cb.value.replace(&mut *lock, new_value);

    // Only a semaphore at zero can have waiters
    if value == 0 {
        task::wake_waiters::<Traits>(lock.borrow_mut(), WaitObject::Semaphore(semaphore));
    }
}

pub(super) fn max_init<Traits: KernelTraits>(semaphore: SemaphoreId, max: SemaphoreValue) {
    let mut lock = klock::lock_preempt::<Traits>();
    let semaphore_cb = semaphore.cb::<Traits>();

    if semaphore_cb.max.get(&*lock).is_some() {
        fatal::<Traits>(FatalError::SemaphoreMaxAlreadyInit);
    }
    if max == 0 || semaphore_cb.value.get(&*lock) > max {
        fatal::<Traits>(FatalError::SemaphoreMaxInvalid);
    }

    semaphore_cb.max.replace(&mut *lock, Some(max));
}

pub(super) fn value<Traits: KernelTraits>(semaphore: SemaphoreId) -> SemaphoreValue {
    let lock = klock::lock_preempt::<Traits>();
    let value = semaphore.cb::<Traits>().value.get(&*lock);
    value
}
