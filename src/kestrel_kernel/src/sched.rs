//! Scheduling algorithms.
//!
//! A kernel instance chooses one of the following types as
//! [`KernelCfg::Sched`](crate::KernelCfg::Sched). The choice also decides the
//! mutex protocol.
//!
//!  - [`StrictPriority`] runs the runnable task with the lowest id. Mutexes
//!    don't affect scheduling.
//!
//!  - [`PriorityCeiling`] projects tasks and mutexes into one array of slots
//!    sorted by priority. A locked mutex's slot stands in for its holder, so
//!    the holder runs at the mutex's ceiling.
//!
//!  - [`PriorityInheritance`] runs the runnable task with the highest
//!    *effective* priority, which is raised by the tasks blocked on the
//!    mutexes it holds, transitively.
use crate::{klock::KernelTokenRefMut, utils::Init, KernelTraits, MutexId, TaskId};

mod ceiling;
mod inherit;
mod strict;

pub use self::{
    ceiling::{CeilingPerMutexData, CeilingPerTaskData, PriorityCeiling, SchedSlot},
    inherit::{InheritancePerTaskData, PriorityInheritance},
    strict::{StrictPerTaskData, StrictPriority},
};

/// The context type for [`Scheduler`].
pub struct Ctx<'a, Traits: KernelTraits> {
    pub(super) lock: KernelTokenRefMut<'a, Traits>,
}

impl<'a, Traits: KernelTraits> From<KernelTokenRefMut<'a, Traits>> for Ctx<'a, Traits> {
    #[inline]
    fn from(lock: KernelTokenRefMut<'a, Traits>) -> Self {
        Self { lock }
    }
}

/// A scheduling algorithm. It tracks which tasks are runnable and picks the
/// next task to run.
///
/// This trait is not intended to be implemented on custom types.
pub trait Scheduler<Traits>: Init + Send + Sync + 'static + private::Sealed {
    type PerTaskData: Init + Send + Sync + 'static;
    type PerMutexData: Init + Send + Sync + 'static;

    /// Prepare the scheduler's data structures. Called once at boot, before
    /// any task is made runnable and before any mutex is locked.
    fn init(&self, ctx: Ctx<'_, Traits>)
    where
        Traits: KernelTraits;

    fn set_runnable(&self, ctx: Ctx<'_, Traits>, task: TaskId)
    where
        Traits: KernelTraits;

    fn set_blocked(&self, ctx: Ctx<'_, Traits>, task: TaskId)
    where
        Traits: KernelTraits;

    fn is_runnable(&self, ctx: Ctx<'_, Traits>, task: TaskId) -> bool
    where
        Traits: KernelTraits;

    /// Choose the task to run. Returns `None` if no task is runnable.
    fn get_next(&self, ctx: Ctx<'_, Traits>) -> Option<TaskId>
    where
        Traits: KernelTraits;

    /// Check the mutex protocol's precondition for `task` locking `mutex`.
    /// A violation is a fatal error.
    fn check_lock(&self, _ctx: Ctx<'_, Traits>, _mutex: MutexId, _task: TaskId)
    where
        Traits: KernelTraits,
    {
    }

    /// Called after `task` acquired `mutex`.
    fn mutex_locked(&self, _ctx: Ctx<'_, Traits>, _mutex: MutexId, _task: TaskId)
    where
        Traits: KernelTraits,
    {
    }

    /// Called after `mutex` was released.
    fn mutex_unlocked(&self, _ctx: Ctx<'_, Traits>, _mutex: MutexId)
    where
        Traits: KernelTraits,
    {
    }

    /// Called after a task started or stopped waiting for a mutex.
    fn mutex_waiters_changed(&self, _ctx: Ctx<'_, Traits>)
    where
        Traits: KernelTraits,
    {
    }

    /// Get the priority `task` is scheduled at. A lower value means a higher
    /// priority.
    fn effective_priority(&self, _ctx: Ctx<'_, Traits>, task: TaskId) -> usize
    where
        Traits: KernelTraits,
    {
        task.index()
    }
}

/// Implements [the sealed trait pattern], which prevents [`Scheduler`]
/// against downstream implementations.
///
/// [the sealed trait pattern]: https://rust-lang.github.io/api-guidelines/future-proofing.html
mod private {
    pub trait Sealed {}
}
