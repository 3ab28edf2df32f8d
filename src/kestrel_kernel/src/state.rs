//! The global state of a kernel instance and the preemption controller
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::{
    error::{fatal, FatalError},
    klock::{self, KernelCell, KernelTokenRefMut},
    task,
    timer::TicksAbsolute,
    utils::Init,
    KernelCfg, KernelTraits, TaskId,
};

/// Global kernel state.
pub struct State<Traits: KernelCfg> {
    /// `true` while preemption is disabled. Starts `true` and becomes `false`
    /// when the first task enables preemption.
    pub(super) preempt_disabled: AtomicBool,

    /// `true` if a task switch became due while preemption was disabled.
    pub(super) preempt_pending: AtomicBool,

    /// The interrupt events raised but not applied yet, one bit per event.
    /// Updated only while CPU Lock is active.
    pub(super) pending_events: AtomicU32,

    /// The number of timer ticks not accounted yet. Updated only while CPU
    /// Lock is active.
    pub(super) pending_ticks: AtomicU32,

    /// The task that owns the processor. `None` until boot completes.
    pub(super) running_task: KernelCell<Traits, Option<TaskId>>,

    /// The tick counter.
    pub(super) current_ticks: KernelCell<Traits, TicksAbsolute>,

    /// The scheduler's global data.
    pub(super) sched: Traits::Sched,
}

impl<Traits: KernelCfg> Init for State<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        preempt_disabled: AtomicBool::new(true),
        preempt_pending: AtomicBool::new(false),
        pending_events: AtomicU32::new(0),
        pending_ticks: AtomicU32::new(0),
        running_task: Init::INIT,
        current_ticks: Init::INIT,
        sched: Init::INIT,
    };
}

impl<Traits: KernelTraits> State<Traits> {
    /// Get the currently running task.
    #[inline]
    pub(super) fn running_task(&self, lock: &KernelTokenRefMut<'_, Traits>) -> TaskId {
        match self.running_task.get(&**lock) {
            Some(task) => task,
            None => fatal::<Traits>(FatalError::BadContext),
        }
    }
}

/// If the current context is not a task context, raise `BadContext`.
pub(super) fn expect_task_context<Traits: KernelTraits>() {
    if !Traits::is_task_context() {
        fatal::<Traits>(FatalError::BadContext);
    }
}

/// Request a task switch. It happens when preemption is enabled next time,
/// or at the end of the current interrupt handler if it's enabled now.
#[inline]
pub(super) fn preempt_pend<Traits: KernelTraits>() {
    Traits::state()
        .preempt_pending
        .store(true, Ordering::Relaxed);
}

/// Enable preemption. If a task switch became due while it was disabled, run
/// the scheduler first.
///
/// # Safety
///
/// Preemption must be disabled, and `lock` must be the token representing
/// that, which will be invalid after this call.
pub(super) unsafe fn preempt_enable<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let state = Traits::state();
    loop {
        state.preempt_disabled.store(false, Ordering::Relaxed);

        // An interrupt arriving after this point sees preemption enabled and
        // services the request by itself
        if !state.preempt_pending.load(Ordering::Relaxed) {
            return;
        }

        state.preempt_disabled.store(true, Ordering::Relaxed);
        state.preempt_pending.store(false, Ordering::Relaxed);

        task::yield_inner::<Traits>(lock.borrow_mut());
    }
}

/// Implements `PortToKernel::interrupt_return`.
pub(super) fn service_pending_preemption<Traits: KernelTraits>() {
    let state = Traits::state();
    if !state.preempt_disabled.load(Ordering::Relaxed)
        && state.preempt_pending.load(Ordering::Relaxed)
    {
        // Dropping the guard runs the scheduler
        drop(klock::lock_preempt::<Traits>());
    }
}
