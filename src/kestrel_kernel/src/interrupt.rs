//! Interrupt events and the dispatcher
//!
//! Interrupt handlers never touch kernel cells. [`raise`] and
//! `PortToKernel::timer_tick` record their work in [`State::pending_events`]
//! and [`State::pending_ticks`] while CPU Lock is active, and request a task
//! switch. [`get_next_task`] applies the recorded work in task context before
//! consulting the scheduler.
//!
//! [`State::pending_events`]: crate::State
//! [`State::pending_ticks`]: crate::State
use core::sync::atomic::Ordering;

use crate::{
    error::{fatal, FatalError},
    klock::KernelTokenRefMut,
    sched::Scheduler,
    signal::{self, SignalSet},
    state, task, timer, KernelTraits, TaskId,
};

#[cfg(feature = "validate")]
use crate::validate;

/// The maximum number of interrupt events in a kernel instance. Pending
/// events are tracked as a bit mask.
pub const MAX_INTERRUPT_EVENTS: usize = u32::BITS as usize;

/// Identifies an interrupt event.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InterruptEventId(usize);

impl InterruptEventId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

/// What the dispatcher does when it finds an interrupt event pending.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptEventAction {
    /// Make the task runnable.
    Unblock(TaskId),
    /// Send the signals to the task.
    Signal(TaskId, SignalSet),
}

/// The static properties of an interrupt event.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct InterruptEventAttr {
    pub action: InterruptEventAction,
}

impl InterruptEventAttr {
    pub const fn unblock(task: TaskId) -> Self {
        Self {
            action: InterruptEventAction::Unblock(task),
        }
    }

    pub const fn signal(task: TaskId, set: SignalSet) -> Self {
        Self {
            action: InterruptEventAction::Signal(task, set),
        }
    }
}

impl InterruptEventAction {
    fn task(self) -> TaskId {
        match self {
            Self::Unblock(task) | Self::Signal(task, _) => task,
        }
    }
}

/// Validate the interrupt event table. Called at boot.
pub(super) fn init<Traits: KernelTraits>(_lock: KernelTokenRefMut<'_, Traits>) {
    let events = Traits::interrupt_event_attr_pool();
    let num_tasks = Traits::task_cb_pool().len();

    if events.len() > MAX_INTERRUPT_EVENTS {
        fatal::<Traits>(FatalError::InvalidConfig);
    }

    if events
        .iter()
        .any(|attr| attr.action.task().index() >= num_tasks)
    {
        fatal::<Traits>(FatalError::InvalidConfig);
    }
}

/// Run `f` with CPU Lock active.
#[inline]
pub(super) fn with_cpu_lock<Traits: KernelTraits, R>(f: impl FnOnce() -> R) -> R {
    // Safety: CPU Lock is inactive outside this function, and we leave it in
    // the same state
    unsafe { Traits::enter_cpu_lock() };
    let result = f();
    unsafe { Traits::leave_cpu_lock() };
    result
}

/// Implements `System::interrupt_event_raise`.
pub(super) fn raise<Traits: KernelTraits>(event: InterruptEventId) {
    if event.index() >= Traits::interrupt_event_attr_pool().len() {
        fatal::<Traits>(FatalError::BadId);
    }

    let pending = &Traits::state().pending_events;
    with_cpu_lock::<Traits, _>(|| {
        let bits = pending.load(Ordering::Relaxed);
        pending.store(bits | (1 << event.index()), Ordering::Relaxed);
    });

    state::preempt_pend::<Traits>();

    // An interrupt handler gets the switch from `interrupt_return`
    if !Traits::is_interrupt_context() {
        state::service_pending_preemption::<Traits>();
    }
}

/// Take the pending interrupt events and timer ticks.
fn take_pending<Traits: KernelTraits>() -> (u32, u32) {
    let state = Traits::state();
    with_cpu_lock::<Traits, _>(|| {
        let events = state.pending_events.load(Ordering::Relaxed);
        let ticks = state.pending_ticks.load(Ordering::Relaxed);
        state.pending_events.store(0, Ordering::Relaxed);
        state.pending_ticks.store(0, Ordering::Relaxed);
        (events, ticks)
    })
}

fn has_pending<Traits: KernelTraits>() -> bool {
    let state = Traits::state();
    state.pending_events.load(Ordering::Relaxed) != 0
        || state.pending_ticks.load(Ordering::Relaxed) != 0
}

/// Apply the events in the bit mask `events`, lowest bit first.
fn apply_events<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>, mut events: u32) {
    let attrs = Traits::interrupt_event_attr_pool();
    while events != 0 {
        let event_i = events.trailing_zeros() as usize;
        events &= events - 1;

        match attrs[event_i].action {
            InterruptEventAction::Unblock(task) => {
                task::make_runnable::<Traits>(lock.borrow_mut(), task);
            }
            InterruptEventAction::Signal(task, set) => {
                signal::send_inner::<Traits>(lock.borrow_mut(), task, set);
            }
        }
    }
}

/// The dispatcher. Apply the pending interrupt events and timer ticks, then
/// ask the scheduler for the next task to run. If no task is runnable, wait
/// for an interrupt and try again.
pub(super) fn get_next_task<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) -> TaskId {
    let state = Traits::state();
    loop {
        let (events, ticks) = take_pending::<Traits>();

        apply_events::<Traits>(lock.borrow_mut(), events);

        match ticks {
            0 => {}
            1 => timer::process_tick::<Traits>(lock.borrow_mut()),
            // The dispatcher fell more than a tick behind
            _ => fatal::<Traits>(FatalError::TickOverflow),
        }

        #[cfg(feature = "validate")]
        validate::check::<Traits>(lock.borrow_mut());

        if let Some(task) = state.sched.get_next(lock.borrow_mut().into()) {
            return task;
        }

        // Idle. Check for new work and sleep with CPU Lock active so that
        // an interrupt can't slip in between.
        // Safety: CPU Lock is inactive here
        unsafe {
            Traits::enter_cpu_lock();
            if !has_pending::<Traits>() {
                Traits::wait_for_interrupt();
            }
            Traits::leave_cpu_lock();
        }
    }
}
