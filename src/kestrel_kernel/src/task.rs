//! Tasks
use core::fmt;

use crate::{
    error::{fatal, FatalError},
    interrupt, klock,
    klock::{KernelCell, KernelTokenRefMut},
    message_queue::MessageQueueId,
    mutex::MutexId,
    sched::Scheduler,
    semaphore::SemaphoreId,
    signal::SignalSet,
    timer::{self, TicksRelative},
    utils::Init,
    KernelCfg, KernelTraits,
};

#[cfg(feature = "validate")]
use crate::validate;

/// Identifies a task. Tasks are numbered from zero in declaration order, and
/// a lower number means a higher priority.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TaskId(usize);

impl TaskId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Get the control block of the task, raising `BadId` if the id is out
    /// of range.
    pub(crate) fn cb<Traits: KernelTraits>(self) -> &'static TaskCb<Traits> {
        match Traits::task_cb_pool().get(self.0) {
            Some(task_cb) => task_cb,
            None => fatal::<Traits>(FatalError::BadId),
        }
    }
}

/// The static properties of a task.
#[derive(Clone, Copy)]
pub struct TaskAttr {
    /// The entry point of the task. It must not return.
    pub entry: fn(),

    /// The size of the task's stack, in bytes.
    pub stack_size: usize,

    /// Start the task at boot. If `false`, the task stays blocked until
    /// `task_start` is called.
    pub autostart: bool,
}

impl TaskAttr {
    pub const DEFAULT_STACK_SIZE: usize = 4096;

    pub const fn new(entry: fn()) -> Self {
        Self {
            entry,
            stack_size: Self::DEFAULT_STACK_SIZE,
            autostart: true,
        }
    }

    pub const fn stack_size(self, stack_size: usize) -> Self {
        Self { stack_size, ..self }
    }

    pub const fn autostart(self, autostart: bool) -> Self {
        Self { autostart, ..self }
    }
}

impl fmt::Debug for TaskAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskAttr")
            .field("entry", &(self.entry as *const ()))
            .field("stack_size", &self.stack_size)
            .field("autostart", &self.autostart)
            .finish()
    }
}

/// The object a blocked task is waiting for. A task waits for at most one
/// object at a time.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum WaitObject {
    Mutex(MutexId),
    Semaphore(SemaphoreId),
    MessageQueue(MessageQueueId),
}

/// *Task control block* - the state data of a task.
pub struct TaskCb<Traits: KernelCfg> {
    /// The saved execution context of the task, owned by the port.
    pub port_task_state: Traits::PortTaskState,

    /// The static properties of the task.
    pub attr: TaskAttr,

    /// The pending signals.
    pub(super) signals: KernelCell<Traits, SignalSet>,

    /// The object the task is waiting for.
    pub(super) wait: KernelCell<Traits, Option<WaitObject>>,

    /// Set when the task timer fires. Cleared when the task timer is armed.
    pub(super) timed_out: KernelCell<Traits, bool>,

    /// Scheduler-specific data.
    pub(super) sched_data: <Traits::Sched as Scheduler<Traits>>::PerTaskData,
}

impl<Traits: KernelCfg> TaskCb<Traits> {
    pub const fn new(attr: TaskAttr) -> Self {
        Self {
            port_task_state: Traits::PORT_TASK_STATE_INIT,
            attr,
            signals: Init::INIT,
            wait: Init::INIT,
            timed_out: Init::INIT,
            sched_data: Init::INIT,
        }
    }
}

impl<Traits: KernelCfg> fmt::Debug for TaskCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskCb")
            .field("self", &(self as *const _))
            .field("port_task_state", &self.port_task_state)
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

/// Implements `PortToKernel::boot`.
///
/// # Safety
///
/// Called once by the port from its boot context.
pub(super) unsafe fn boot<Traits: KernelTraits>() -> ! {
    // Preemption is disabled until the first task enables it.
    // Safety: Nothing else holds a `PreemptGuard` during boot
    let mut lock = unsafe { klock::assume_preempt_lock::<Traits>() };
    let state = Traits::state();

    interrupt::init::<Traits>(lock.borrow_mut());
    crate::semaphore::init::<Traits>(lock.borrow_mut());
    crate::message_queue::init::<Traits>(lock.borrow_mut());
    state.sched.init(lock.borrow_mut().into());

    for (task_i, task_cb) in Traits::task_cb_pool().iter().enumerate() {
        // Safety: The task has never run
        unsafe {
            Traits::initialize_task_state(
                &task_cb.port_task_state,
                task_entry::<Traits>,
                &task_cb.attr,
            )
        };

        if task_cb.attr.autostart {
            state
                .sched
                .set_runnable(lock.borrow_mut().into(), TaskId::new(task_i));
        }
    }

    timer::init::<Traits>(lock.borrow_mut());

    let first = interrupt::get_next_task::<Traits>(lock.borrow_mut());
    state.running_task.replace(&mut *lock, Some(first));

    // Preemption stays disabled across the dispatch. `task_entry` takes over
    // the guard.
    core::mem::forget(lock);

    // Safety: Preemption is disabled, and this is the boot context
    unsafe { Traits::dispatch_first_task(&first.cb::<Traits>().port_task_state) }
}

/// The entry point the port starts every task with.
fn task_entry<Traits: KernelTraits>() -> ! {
    // Safety: The dispatcher left preemption disabled for this task
    let mut lock = unsafe { klock::assume_preempt_lock::<Traits>() };
    let task = Traits::state().running_task(&lock.borrow_mut());
    let entry = task.cb::<Traits>().attr.entry;

    // Enable preemption
    drop(lock);

    entry();

    fatal::<Traits>(FatalError::TaskReturned)
}

/// Get the currently running task.
#[inline]
pub(super) fn current_in<Traits: KernelTraits>(lock: &KernelTokenRefMut<'_, Traits>) -> TaskId {
    Traits::state().running_task(lock)
}

pub(super) fn current<Traits: KernelTraits>() -> TaskId {
    let mut lock = klock::lock_preempt::<Traits>();
    let task = current_in::<Traits>(&lock.borrow_mut());
    task
}

/// Run the dispatcher and switch to the task it chooses.
pub(super) fn yield_inner<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let current = current_in::<Traits>(&lock);
    let next = interrupt::get_next_task::<Traits>(lock.borrow_mut());
    switch_to::<Traits>(lock, current, next);
}

/// Transfer the processor from `current` to `next`. Returns when `current`
/// is dispatched again.
fn switch_to<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    current: TaskId,
    next: TaskId,
) {
    if next == current {
        return;
    }

    Traits::state().running_task.replace(&mut *lock, Some(next));

    #[cfg(feature = "validate")]
    validate::check::<Traits>(lock.borrow_mut());

    // Safety: Preemption is disabled, and we are the running task
    unsafe {
        Traits::switch_context(
            &current.cb::<Traits>().port_task_state,
            &next.cb::<Traits>().port_task_state,
        )
    };
}

pub(super) fn yield_now<Traits: KernelTraits>() {
    let mut lock = klock::lock_preempt::<Traits>();
    yield_inner::<Traits>(lock.borrow_mut());
}

pub(super) fn yield_to<Traits: KernelTraits>(task: TaskId) {
    let mut lock = klock::lock_preempt::<Traits>();
    task.cb::<Traits>();

    if Traits::state().sched.is_runnable(lock.borrow_mut().into(), task) {
        let current = current_in::<Traits>(&lock.borrow_mut());
        switch_to::<Traits>(lock.borrow_mut(), current, task);
    } else {
        yield_inner::<Traits>(lock.borrow_mut());
    }
}

/// Mark the current task blocked and switch away. Returns when some other
/// party makes it runnable again.
pub(super) fn block_current<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let current = current_in::<Traits>(&lock);
    Traits::state()
        .sched
        .set_blocked(lock.borrow_mut().into(), current);
    yield_inner::<Traits>(lock);
}

/// Like [`block_current`], but gives up after `timeout` ticks. The task timer
/// is armed only for the duration of the wait.
pub(super) fn block_current_timeout<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    timeout: TicksRelative,
) {
    let current = current_in::<Traits>(&lock);

    timer::arm_task_timer::<Traits>(lock.borrow_mut(), current, timeout);
    block_current::<Traits>(lock.borrow_mut());
    timer::disarm_task_timer::<Traits>(lock, current);
}

/// Handle the expiry of the task timer of `task`. Called by the dispatcher.
pub(super) fn time_out<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
) {
    task.cb::<Traits>().timed_out.replace(&mut *lock, true);
    make_runnable::<Traits>(lock, task);
}

/// Make `task` runnable. The caller is responsible for requesting a task
/// switch if it's outside the dispatcher.
pub(super) fn make_runnable<Traits: KernelTraits>(
    lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
) {
    Traits::state().sched.set_runnable(lock.into(), task);
}

/// Record what `task` is waiting for.
pub(super) fn set_wait<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    wait: Option<WaitObject>,
) {
    task.cb::<Traits>().wait.replace(&mut *lock, wait);
}

/// Make every task waiting for `object` runnable and forget its waiting
/// record. Returns `true` if any task was woken.
pub(super) fn wake_waiters<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    object: WaitObject,
) -> bool {
    let mut woken = false;
    for (task_i, task_cb) in Traits::task_cb_pool().iter().enumerate() {
        if task_cb.wait.get(&*lock) == Some(object) {
            task_cb.wait.replace(&mut *lock, None);
            make_runnable::<Traits>(lock.borrow_mut(), TaskId::new(task_i));
            woken = true;
        }
    }
    if woken {
        crate::state::preempt_pend::<Traits>();
    }
    woken
}

pub(super) fn block<Traits: KernelTraits>() {
    let mut lock = klock::lock_preempt::<Traits>();
    block_current::<Traits>(lock.borrow_mut());
}

pub(super) fn unblock<Traits: KernelTraits>(task: TaskId) {
    let mut lock = klock::lock_preempt::<Traits>();
    task.cb::<Traits>();
    make_runnable::<Traits>(lock.borrow_mut(), task);
    crate::state::preempt_pend::<Traits>();
}

pub(super) fn sleep<Traits: KernelTraits>(ticks: TicksRelative) {
    timer::expect_valid_timeout::<Traits>(ticks);
    let mut lock = klock::lock_preempt::<Traits>();

    if ticks == 0 {
        yield_inner::<Traits>(lock.borrow_mut());
        return;
    }

    let current = current_in::<Traits>(&lock.borrow_mut());
    timer::arm_task_timer::<Traits>(lock.borrow_mut(), current, ticks);

    // The task timer disables itself when it fires. Other wakeups don't end
    // the sleep.
    let timed_out = &current.cb::<Traits>().timed_out;
    while !timed_out.get(&*lock) {
        block_current::<Traits>(lock.borrow_mut());
    }
}

pub(super) fn effective_priority<Traits: KernelTraits>(task: TaskId) -> usize {
    let mut lock = klock::lock_preempt::<Traits>();
    task.cb::<Traits>();
    Traits::state()
        .sched
        .effective_priority(lock.borrow_mut().into(), task)
}
