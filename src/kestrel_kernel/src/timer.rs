//! Timers
//!
//! The tick counter advances by one per `PortToKernel::timer_tick`. Each
//! tick, every enabled timer whose expiry equals the new counter value fires.
//!
//! The timer pool holds the user timers, followed by one *task timer* per
//! task. A task timer is armed only while its task sleeps or waits with a
//! timeout, and ends the wait when it fires. It doesn't touch the task's
//! signals.
use core::{fmt, sync::atomic::Ordering};

use crate::{
    error::{fatal, FatalError},
    interrupt,
    klock::{self, KernelCell, KernelTokenRefMut},
    signal::{self, SignalSet},
    state, task, KernelCfg, KernelTraits, TaskId,
};

/// A point in time, in ticks. Wraps around.
pub type TicksAbsolute = u32;

/// A duration, in ticks.
pub type TicksRelative = u32;

/// The longest timeout accepted by the `*_timeout` operations and `sleep`.
/// Deadlines are compared by wrapping difference, so a timeout must fit in
/// half the tick counter's range.
pub const MAX_TIMEOUT: TicksRelative = i32::MAX as TicksRelative;

/// Identifies a user timer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TimerId(usize);

impl TimerId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Get the control block of the user timer, raising `BadId` if the id is
    /// out of range. Task timers are not reachable through `TimerId`.
    fn cb<Traits: KernelTraits>(self) -> &'static TimerCb<Traits> {
        if self.0 >= num_user_timers::<Traits>() {
            fatal::<Traits>(FatalError::BadId);
        }
        &Traits::timer_cb_pool()[self.0]
    }
}

fn num_user_timers<Traits: KernelTraits>() -> usize {
    Traits::timer_cb_pool()
        .len()
        .saturating_sub(Traits::task_cb_pool().len())
}

fn task_timer_cb<Traits: KernelTraits>(task: TaskId) -> &'static TimerCb<Traits> {
    match Traits::timer_cb_pool().get(num_user_timers::<Traits>() + task.index()) {
        Some(timer_cb) => timer_cb,
        None => fatal::<Traits>(FatalError::BadId),
    }
}

/// What a timer does when it fires.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TimerAction {
    None,
    /// Send the signals to the task.
    Signal(TaskId, SignalSet),
    /// Call the fatal error entry point. This makes the timer a watchdog.
    Error(FatalError),
}

/// The static properties of a timer.
#[derive(Clone, Copy, Debug)]
pub struct TimerAttr {
    /// The period. Zero makes a one-shot timer.
    pub reload: TicksRelative,

    /// Start the timer at boot.
    pub enabled: bool,

    pub action: TimerAction,
}

impl TimerAttr {
    pub const fn new() -> Self {
        Self {
            reload: 0,
            enabled: false,
            action: TimerAction::None,
        }
    }

    pub const fn reload(self, reload: TicksRelative) -> Self {
        Self { reload, ..self }
    }

    pub const fn enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub const fn signal(self, task: TaskId, set: SignalSet) -> Self {
        Self {
            action: TimerAction::Signal(task, set),
            ..self
        }
    }

    pub const fn error(self, error: FatalError) -> Self {
        Self {
            action: TimerAction::Error(error),
            ..self
        }
    }
}

/// [`TimerAction`] plus the action of task timers, which isn't available to
/// user timers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(super) enum Action {
    User(TimerAction),
    /// End the sleep or the timed wait of the task.
    Timeout(TaskId),
}

impl Default for TimerAttr {
    fn default() -> Self {
        Self::new()
    }
}

/// *Timer control block* - the state data of a timer.
pub struct TimerCb<Traits: KernelCfg> {
    pub attr: TimerAttr,

    pub(super) enabled: KernelCell<Traits, bool>,

    /// The tick count at which the timer fires next.
    pub(super) expiry: KernelCell<Traits, TicksAbsolute>,

    pub(super) reload: KernelCell<Traits, TicksRelative>,

    /// Set if the timer fired while its signal was still pending.
    pub(super) overflow: KernelCell<Traits, bool>,

    pub(super) action: KernelCell<Traits, Action>,
}

impl<Traits: KernelCfg> TimerCb<Traits> {
    pub const fn new(attr: TimerAttr) -> Self {
        Self::with_action(attr, Action::User(attr.action))
    }

    /// Construct the task timer of `task`.
    pub const fn task_timer(task: TaskId) -> Self {
        Self::with_action(TimerAttr::new(), Action::Timeout(task))
    }

    const fn with_action(attr: TimerAttr, action: Action) -> Self {
        Self {
            attr,
            enabled: KernelCell::new(false),
            expiry: KernelCell::new(0),
            reload: KernelCell::new(attr.reload),
            overflow: KernelCell::new(false),
            action: KernelCell::new(action),
        }
    }
}

impl<Traits: KernelCfg> fmt::Debug for TimerCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCb")
            .field("self", &(self as *const _))
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

/// Validate the timer table and start the timers configured as enabled.
/// Called at boot.
pub(super) fn init<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let timers = Traits::timer_cb_pool();
    let num_tasks = Traits::task_cb_pool().len();

    if timers.len() < num_tasks {
        fatal::<Traits>(FatalError::InvalidConfig);
    }

    for timer_cb in &timers[..timers.len() - num_tasks] {
        if let TimerAction::Signal(task, _) = timer_cb.attr.action {
            if task.index() >= num_tasks {
                fatal::<Traits>(FatalError::InvalidConfig);
            }
        }

        if timer_cb.attr.enabled {
            start(lock.borrow_mut(), timer_cb);
        }
    }
}

/// Implements `PortToKernel::timer_tick`.
pub(super) fn handle_tick_interrupt<Traits: KernelTraits>() {
    let pending = &Traits::state().pending_ticks;
    interrupt::with_cpu_lock::<Traits, _>(|| {
        let ticks = pending.load(Ordering::Relaxed);
        pending.store(ticks.saturating_add(1), Ordering::Relaxed);
    });
    state::preempt_pend::<Traits>();
}

/// Advance the tick counter by one and fire the expired timers. Called by
/// the dispatcher.
pub(super) fn process_tick<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let now = Traits::state()
        .current_ticks
        .replace_with(&mut *lock, |ticks| ticks.wrapping_add(1))
        .wrapping_add(1);

    for timer_cb in Traits::timer_cb_pool() {
        if !timer_cb.enabled.get(&*lock) || timer_cb.expiry.get(&*lock) != now {
            continue;
        }

        match timer_cb.reload.get(&*lock) {
            0 => {
                timer_cb.enabled.replace(&mut *lock, false);
            }
            reload => {
                timer_cb.expiry.replace(&mut *lock, now.wrapping_add(reload));
            }
        }

        match timer_cb.action.get(&*lock) {
            Action::User(TimerAction::None) => {}
            Action::User(TimerAction::Signal(task, set)) => {
                if signal::is_pending::<Traits>(lock.borrow_mut(), task, set) {
                    timer_cb.overflow.replace(&mut *lock, true);
                }
                signal::send_inner::<Traits>(lock.borrow_mut(), task, set);
            }
            Action::User(TimerAction::Error(error)) => fatal::<Traits>(error),
            Action::Timeout(task) => task::time_out::<Traits>(lock.borrow_mut(), task),
        }
    }
}

/// Raise `InvalidTimeout` if `timeout` is longer than [`MAX_TIMEOUT`].
pub(super) fn expect_valid_timeout<Traits: KernelTraits>(timeout: TicksRelative) {
    if timeout > MAX_TIMEOUT {
        fatal::<Traits>(FatalError::InvalidTimeout);
    }
}

fn now<Traits: KernelTraits>(lock: &KernelTokenRefMut<'_, Traits>) -> TicksAbsolute {
    Traits::state().current_ticks.get(&**lock)
}

/// Convert a timeout to an absolute deadline.
pub(super) fn deadline<Traits: KernelTraits>(
    lock: KernelTokenRefMut<'_, Traits>,
    timeout: TicksRelative,
) -> TicksAbsolute {
    now::<Traits>(&lock).wrapping_add(timeout)
}

/// Get the number of ticks left until `deadline`, or `None` if it has
/// passed.
pub(super) fn remaining_until<Traits: KernelTraits>(
    lock: KernelTokenRefMut<'_, Traits>,
    deadline: TicksAbsolute,
) -> Option<TicksRelative> {
    ticks_until(now::<Traits>(&lock), deadline)
}

fn ticks_until(now: TicksAbsolute, deadline: TicksAbsolute) -> Option<TicksRelative> {
    let remaining = deadline.wrapping_sub(now) as i32;
    (remaining > 0).then_some(remaining as TicksRelative)
}

/// Make the task timer of `task` fire once, `ticks` ticks from now.
pub(super) fn arm_task_timer<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
    ticks: TicksRelative,
) {
    let timer_cb = task_timer_cb::<Traits>(task);
    let expiry = now::<Traits>(&lock).wrapping_add(ticks);
    task.cb::<Traits>().timed_out.replace(&mut *lock, false);
    timer_cb.reload.replace(&mut *lock, 0);
    timer_cb.expiry.replace(&mut *lock, expiry);
    timer_cb.enabled.replace(&mut *lock, true);
}

pub(super) fn disarm_task_timer<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    task: TaskId,
) {
    task_timer_cb::<Traits>(task)
        .enabled
        .replace(&mut *lock, false);
}

/// Start `timer_cb` with its reload value as the first period, or disable
/// it if the reload value is zero.
fn start<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>, timer_cb: &TimerCb<Traits>) {
    match timer_cb.reload.get(&*lock) {
        0 => {
            timer_cb.enabled.replace(&mut *lock, false);
        }
        reload => {
            let expiry = now::<Traits>(&lock).wrapping_add(reload);
            timer_cb.expiry.replace(&mut *lock, expiry);
            timer_cb.enabled.replace(&mut *lock, true);
        }
    }
}

pub(super) fn current_ticks<Traits: KernelTraits>() -> TicksAbsolute {
    let mut lock = klock::lock_preempt::<Traits>();
    let ticks = now::<Traits>(&lock.borrow_mut());
    ticks
}

pub(super) fn enable<Traits: KernelTraits>(timer: TimerId) {
    let mut lock = klock::lock_preempt::<Traits>();
    start(lock.borrow_mut(), timer.cb::<Traits>());
}

pub(super) fn disable<Traits: KernelTraits>(timer: TimerId) {
    let mut lock = klock::lock_preempt::<Traits>();
    timer.cb::<Traits>().enabled.replace(&mut *lock, false);
}

pub(super) fn oneshot<Traits: KernelTraits>(timer: TimerId, timeout: TicksRelative) {
    expect_valid_timeout::<Traits>(timeout);
    let mut lock = klock::lock_preempt::<Traits>();
    let timer_cb = timer.cb::<Traits>();

    // A zero timeout fires on the next tick
    let expiry = now::<Traits>(&lock.borrow_mut()).wrapping_add(timeout.max(1));
    timer_cb.reload.replace(&mut *lock, 0);
    timer_cb.expiry.replace(&mut *lock, expiry);
    timer_cb.enabled.replace(&mut *lock, true);
}

pub(super) fn check_overflow<Traits: KernelTraits>(timer: TimerId) -> bool {
    let mut lock = klock::lock_preempt::<Traits>();
    let overflow = timer.cb::<Traits>().overflow.replace(&mut *lock, false);
    overflow
}

pub(super) fn remaining<Traits: KernelTraits>(timer: TimerId) -> TicksRelative {
    let mut lock = klock::lock_preempt::<Traits>();
    let timer_cb = timer.cb::<Traits>();
    if !timer_cb.enabled.get(&*lock) {
        return 0;
    }
    let remaining = timer_cb
        .expiry
        .get(&*lock)
        .wrapping_sub(now::<Traits>(&lock.borrow_mut()));
    remaining
}

/// Set the period used after the next expiry and by `enable`.
pub(super) fn reload_set<Traits: KernelTraits>(timer: TimerId, reload: TicksRelative) {
    let mut lock = klock::lock_preempt::<Traits>();
    timer.cb::<Traits>().reload.replace(&mut *lock, reload);
}

pub(super) fn signal_set<Traits: KernelTraits>(timer: TimerId, task: TaskId, set: SignalSet) {
    let mut lock = klock::lock_preempt::<Traits>();
    task.cb::<Traits>();
    timer
        .cb::<Traits>()
        .action
        .replace(&mut *lock, Action::User(TimerAction::Signal(task, set)));
}

pub(super) fn error_set<Traits: KernelTraits>(timer: TimerId, error: FatalError) {
    let mut lock = klock::lock_preempt::<Traits>();
    timer
        .cb::<Traits>()
        .action
        .replace(&mut *lock, Action::User(TimerAction::Error(error)));
}
