//! A statically configured real-time kernel core.
//!
//! The kernel manages a fixed set of tasks, scheduled by strict priority
//! (lower [`TaskId`] means higher priority), and a fixed set of
//! synchronization objects: mutexes, counting semaphores, per-task signal
//! sets, bounded message queues, and tick-driven timers. Every object is
//! declared up front with [`build!`]; nothing is created or destroyed at
//! runtime.
//!
//! The kernel runs on a *port*, which supplies context switching, interrupt
//! masking, and a tick source by implementing [`PortThreading`] and
//! [`PortInterrupts`]. The port drives the kernel through [`PortToKernel`].
//!
//! # Locking
//!
//! The kernel has one critical section: the preemption-disabled state. Every
//! mutable field of every control block is a [`KernelCell`] that can only be
//! accessed while holding the token that represents that state. Interrupt
//! handlers never touch kernel cells; they raise *interrupt events* and tick
//! the timer, both of which only update a pair of atomics while interrupts are
//! masked ("CPU Lock"). The events are applied later by the dispatcher, in
//! task context, with preemption disabled.
//!
//! # Scheduler and mutex protocol
//!
//! The scheduling algorithm is a type parameter of the kernel instance. It
//! also determines the mutex protocol:
//!
//! | Scheduler                      | Mutex protocol       |
//! | ------------------------------ | -------------------- |
//! | [`sched::StrictPriority`]      | none                 |
//! | [`sched::PriorityCeiling`]     | priority ceiling     |
//! | [`sched::PriorityInheritance`] | priority inheritance |
#![cfg_attr(not(test), no_std)] // Link `std` only when building a test (`cfg(test)`)
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(rust_2018_idioms)]
use core::{fmt, marker::PhantomData};

#[macro_use]
mod cfg;
mod error;
mod interrupt;
mod klock;
mod message_queue;
mod mutex;
pub mod sched;
mod semaphore;
mod signal;
mod state;
mod task;
mod timer;
pub mod utils;
#[cfg(feature = "validate")]
mod validate;

pub use self::{
    error::FatalError,
    interrupt::{InterruptEventAction, InterruptEventAttr, InterruptEventId},
    message_queue::{MessageQueueAttr, MessageQueueCb, MessageQueueId},
    mutex::{MutexAttr, MutexCb, MutexId},
    semaphore::{SemaphoreAttr, SemaphoreCb, SemaphoreId, SemaphoreValue},
    signal::SignalSet,
    state::State,
    task::{TaskAttr, TaskCb, TaskId},
    timer::{TicksAbsolute, TicksRelative, TimerAction, TimerAttr, TimerCb, TimerId, MAX_TIMEOUT},
};

#[doc(hidden)]
pub use self::klock::KernelCell;

/// Implemented by a port. This trait contains items related to low-level
/// operations for controlling CPU states and context switching.
///
/// # Safety
///
/// Implementing a port is inherently unsafe because it's responsible for
/// initializing the execution environment and providing a dispatcher
/// implementation.
///
/// These methods are only meant to be called by the kernel.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait PortThreading: Sized + Send + Sync + 'static {
    /// The port-specific part of a task control block: the saved execution
    /// context of a task.
    type PortTaskState: Send + Sync + fmt::Debug + 'static;

    /// The initial value of [`TaskCb::port_task_state`] for all tasks.
    #[allow(clippy::declare_interior_mutable_const)] // it's intentional
    const PORT_TASK_STATE_INIT: Self::PortTaskState;

    /// Prepare `state` so that, when it's dispatched for the first time, the
    /// task starts executing `entry` on a fresh stack of
    /// [`TaskAttr::stack_size`] bytes.
    ///
    /// Precondition: Preemption disabled, the task isn't running
    unsafe fn initialize_task_state(
        state: &'static Self::PortTaskState,
        entry: fn() -> !,
        attr: &'static TaskAttr,
    );

    /// Transfer the control to the task represented by `to`, discarding the
    /// current (boot) context.
    ///
    /// Precondition: Preemption disabled, called once from the boot context
    unsafe fn dispatch_first_task(to: &'static Self::PortTaskState) -> !;

    /// Save the current context into `from` and resume `to`. Returns when
    /// some other task switches back to `from`.
    ///
    /// Precondition: Preemption disabled, task context, `from != to`
    unsafe fn switch_context(
        from: &'static Self::PortTaskState,
        to: &'static Self::PortTaskState,
    );

    /// Return a flag indicating whether the current context is a task
    /// context.
    fn is_task_context() -> bool;
}

/// Implemented by a port. This trait contains items related to controlling
/// interrupt masking.
///
/// # Safety
///
/// These methods are only meant to be called by the kernel.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait PortInterrupts {
    /// Mask interrupts (enter CPU Lock).
    ///
    /// Precondition: CPU Lock inactive
    unsafe fn enter_cpu_lock();

    /// Unmask interrupts (leave CPU Lock).
    ///
    /// Precondition: CPU Lock active
    unsafe fn leave_cpu_lock();

    fn is_cpu_lock_active() -> bool;

    /// Atomically unmask interrupts and wait until an interrupt is taken,
    /// then mask interrupts again before returning.
    ///
    /// Precondition: CPU Lock active
    unsafe fn wait_for_interrupt();

    /// Return a flag indicating whether the current context is an interrupt
    /// context.
    fn is_interrupt_context() -> bool;
}

/// Methods intended to be called by a port.
///
/// # Safety
///
/// These are only meant to be called by the port.
#[allow(clippy::missing_safety_doc)]
pub trait PortToKernel {
    /// Initialize runtime structures and start the first task.
    ///
    /// Precondition: CPU Lock inactive, a boot context, called only once
    unsafe fn boot() -> !;

    /// Account one timer tick. Called by the port's timer interrupt handler.
    ///
    /// Precondition: CPU Lock inactive, an interrupt context
    unsafe fn timer_tick();

    /// Called by the port on the way out of an interrupt handler, after
    /// leaving the interrupt context, to service a pending preemption.
    ///
    /// Precondition: CPU Lock inactive, a task context
    unsafe fn interrupt_return();
}

impl<Traits: KernelTraits> PortToKernel for Traits {
    unsafe fn boot() -> ! {
        // Safety: Upheld by the caller
        unsafe { task::boot::<Traits>() }
    }

    unsafe fn timer_tick() {
        timer::handle_tick_interrupt::<Traits>();
    }

    unsafe fn interrupt_return() {
        state::service_pending_preemption::<Traits>();
    }
}

/// Associates static data with a system type. The kernel uses this trait to
/// access the control blocks and the global state of a kernel instance.
///
/// Implemented by [`build!`]; do not implement it by hand.
///
/// # Safety
///
/// The returned pools must be consistent with the ids generated for the
/// same configuration.
#[doc(hidden)]
pub unsafe trait KernelCfg: PortThreading {
    /// The scheduling algorithm, which also decides the mutex protocol.
    type Sched: sched::Scheduler<Self>;

    /// The fatal error entry point.
    fn fatal_error(error: FatalError) -> !;

    fn state() -> &'static State<Self>;

    fn task_cb_pool() -> &'static [TaskCb<Self>];

    fn mutex_cb_pool() -> &'static [MutexCb<Self>];

    fn semaphore_cb_pool() -> &'static [SemaphoreCb<Self>];

    fn message_queue_cb_pool() -> &'static [MessageQueueCb<Self>];

    /// The backing storage of every message queue, laid out back to back.
    fn message_queue_buffer_pool() -> &'static [KernelCell<Self, u8>];

    /// User timers followed by one task timer per task.
    fn timer_cb_pool() -> &'static [TimerCb<Self>];

    /// One slot per task and per mutex. Used by [`sched::PriorityCeiling`].
    fn sched_slot_pool() -> &'static [sched::SchedSlot<Self>];

    fn interrupt_event_attr_pool() -> &'static [InterruptEventAttr];
}

/// Represents a complete kernel instance: a port plus a configuration.
pub trait KernelTraits: PortThreading + PortInterrupts + KernelCfg {}

impl<T: PortThreading + PortInterrupts + KernelCfg> KernelTraits for T {}

/// The task-facing API of a kernel instance.
///
/// `Traits` is the system type, which is defined by a port's `use_port!`
/// macro and configured by [`build!`].
pub struct System<Traits>(PhantomData<Traits>);

impl<Traits> Clone for System<Traits> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<Traits> Copy for System<Traits> {}

impl<Traits> fmt::Debug for System<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("System")
    }
}

impl<Traits: KernelTraits> System<Traits> {
    /// Return the id of the currently running task.
    pub fn task_current() -> TaskId {
        task::current::<Traits>()
    }

    /// Give up the processor to the highest-priority runnable task. Returns
    /// immediately if that's the calling task.
    pub fn yield_now() {
        task::yield_now::<Traits>();
    }

    /// Switch straight to `task` if it's runnable, ignoring its priority.
    /// Otherwise, behave like [`Self::yield_now`].
    pub fn yield_to(task: TaskId) {
        task::yield_to::<Traits>(task);
    }

    /// Block the calling task until some other task or an interrupt event
    /// unblocks it.
    pub fn block() {
        task::block::<Traits>();
    }

    /// Make `task` runnable.
    pub fn unblock(task: TaskId) {
        task::unblock::<Traits>(task);
    }

    /// Block the calling task for `ticks` timer ticks. Neither `unblock` nor
    /// signals end the sleep early.
    pub fn sleep(ticks: TicksRelative) {
        task::sleep::<Traits>(ticks);
    }

    /// Start a task that was configured with `autostart(false)`.
    pub fn task_start(task: TaskId) {
        task::unblock::<Traits>(task);
    }

    /// Return the priority `task` is currently scheduled at. This is the
    /// task's own id unless it's raised by a mutex protocol.
    pub fn task_effective_priority(task: TaskId) -> usize {
        task::effective_priority::<Traits>(task)
    }

    /// Wait until at least one of the signals in `set` is pending on the
    /// calling task. Clear and return the pending subset of `set`.
    pub fn signal_wait_set(set: SignalSet) -> SignalSet {
        signal::wait_set::<Traits>(set)
    }

    /// Clear and return the pending subset of `set` without blocking.
    pub fn signal_poll_set(set: SignalSet) -> SignalSet {
        signal::poll_set::<Traits>(set)
    }

    /// Return the pending subset of `set` without clearing it.
    pub fn signal_peek_set(set: SignalSet) -> SignalSet {
        signal::peek_set::<Traits>(set)
    }

    /// Make the signals in `set` pending on `task` and unblock it.
    pub fn signal_send_set(task: TaskId, set: SignalSet) {
        signal::send_set::<Traits>(task, set);
    }

    /// Acquire `mutex`, blocking while another task holds it.
    pub fn mutex_lock(mutex: MutexId) {
        mutex::lock::<Traits>(mutex);
    }

    /// Acquire `mutex` if it's free.
    pub fn mutex_try_lock(mutex: MutexId) -> bool {
        mutex::try_lock::<Traits>(mutex)
    }

    /// Release `mutex`, which must be held by the calling task.
    pub fn mutex_unlock(mutex: MutexId) {
        mutex::unlock::<Traits>(mutex);
    }

    /// Acquire `mutex`, giving up after `timeout` ticks.
    pub fn mutex_lock_timeout(mutex: MutexId, timeout: TicksRelative) -> bool {
        mutex::lock_timeout::<Traits>(mutex, timeout)
    }

    pub fn mutex_holder_is_current(mutex: MutexId) -> bool {
        mutex::holder_is_current::<Traits>(mutex)
    }

    pub fn mutex_is_locked(mutex: MutexId) -> bool {
        mutex::is_locked::<Traits>(mutex)
    }

    /// Decrement `semaphore`, blocking while it's zero.
    pub fn sem_wait(semaphore: SemaphoreId) {
        semaphore::wait::<Traits>(semaphore);
    }

    /// Increment `semaphore`.
    pub fn sem_post(semaphore: SemaphoreId) {
        semaphore::post::<Traits>(semaphore);
    }

    /// Decrement `semaphore` if it's positive.
    pub fn sem_try_wait(semaphore: SemaphoreId) -> bool {
        semaphore::try_wait::<Traits>(semaphore)
    }

    /// Decrement `semaphore`, giving up after `timeout` ticks.
    pub fn sem_wait_timeout(semaphore: SemaphoreId, timeout: TicksRelative) -> bool {
        semaphore::wait_timeout::<Traits>(semaphore, timeout)
    }

    /// Set the maximum value of a semaphore that was configured without one.
    pub fn sem_max_init(semaphore: SemaphoreId, max: SemaphoreValue) {
        semaphore::max_init::<Traits>(semaphore, max);
    }

    pub fn sem_value(semaphore: SemaphoreId) -> SemaphoreValue {
        semaphore::value::<Traits>(semaphore)
    }

    /// Append `message` to `queue`, blocking while it's full.
    pub fn message_queue_put(queue: MessageQueueId, message: &[u8]) {
        message_queue::put::<Traits>(queue, message);
    }

    pub fn message_queue_try_put(queue: MessageQueueId, message: &[u8]) -> bool {
        message_queue::try_put::<Traits>(queue, message)
    }

    pub fn message_queue_put_timeout(
        queue: MessageQueueId,
        message: &[u8],
        timeout: TicksRelative,
    ) -> bool {
        message_queue::put_timeout::<Traits>(queue, message, timeout)
    }

    /// Remove the oldest message of `queue` into `message`, blocking while
    /// the queue is empty.
    pub fn message_queue_get(queue: MessageQueueId, message: &mut [u8]) {
        message_queue::get::<Traits>(queue, message);
    }

    pub fn message_queue_try_get(queue: MessageQueueId, message: &mut [u8]) -> bool {
        message_queue::try_get::<Traits>(queue, message)
    }

    pub fn message_queue_get_timeout(
        queue: MessageQueueId,
        message: &mut [u8],
        timeout: TicksRelative,
    ) -> bool {
        message_queue::get_timeout::<Traits>(queue, message, timeout)
    }

    /// Return the number of messages stored in `queue`.
    pub fn message_queue_len(queue: MessageQueueId) -> usize {
        message_queue::len::<Traits>(queue)
    }

    /// Start `timer` with its reload value as the first period. A timer with
    /// a zero reload value is disabled instead.
    pub fn timer_enable(timer: TimerId) {
        timer::enable::<Traits>(timer);
    }

    pub fn timer_disable(timer: TimerId) {
        timer::disable::<Traits>(timer);
    }

    /// Fire `timer` once, `timeout` ticks from now.
    pub fn timer_oneshot(timer: TimerId, timeout: TicksRelative) {
        timer::oneshot::<Traits>(timer, timeout);
    }

    /// Read and clear the overflow flag of `timer`.
    pub fn timer_check_overflow(timer: TimerId) -> bool {
        timer::check_overflow::<Traits>(timer)
    }

    /// Return the number of ticks until `timer` fires, or zero if it's
    /// disabled.
    pub fn timer_remaining(timer: TimerId) -> TicksRelative {
        timer::remaining::<Traits>(timer)
    }

    pub fn timer_reload_set(timer: TimerId, reload: TicksRelative) {
        timer::reload_set::<Traits>(timer, reload);
    }

    /// Make `timer` send `set` to `task` on expiry.
    pub fn timer_signal_set(timer: TimerId, task: TaskId, set: SignalSet) {
        timer::signal_set::<Traits>(timer, task, set);
    }

    /// Make `timer` raise `error` on expiry.
    pub fn timer_error_set(timer: TimerId, error: FatalError) {
        timer::error_set::<Traits>(timer, error);
    }

    /// Return the current value of the tick counter.
    pub fn timer_current_ticks() -> TicksAbsolute {
        timer::current_ticks::<Traits>()
    }

    /// Raise an interrupt event. This can be called from an interrupt
    /// context.
    pub fn interrupt_event_raise(event: InterruptEventId) {
        interrupt::raise::<Traits>(event);
    }
}
