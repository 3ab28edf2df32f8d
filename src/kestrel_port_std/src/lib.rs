//! Simulation environment for running the kernel on a hosted environment.
//!
//! Every task is backed by a host thread. The threads are members of one
//! [user-mode scheduling](ums) group, so at most one of them runs at a time,
//! and a context switch is a hand-over between two threads.
//!
//! There is no hardware timer. The tick source is virtual: when no task is
//! runnable, `wait_for_interrupt` delivers a timer tick immediately. A test
//! can also deliver a tick while a task is running with [`pend_tick`], or run
//! arbitrary code as an interrupt handler with [`simulate_interrupt`].
//!
//! ```ignore
//! kestrel_port_std::use_port!(unsafe struct SystemTraits);
//! kestrel_kernel::build! { SystemTraits { /* ... */ } }
//!
//! let outcome = kestrel_port_std::port_boot::<SystemTraits>();
//! ```
#![deny(unsafe_op_in_unsafe_fn)]
use kestrel_kernel::{FatalError, KernelTraits, PortThreading, PortToKernel, TaskAttr};
use spin::Mutex as SpinMutex;
use std::{
    cell::Cell,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        OnceLock,
    },
};

mod ums;

/// Used by `use_port!`
#[doc(hidden)]
pub extern crate kestrel_kernel;

/// The minimum stack size of a host thread backing a task. Host code needs
/// much more stack than the configured sizes, which target the real
/// hardware.
pub const MIN_STACK_SIZE: usize = 256 * 1024;

/// The number of consecutive idle ticks after which the simulation is
/// considered deadlocked.
pub const MAX_IDLE_TICKS: usize = 100_000;

/// How a simulation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The application called [`shutdown`] with this outcome.
    Complete,
    /// The kernel called the fatal error entry point, [`halt`].
    Fatal(FatalError),
}

/// Implemented on a kernel trait type by [`use_port!`].
///
/// # Safety
///
/// Only meant to be implemented by [`use_port!`].
#[doc(hidden)]
pub unsafe trait PortInstance: KernelTraits + PortThreading<PortTaskState = TaskState> {
    fn port_state() -> &'static State;
}

/// The internal state of the port.
///
/// # Safety
///
/// For the safety information of this type's methods, see the documentation
/// of the corresponding trait methods of `Port*`.
#[doc(hidden)]
pub struct State {
    thread_group: OnceLock<ums::ThreadGroup>,
    cpu_lock: AtomicBool,
    /// The number of ticks delivered by `wait_for_interrupt` since the last
    /// context switch.
    idle_ticks: AtomicUsize,
    outcome: SpinMutex<Option<Outcome>>,
}

/// The port-specific part of a task control block.
pub struct TaskState {
    /// The worker thread backing the task. Spawned on the first dispatch.
    worker: SpinMutex<Option<ums::WorkerId>>,
    /// Set by `initialize_task_state`.
    entry: SpinMutex<Option<TaskEntry>>,
}

#[derive(Clone, Copy)]
struct TaskEntry {
    entry: fn() -> !,
    stack_size: usize,
}

impl fmt::Debug for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskState")
            .field("worker", &*self.worker.lock())
            .finish_non_exhaustive()
    }
}

/// The role of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadRole {
    Unknown,
    Boot,
    /// A task thread running an interrupt handler.
    Interrupt,
    /// The backing thread for a task.
    Task,
}

thread_local! {
    /// The current thread's role. It's automatically assigned after the
    /// creation of a thread managed by the port.
    static THREAD_ROLE: Cell<ThreadRole> = const { Cell::new(ThreadRole::Unknown) };
}

fn thread_role() -> ThreadRole {
    THREAD_ROLE.with(Cell::get)
}

fn set_thread_role(role: ThreadRole) {
    THREAD_ROLE.with(|cell| cell.set(role));
}

fn expect_worker_thread() -> ThreadRole {
    let role = thread_role();
    assert_ne!(role, ThreadRole::Unknown, "not a worker thread");
    role
}

/// Run `f` in an interrupt context.
fn as_interrupt<R>(f: impl FnOnce() -> R) -> R {
    let role = thread_role();
    set_thread_role(ThreadRole::Interrupt);
    let result = f();
    set_thread_role(role);
    result
}

impl TaskState {
    pub const fn new() -> Self {
        Self {
            worker: SpinMutex::new(None),
            entry: SpinMutex::new(None),
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::missing_safety_doc)]
impl State {
    pub const fn new() -> Self {
        Self {
            thread_group: OnceLock::new(),
            cpu_lock: AtomicBool::new(false),
            idle_ticks: AtomicUsize::new(0),
            outcome: SpinMutex::new(None),
        }
    }

    fn thread_group(&self) -> &ums::ThreadGroup {
        match self.thread_group.get() {
            Some(thread_group) => thread_group,
            None => panic!("the port hasn't booted"),
        }
    }

    /// Create the thread group and boot the kernel in it. Returns when the
    /// simulation ends, and propagates any panic that occurred in it.
    pub fn port_boot<Traits: PortInstance>(&'static self) -> Outcome {
        if self.thread_group.set(ums::ThreadGroup::new()).is_err() {
            panic!("the port has already booted");
        }
        let thread_group = self.thread_group();

        // Create the initial worker, where the boot phase of the kernel runs
        let boot = thread_group.spawn("boot".to_owned(), MIN_STACK_SIZE, || {
            set_thread_role(ThreadRole::Boot);

            // Safety: We are a port, so it's okay to call this
            unsafe { <Traits as PortToKernel>::boot() }
        });
        log::trace!("boot worker = {boot:?}");
        thread_group.start(boot);

        // Wait until the thread group shuts down
        if let Err(payload) = thread_group.join() {
            std::panic::resume_unwind(payload);
        }

        match *self.outcome.lock() {
            Some(outcome) => outcome,
            None => panic!("the simulation ended without an outcome"),
        }
    }

    pub unsafe fn initialize_task_state(
        &self,
        state: &'static TaskState,
        entry: fn() -> !,
        attr: &'static TaskAttr,
    ) {
        log::trace!("initialize_task_state {state:p}");
        expect_worker_thread();

        *state.entry.lock() = Some(TaskEntry {
            entry,
            stack_size: attr.stack_size,
        });
    }

    /// Get the worker backing `state`, spawning it if it doesn't exist yet.
    fn task_worker(&'static self, state: &'static TaskState) -> ums::WorkerId {
        let mut worker = state.worker.lock();
        if let Some(worker) = *worker {
            return worker;
        }

        let Some(TaskEntry { entry, stack_size }) = *state.entry.lock() else {
            panic!("task {state:p} was dispatched before initialization");
        };

        let spawned = self.thread_group().spawn(
            format!("task {state:p}"),
            stack_size.max(MIN_STACK_SIZE),
            move || {
                set_thread_role(ThreadRole::Task);
                log::debug!("task {state:p} is now running");
                entry();
            },
        );
        *worker = Some(spawned);
        spawned
    }

    pub unsafe fn dispatch_first_task(&'static self, to: &'static TaskState) -> ! {
        log::trace!("dispatch_first_task({to:p})");
        assert_eq!(expect_worker_thread(), ThreadRole::Boot);

        let worker = self.task_worker(to);
        self.idle_ticks.store(0, Ordering::Relaxed);
        self.thread_group().exit_to(worker)
    }

    pub unsafe fn switch_context(&'static self, from: &'static TaskState, to: &'static TaskState) {
        log::trace!("switch_context({from:p}, {to:p})");
        assert_eq!(expect_worker_thread(), ThreadRole::Task);
        assert_eq!(*from.worker.lock(), ums::current_worker());

        let worker = self.task_worker(to);
        self.idle_ticks.store(0, Ordering::Relaxed);
        self.thread_group().switch_to(worker);
    }

    pub fn is_task_context(&self) -> bool {
        expect_worker_thread() == ThreadRole::Task
    }

    pub fn is_interrupt_context(&self) -> bool {
        expect_worker_thread() == ThreadRole::Interrupt
    }

    pub unsafe fn enter_cpu_lock(&self) {
        log::trace!("enter_cpu_lock");
        expect_worker_thread();
        assert!(!self.cpu_lock.swap(true, Ordering::Relaxed));
    }

    pub unsafe fn leave_cpu_lock(&self) {
        log::trace!("leave_cpu_lock");
        expect_worker_thread();
        assert!(self.cpu_lock.swap(false, Ordering::Relaxed));
    }

    pub fn is_cpu_lock_active(&self) -> bool {
        self.cpu_lock.load(Ordering::Relaxed)
    }

    /// Deliver a timer tick, which is the only interrupt source while the
    /// processor is idle.
    pub unsafe fn wait_for_interrupt<Traits: PortInstance>(&self) {
        expect_worker_thread();
        assert!(self.is_cpu_lock_active());

        let idle_ticks = self.idle_ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if idle_ticks > MAX_IDLE_TICKS {
            panic!("deadlock: no task became runnable after {MAX_IDLE_TICKS} idle ticks");
        }

        self.cpu_lock.store(false, Ordering::Relaxed);
        // Safety: CPU Lock inactive, an interrupt context
        as_interrupt(|| unsafe { <Traits as PortToKernel>::timer_tick() });
        self.cpu_lock.store(true, Ordering::Relaxed);
    }
}

/// Run `f` as an interrupt handler, then return to the interrupted task,
/// switching to another task if `f` made that necessary.
///
/// Must be called from a task with CPU Lock inactive.
pub fn simulate_interrupt<Traits: PortInstance>(f: impl FnOnce()) {
    assert_eq!(expect_worker_thread(), ThreadRole::Task);
    assert!(!Traits::port_state().is_cpu_lock_active());

    log::trace!("simulate_interrupt enter");
    as_interrupt(f);
    log::trace!("simulate_interrupt leave");

    // Safety: CPU Lock inactive, a task context
    unsafe { <Traits as PortToKernel>::interrupt_return() };
}

/// Deliver a timer tick to the kernel from the running task, as if the timer
/// interrupt fired.
pub fn pend_tick<Traits: PortInstance>() {
    // Safety: CPU Lock inactive, an interrupt context
    simulate_interrupt::<Traits>(|| unsafe { <Traits as PortToKernel>::timer_tick() });
}

/// End the simulation with `outcome`. [`port_boot`] returns `outcome`.
pub fn shutdown<Traits: PortInstance>(outcome: Outcome) -> ! {
    log::debug!("shutdown({outcome:?})");
    let state = Traits::port_state();

    // Keep the first outcome
    state.outcome.lock().get_or_insert(outcome);
    state.thread_group().shutdown();

    ums::park_forever()
}

/// A fatal error entry point that ends the simulation with
/// [`Outcome::Fatal`].
pub fn halt<Traits: PortInstance>(error: FatalError) -> ! {
    log::debug!("fatal error: {error}");
    shutdown::<Traits>(Outcome::Fatal(error))
}

/// Boot the kernel and run it until the simulation ends.
///
/// Installs `env_logger` unless a logger is already installed.
pub fn port_boot<Traits: PortInstance>() -> Outcome {
    let _ = env_logger::try_init();
    Traits::port_state().port_boot::<Traits>()
}

/// Instantiate the port. Defines a system type that can be configured with
/// `kestrel_kernel::build!`.
#[macro_export]
macro_rules! use_port {
    (unsafe $vis:vis struct $SystemTraits:ident) => {
        $vis struct $SystemTraits;

        mod port_std_impl {
            use super::$SystemTraits;
            use $crate::kestrel_kernel::{PortInterrupts, PortThreading, TaskAttr};
            use $crate::{PortInstance, State, TaskState};

            pub(super) static PORT_STATE: State = State::new();

            unsafe impl PortInstance for $SystemTraits {
                #[inline]
                fn port_state() -> &'static State {
                    &PORT_STATE
                }
            }

            // Assume `$SystemTraits: KernelTraits`
            unsafe impl PortThreading for $SystemTraits {
                type PortTaskState = TaskState;
                #[allow(clippy::declare_interior_mutable_const)]
                const PORT_TASK_STATE_INIT: Self::PortTaskState = TaskState::new();

                unsafe fn initialize_task_state(
                    state: &'static TaskState,
                    entry: fn() -> !,
                    attr: &'static TaskAttr,
                ) {
                    unsafe { PORT_STATE.initialize_task_state(state, entry, attr) }
                }

                unsafe fn dispatch_first_task(to: &'static TaskState) -> ! {
                    unsafe { PORT_STATE.dispatch_first_task(to) }
                }

                unsafe fn switch_context(from: &'static TaskState, to: &'static TaskState) {
                    unsafe { PORT_STATE.switch_context(from, to) }
                }

                fn is_task_context() -> bool {
                    PORT_STATE.is_task_context()
                }
            }

            unsafe impl PortInterrupts for $SystemTraits {
                unsafe fn enter_cpu_lock() {
                    unsafe { PORT_STATE.enter_cpu_lock() }
                }

                unsafe fn leave_cpu_lock() {
                    unsafe { PORT_STATE.leave_cpu_lock() }
                }

                fn is_cpu_lock_active() -> bool {
                    PORT_STATE.is_cpu_lock_active()
                }

                unsafe fn wait_for_interrupt() {
                    unsafe { PORT_STATE.wait_for_interrupt::<$SystemTraits>() }
                }

                fn is_interrupt_context() -> bool {
                    PORT_STATE.is_interrupt_context()
                }
            }
        }
    };
}
