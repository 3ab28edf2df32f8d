//! User-mode scheduling
//!
//! A [`ThreadGroup`] is a set of OS threads ("workers") of which at most one
//! runs at a time. The running worker hands over the processor explicitly by
//! calling [`ThreadGroup::switch_to`]. Every other worker waits on a
//! condition variable.
use slab::Slab;
use std::{
    any::Any,
    cell::Cell,
    panic::{self, AssertUnwindSafe},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(usize);

/// The payload of a panic that occurred in a worker.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

pub struct ThreadGroup {
    state: Mutex<GroupState>,
    cond: Condvar,
}

struct GroupState {
    workers: Slab<WorkerInfo>,
    /// The worker holding the processor.
    running: Option<WorkerId>,
    shutdown: bool,
    /// The first panic that occurred in a worker.
    panic: Option<PanicPayload>,
}

struct WorkerInfo {
    name: String,
}

thread_local! {
    static CURRENT_WORKER: Cell<Option<WorkerId>> = const { Cell::new(None) };
}

/// Get the worker the current thread backs.
pub fn current_worker() -> Option<WorkerId> {
    CURRENT_WORKER.with(Cell::get)
}

/// Block the current thread forever. Workers end up here after the group
/// shuts down.
pub fn park_forever() -> ! {
    loop {
        thread::park();
    }
}

impl ThreadGroup {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GroupState {
                workers: Slab::new(),
                running: None,
                shutdown: false,
                panic: None,
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        // A panicking worker never leaves `GroupState` half-updated
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a worker. It doesn't start running `f` until it's given the
    /// processor by [`Self::start`], [`Self::switch_to`], or
    /// [`Self::exit_to`].
    ///
    /// A panic in `f` shuts down the group, and so does `f` returning.
    pub fn spawn(
        &'static self,
        name: String,
        stack_size: usize,
        f: impl FnOnce() + Send + 'static,
    ) -> WorkerId {
        let worker = WorkerId(self.lock().workers.insert(WorkerInfo { name: name.clone() }));
        log::trace!("spawning worker {worker:?} ({name:?})");

        let builder = thread::Builder::new().name(name).stack_size(stack_size);
        let result = builder.spawn(move || {
            CURRENT_WORKER.with(|cell| cell.set(Some(worker)));
            self.wait_until_running(worker);

            let result = panic::catch_unwind(AssertUnwindSafe(f));

            let mut state = self.lock();
            match result {
                Ok(()) => log::warn!("worker {worker:?} exited"),
                Err(payload) => {
                    log::debug!("worker {worker:?} panicked");
                    state.panic.get_or_insert(payload);
                }
            }
            self.shutdown_locked(&mut state);
            drop(state);

            park_forever()
        });

        if let Err(e) = result {
            panic!("failed to spawn worker {worker:?}: {e}");
        }

        worker
    }

    /// Give the processor to `worker`. Called by a thread outside the group
    /// to start running the group.
    pub fn start(&self, worker: WorkerId) {
        let mut state = self.lock();
        assert!(state.running.is_none(), "the group is already running");
        state.running = Some(worker);
        self.cond.notify_all();
    }

    /// Give the processor to `to` and wait until it's given back. Must be
    /// called by the running worker.
    pub fn switch_to(&self, to: WorkerId) {
        let me = self.expect_running();
        if me == to {
            return;
        }

        {
            let mut state = self.lock();
            log::trace!(
                "switching from {:?} to {:?}",
                state.workers.get(me.0).map(|w| &w.name),
                state.workers.get(to.0).map(|w| &w.name),
            );
            state.running = Some(to);
            self.cond.notify_all();
        }

        self.wait_until_running(me);
    }

    /// Give the processor to `to` and never run again. Must be called by the
    /// running worker.
    pub fn exit_to(&self, to: WorkerId) -> ! {
        self.expect_running();

        let mut state = self.lock();
        state.running = Some(to);
        self.cond.notify_all();
        drop(state);

        park_forever()
    }

    /// Stop the group. No worker runs after this.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        self.shutdown_locked(&mut state);
    }

    fn shutdown_locked(&self, state: &mut GroupState) {
        log::trace!("shutting down the thread group");
        state.shutdown = true;
        state.running = None;
        self.cond.notify_all();
    }

    /// Wait until the group shuts down. Returns the payload of the first
    /// panic that occurred in a worker, if any.
    pub fn join(&self) -> Result<(), PanicPayload> {
        let mut state = self.lock();
        while !state.shutdown {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        match state.panic.take() {
            Some(payload) => Err(payload),
            None => Ok(()),
        }
    }

    fn expect_running(&self) -> WorkerId {
        let me = current_worker();
        let running = self.lock().running;
        match me {
            Some(me) if running == Some(me) => me,
            _ => panic!("{me:?} is not the running worker ({running:?})"),
        }
    }

    /// Block until `worker` holds the processor. If the group shuts down
    /// first, block forever.
    fn wait_until_running(&self, worker: WorkerId) {
        let mut state = self.lock();
        loop {
            if state.shutdown {
                drop(state);
                park_forever();
            }
            if state.running == Some(worker) {
                return;
            }
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
