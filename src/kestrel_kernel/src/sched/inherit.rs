use core::sync::atomic::{AtomicBool, Ordering};

use crate::{
    klock::{KernelCell, KernelTokenRefMut},
    task::WaitObject,
    utils::Init,
    KernelCfg, KernelTraits, MutexId, TaskId,
};

use super::{private, Ctx, Scheduler};

/// Priority-inheritance scheduling.
///
/// Every task has an effective priority: the highest of its own priority and
/// the effective priorities of the tasks blocked on the mutexes it holds.
/// The runnable task with the highest effective priority runs; ties go to
/// the lower id.
///
/// Effective priorities are recomputed lazily. Any change to runnability or
/// to mutex ownership or waiting only marks them stale.
pub struct PriorityInheritance {
    /// `true` if the effective priorities must be recomputed. Only accessed
    /// while preemption is disabled.
    stale: AtomicBool,
}

impl Init for PriorityInheritance {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        stale: AtomicBool::new(true),
    };
}

impl private::Sealed for PriorityInheritance {}

pub struct InheritancePerTaskData<Traits> {
    runnable: KernelCell<Traits, bool>,
    effective_priority: KernelCell<Traits, usize>,
}

impl<Traits> Init for InheritancePerTaskData<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        runnable: Init::INIT,
        effective_priority: Init::INIT,
    };
}

/// The "blocked on" relation among tasks, with a mutable effective priority
/// per task.
pub(super) trait PriorityGraph {
    fn num_tasks(&self) -> usize;

    /// Get the task holding the mutex `task` is blocked on.
    fn blocker(&mut self, task: usize) -> Option<usize>;

    fn effective_priority(&mut self, task: usize) -> usize;

    fn set_effective_priority(&mut self, task: usize, priority: usize);
}

/// Recompute every effective priority. Each task starts at its own priority,
/// and the priorities are pushed along the "blocked on" edges until nothing
/// changes. This terminates even if the edges form a cycle because
/// priorities only ever rise.
pub(super) fn propagate_priorities(graph: &mut impl PriorityGraph) {
    let num_tasks = graph.num_tasks();
    for task in 0..num_tasks {
        graph.set_effective_priority(task, task);
    }

    loop {
        let mut changed = false;
        for waiter in 0..num_tasks {
            let Some(holder) = graph.blocker(waiter) else { continue };
            let priority = graph.effective_priority(waiter);
            if priority < graph.effective_priority(holder) {
                graph.set_effective_priority(holder, priority);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// [`PriorityGraph`] over the live kernel state.
struct KernelGraph<'a, Traits: KernelTraits> {
    lock: KernelTokenRefMut<'a, Traits>,
}

impl<Traits> PriorityGraph for KernelGraph<'_, Traits>
where
    Traits: KernelTraits + KernelCfg<Sched = PriorityInheritance>,
{
    fn num_tasks(&self) -> usize {
        Traits::task_cb_pool().len()
    }

    fn blocker(&mut self, task: usize) -> Option<usize> {
        let task_cb = &Traits::task_cb_pool()[task];
        if task_cb.sched_data.runnable.get(&*self.lock) {
            return None;
        }
        match task_cb.wait.get(&*self.lock) {
            Some(WaitObject::Mutex(mutex)) => mutex
                .cb::<Traits>()
                .holder
                .get(&*self.lock)
                .map(TaskId::index),
            _ => None,
        }
    }

    fn effective_priority(&mut self, task: usize) -> usize {
        Traits::task_cb_pool()[task]
            .sched_data
            .effective_priority
            .get(&*self.lock)
    }

    fn set_effective_priority(&mut self, task: usize, priority: usize) {
        Traits::task_cb_pool()[task]
            .sched_data
            .effective_priority
            .replace(&mut *self.lock, priority);
    }
}

impl PriorityInheritance {
    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Relaxed);
    }

    fn refresh<Traits>(&self, lock: KernelTokenRefMut<'_, Traits>)
    where
        Traits: KernelTraits + KernelCfg<Sched = Self>,
    {
        if self.stale.swap(false, Ordering::Relaxed) {
            propagate_priorities(&mut KernelGraph { lock });
        }
    }
}

impl<Traits: KernelTraits> Scheduler<Traits> for PriorityInheritance
where
    Traits: KernelCfg<Sched = Self>,
{
    type PerTaskData = InheritancePerTaskData<Traits>;
    type PerMutexData = ();

    fn init(&self, _ctx: Ctx<'_, Traits>) {
        self.mark_stale();
    }

    fn set_runnable(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        task.cb::<Traits>()
            .sched_data
            .runnable
            .replace(&mut *ctx.lock, true);
        self.mark_stale();
    }

    fn set_blocked(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        task.cb::<Traits>()
            .sched_data
            .runnable
            .replace(&mut *ctx.lock, false);
        self.mark_stale();
    }

    fn is_runnable(&self, ctx: Ctx<'_, Traits>, task: TaskId) -> bool {
        task.cb::<Traits>().sched_data.runnable.get(&*ctx.lock)
    }

    fn get_next(&self, mut ctx: Ctx<'_, Traits>) -> Option<TaskId> {
        self.refresh::<Traits>(ctx.lock.borrow_mut());

        Traits::task_cb_pool()
            .iter()
            .enumerate()
            .filter(|(_, task_cb)| task_cb.sched_data.runnable.get(&*ctx.lock))
            .min_by_key(|&(task_i, task_cb)| {
                (task_cb.sched_data.effective_priority.get(&*ctx.lock), task_i)
            })
            .map(|(task_i, _)| TaskId::new(task_i))
    }

    fn mutex_locked(&self, _ctx: Ctx<'_, Traits>, _mutex: MutexId, _task: TaskId) {
        self.mark_stale();
    }

    fn mutex_unlocked(&self, _ctx: Ctx<'_, Traits>, _mutex: MutexId) {
        self.mark_stale();
    }

    fn mutex_waiters_changed(&self, _ctx: Ctx<'_, Traits>) {
        self.mark_stale();
    }

    fn effective_priority(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) -> usize {
        self.refresh::<Traits>(ctx.lock.borrow_mut());
        task.cb::<Traits>()
            .sched_data
            .effective_priority
            .get(&*ctx.lock)
    }
}
