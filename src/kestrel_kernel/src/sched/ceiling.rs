use crate::{
    error::{fatal, FatalError},
    klock::KernelCell,
    utils::Init,
    KernelCfg, KernelTraits, MutexId, TaskId,
};

use super::{private, Ctx, Scheduler};

/// Priority-ceiling scheduling.
///
/// Tasks and mutexes share one array of slots, sorted by priority. A mutex
/// whose ceiling is task `t` is placed right before `t`'s slot. Each slot
/// holds `locked_by: Option<slot index>`:
///
///  - A task slot holds its own index while the task is runnable, `None`
///    while it's blocked.
///  - A mutex slot holds the index of the holder's slot while it's locked,
///    `None` while it's free.
///
/// [`Scheduler::get_next`] scans the slots from the highest priority. A
/// locked mutex's slot stands in for the holder if the holder is runnable,
/// so the holder runs at the mutex's ceiling. A locked mutex whose holder is
/// blocked is skipped, and so is the holder's own slot.
pub struct PriorityCeiling {
    _private: (),
}

impl Init for PriorityCeiling {
    const INIT: Self = Self { _private: () };
}

impl private::Sealed for PriorityCeiling {}

/// An entry of the priority-sorted slot array used by [`PriorityCeiling`].
pub struct SchedSlot<Traits> {
    pub(crate) locked_by: KernelCell<Traits, Option<usize>>,
    pub(crate) owner: KernelCell<Traits, SlotOwner>,
}

impl<Traits> Init for SchedSlot<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        locked_by: Init::INIT,
        owner: KernelCell::new(SlotOwner::Unused),
    };
}

/// The object a slot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotOwner {
    Unused,
    Task(TaskId),
    Mutex(MutexId),
}

pub struct CeilingPerTaskData<Traits> {
    slot: KernelCell<Traits, usize>,
}

impl<Traits> Init for CeilingPerTaskData<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        slot: Init::INIT,
    };
}

pub struct CeilingPerMutexData<Traits> {
    slot: KernelCell<Traits, usize>,
}

impl<Traits> Init for CeilingPerMutexData<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        slot: Init::INIT,
    };
}

/// Lay out the slot array: for each task in priority order, the mutexes whose
/// ceiling is that task, then the task itself. `ceiling(m)` returns the
/// ceiling task index of mutex `m`. `emit` is called once per slot, in slot
/// order.
pub(super) fn layout_slots(
    num_tasks: usize,
    num_mutexes: usize,
    ceiling: impl Fn(usize) -> usize,
    mut emit: impl FnMut(usize, SlotOwner),
) {
    let mut next_slot = 0;
    for task_i in 0..num_tasks {
        for mutex_i in (0..num_mutexes).filter(|&mutex_i| ceiling(mutex_i) == task_i) {
            emit(next_slot, SlotOwner::Mutex(MutexId::new(mutex_i)));
            next_slot += 1;
        }
        emit(next_slot, SlotOwner::Task(TaskId::new(task_i)));
        next_slot += 1;
    }
}

impl<Traits: KernelTraits> Scheduler<Traits> for PriorityCeiling
where
    Traits: KernelCfg<Sched = Self>,
{
    type PerTaskData = CeilingPerTaskData<Traits>;
    type PerMutexData = CeilingPerMutexData<Traits>;

    fn init(&self, mut ctx: Ctx<'_, Traits>) {
        let slots = Traits::sched_slot_pool();
        let tasks = Traits::task_cb_pool();
        let mutexes = Traits::mutex_cb_pool();

        if slots.len() != tasks.len() + mutexes.len() {
            fatal::<Traits>(FatalError::InvalidConfig);
        }

        // Every mutex must have a ceiling that names an existing task
        for mutex_cb in mutexes {
            match mutex_cb.attr.ceiling {
                Some(task) if task.index() < tasks.len() => {}
                _ => fatal::<Traits>(FatalError::InvalidConfig),
            }
        }

        let ceiling = |mutex_i: usize| {
            mutexes[mutex_i]
                .attr
                .ceiling
                .map_or(usize::MAX, |task| task.index())
        };

        let lock = &mut ctx.lock;
        layout_slots(tasks.len(), mutexes.len(), ceiling, |slot_i, owner| {
            let slot = &slots[slot_i];
            slot.owner.replace(&mut **lock, owner);
            slot.locked_by.replace(&mut **lock, None);
            match owner {
                SlotOwner::Task(task) => {
                    tasks[task.index()]
                        .sched_data
                        .slot
                        .replace(&mut **lock, slot_i);
                }
                SlotOwner::Mutex(mutex) => {
                    mutexes[mutex.index()]
                        .sched_data
                        .slot
                        .replace(&mut **lock, slot_i);
                }
                SlotOwner::Unused => {}
            }
        });
    }

    fn set_runnable(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        let slot_i = task.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        Traits::sched_slot_pool()[slot_i]
            .locked_by
            .replace(&mut *ctx.lock, Some(slot_i));
    }

    fn set_blocked(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        let slot_i = task.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        Traits::sched_slot_pool()[slot_i]
            .locked_by
            .replace(&mut *ctx.lock, None);
    }

    fn is_runnable(&self, ctx: Ctx<'_, Traits>, task: TaskId) -> bool {
        let slot_i = task.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        Traits::sched_slot_pool()[slot_i].locked_by.get(&*ctx.lock) == Some(slot_i)
    }

    fn get_next(&self, ctx: Ctx<'_, Traits>) -> Option<TaskId> {
        let slots = Traits::sched_slot_pool();
        for (slot_i, slot) in slots.iter().enumerate() {
            let runnable_task = match slot.locked_by.get(&*ctx.lock) {
                // A blocked task or a free mutex
                None => continue,
                // A runnable task
                Some(locked_by) if locked_by == slot_i => locked_by,
                // A locked mutex. It stands in for its holder only if the
                // holder is runnable.
                Some(holder_slot_i) => {
                    if slots[holder_slot_i].locked_by.get(&*ctx.lock) != Some(holder_slot_i) {
                        continue;
                    }
                    holder_slot_i
                }
            };

            match slots[runnable_task].owner.get(&*ctx.lock) {
                SlotOwner::Task(task) => return Some(task),
                _ => fatal::<Traits>(FatalError::InvariantViolation),
            }
        }
        None
    }

    fn check_lock(&self, ctx: Ctx<'_, Traits>, mutex: MutexId, task: TaskId) {
        let mutex_slot = mutex.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        let task_slot = task.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        if mutex_slot >= task_slot {
            fatal::<Traits>(FatalError::CeilingViolation);
        }
    }

    fn mutex_locked(&self, mut ctx: Ctx<'_, Traits>, mutex: MutexId, task: TaskId) {
        let mutex_slot = mutex.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        let task_slot = task.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        Traits::sched_slot_pool()[mutex_slot]
            .locked_by
            .replace(&mut *ctx.lock, Some(task_slot));
    }

    fn mutex_unlocked(&self, mut ctx: Ctx<'_, Traits>, mutex: MutexId) {
        let mutex_slot = mutex.cb::<Traits>().sched_data.slot.get(&*ctx.lock);
        Traits::sched_slot_pool()[mutex_slot]
            .locked_by
            .replace(&mut *ctx.lock, None);
    }

    fn effective_priority(&self, ctx: Ctx<'_, Traits>, task: TaskId) -> usize {
        Traits::mutex_cb_pool()
            .iter()
            .filter(|mutex_cb| mutex_cb.holder.get(&*ctx.lock) == Some(task))
            .filter_map(|mutex_cb| mutex_cb.attr.ceiling)
            .map(TaskId::index)
            .fold(task.index(), usize::min)
    }
}
