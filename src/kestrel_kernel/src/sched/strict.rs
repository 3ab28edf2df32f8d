use crate::{klock::KernelCell, utils::Init, KernelTraits, TaskId};

use super::{private, Ctx, Scheduler};

/// Strict fixed-priority scheduling: the runnable task with the lowest id
/// runs.
pub struct StrictPriority {
    _private: (),
}

impl Init for StrictPriority {
    const INIT: Self = Self { _private: () };
}

impl private::Sealed for StrictPriority {}

pub struct StrictPerTaskData<Traits> {
    runnable: KernelCell<Traits, bool>,
}

impl<Traits> Init for StrictPerTaskData<Traits> {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        runnable: Init::INIT,
    };
}

impl<Traits: KernelTraits> Scheduler<Traits> for StrictPriority
where
    Traits: crate::KernelCfg<Sched = Self>,
{
    type PerTaskData = StrictPerTaskData<Traits>;
    type PerMutexData = ();

    fn init(&self, _ctx: Ctx<'_, Traits>) {}

    fn set_runnable(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        task.cb::<Traits>()
            .sched_data
            .runnable
            .replace(&mut *ctx.lock, true);
    }

    fn set_blocked(&self, mut ctx: Ctx<'_, Traits>, task: TaskId) {
        task.cb::<Traits>()
            .sched_data
            .runnable
            .replace(&mut *ctx.lock, false);
    }

    fn is_runnable(&self, ctx: Ctx<'_, Traits>, task: TaskId) -> bool {
        task.cb::<Traits>().sched_data.runnable.get(&*ctx.lock)
    }

    fn get_next(&self, ctx: Ctx<'_, Traits>) -> Option<TaskId> {
        Traits::task_cb_pool()
            .iter()
            .position(|task_cb| task_cb.sched_data.runnable.get(&*ctx.lock))
            .map(TaskId::new)
    }
}
