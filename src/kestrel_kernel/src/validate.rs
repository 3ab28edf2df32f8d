//! Internal consistency checks, compiled in by the `validate` feature
use crate::{
    error::{fatal, FatalError},
    klock::KernelTokenRefMut,
    task::WaitObject,
    KernelTraits, TaskId,
};

/// Raise `InvariantViolation` if the kernel state is inconsistent.
pub(super) fn check<Traits: KernelTraits>(lock: KernelTokenRefMut<'_, Traits>) {
    if !is_consistent::<Traits>(&lock) {
        fatal::<Traits>(FatalError::InvariantViolation);
    }
}

fn is_consistent<Traits: KernelTraits>(lock: &KernelTokenRefMut<'_, Traits>) -> bool {
    // No task waits for a mutex it holds
    let tasks_ok = Traits::task_cb_pool()
        .iter()
        .enumerate()
        .all(|(task_i, task_cb)| match task_cb.wait.get(&**lock) {
            Some(WaitObject::Mutex(mutex)) => {
                mutex.cb::<Traits>().holder.get(&**lock) != Some(TaskId::new(task_i))
            }
            _ => true,
        });

    let semaphores_ok = Traits::semaphore_cb_pool().iter().all(|semaphore_cb| {
        match semaphore_cb.max.get(&**lock) {
            Some(max) => semaphore_cb.value.get(&**lock) <= max,
            None => true,
        }
    });

    let queues_ok = Traits::message_queue_cb_pool().iter().all(|queue_cb| {
        let len = queue_cb.attr.queue_length;
        queue_cb.head.get(&**lock) < len && queue_cb.available.get(&**lock) <= len
    });

    tasks_ok && semaphores_ok && queues_ok
}
