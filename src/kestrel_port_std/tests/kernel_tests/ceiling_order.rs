//! A task holding a mutex runs at the mutex's ceiling. Tasks below the
//! ceiling wait until it's released, and then run in priority order.
use kestrel_kernel::{sched::PriorityCeiling, MutexAttr, TaskAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: PriorityCeiling,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK_HI = TaskAttr::new(task_hi).autostart(false),
            TASK_MID = TaskAttr::new(task_mid).autostart(false),
            TASK_LO = TaskAttr::new(task_lo),
        },
        mutexes: {
            MUTEX = MutexAttr::new().ceiling(TASK_HI),
        },
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

fn task_hi() {
    SEQ.expect_and_replace(2, 3);
    assert!(!System::mutex_is_locked(MUTEX));
    System::block();
    unreachable!();
}

fn task_mid() {
    SEQ.expect_and_replace(3, 4);
    System::block();
    unreachable!();
}

fn task_lo() {
    SEQ.expect_and_replace(0, 1);
    assert_eq!(System::task_effective_priority(TASK_LO), 2);

    System::mutex_lock(MUTEX);
    assert_eq!(System::task_effective_priority(TASK_LO), 0);

    // Neither preempts us while we hold the mutex
    System::task_start(TASK_HI);
    System::task_start(TASK_MID);
    System::yield_now();

    SEQ.expect_and_replace(1, 2);
    System::mutex_unlock(MUTEX);

    // `task_hi` and then `task_mid` ran and blocked
    SEQ.expect_and_replace(4, 5);
    assert_eq!(System::task_effective_priority(TASK_LO), 2);

    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
