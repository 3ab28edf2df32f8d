//! Two tasks contend for a mutex. The holder keeps it across a sleep, and
//! the other task gets it only after it's released.
use kestrel_kernel::{sched::StrictPriority, MutexAttr, TaskAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK0 = TaskAttr::new(task0),
            TASK1 = TaskAttr::new(task1),
        },
        mutexes: {
            MUTEX = MutexAttr::new(),
        },
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

fn task0() {
    SEQ.expect_and_replace(0, 1);
    System::mutex_lock(MUTEX);
    assert!(System::mutex_holder_is_current(MUTEX));

    // `task1` runs meanwhile and blocks on the mutex
    System::sleep(3);

    SEQ.expect_and_replace(2, 3);
    System::mutex_unlock(MUTEX);
    assert!(!System::mutex_holder_is_current(MUTEX));

    // `task1` is runnable now, but we have a higher priority
    SEQ.expect_and_replace(3, 4);
    System::block();
    unreachable!();
}

fn task1() {
    SEQ.expect_and_replace(1, 2);
    assert_eq!(System::task_current(), TASK1);
    assert!(System::mutex_is_locked(MUTEX));
    assert!(!System::mutex_holder_is_current(MUTEX));
    assert!(!System::mutex_try_lock(MUTEX));

    System::mutex_lock(MUTEX);

    SEQ.expect_and_replace(4, 5);
    assert!(System::mutex_holder_is_current(MUTEX));
    System::mutex_unlock(MUTEX);
    assert!(!System::mutex_is_locked(MUTEX));

    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
