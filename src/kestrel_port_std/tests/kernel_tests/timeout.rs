//! Timed waits give up after exactly the requested number of ticks, and
//! succeed immediately when the object is available.
use kestrel_kernel::{
    sched::StrictPriority, MessageQueueAttr, MutexAttr, SemaphoreAttr, TaskAttr, MAX_TIMEOUT,
};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            WAITER = TaskAttr::new(waiter).autostart(false),
            HOLDER = TaskAttr::new(holder),
        },
        mutexes: {
            HELD = MutexAttr::new(),
            FREE = MutexAttr::new(),
        },
        semaphores: {
            SEM = SemaphoreAttr::new(),
        },
        message_queues: {
            QUEUE = MessageQueueAttr::new(1, 1),
        },
        timers: {},
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

/// Run `f` and return the number of ticks it took.
fn elapsed(f: impl FnOnce()) -> u32 {
    let start = System::timer_current_ticks();
    f();
    System::timer_current_ticks().wrapping_sub(start)
}

fn holder() {
    SEQ.expect_and_replace(0, 1);
    System::mutex_lock(HELD);
    System::task_start(WAITER);

    System::block();
    unreachable!();
}

fn waiter() {
    SEQ.expect_and_replace(1, 2);

    assert_eq!(
        elapsed(|| assert!(!System::mutex_lock_timeout(HELD, 10))),
        10
    );
    assert_eq!(
        elapsed(|| assert!(System::mutex_lock_timeout(FREE, 10))),
        0
    );
    System::mutex_unlock(FREE);

    assert_eq!(elapsed(|| assert!(!System::sem_wait_timeout(SEM, 5))), 5);
    System::sem_post(SEM);
    assert_eq!(elapsed(|| assert!(System::sem_wait_timeout(SEM, 5))), 0);

    let mut buf = [0u8; 1];
    assert_eq!(
        elapsed(|| assert!(!System::message_queue_get_timeout(QUEUE, &mut buf, 7))),
        7
    );
    assert!(System::message_queue_try_put(QUEUE, &[42]));
    assert_eq!(
        elapsed(|| assert!(!System::message_queue_put_timeout(QUEUE, &[43], 3))),
        3
    );
    assert!(System::message_queue_get_timeout(QUEUE, &mut buf, 3));
    assert_eq!(buf, [42]);

    // A timeout doesn't leave a stray wakeup behind
    assert_eq!(elapsed(|| System::sleep(4)), 4);

    // The longest timeout is accepted
    assert!(System::mutex_lock_timeout(FREE, MAX_TIMEOUT));
    System::mutex_unlock(FREE);

    SEQ.expect_and_replace(2, 3);
    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
