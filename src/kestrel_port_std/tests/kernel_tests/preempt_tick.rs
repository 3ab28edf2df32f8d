//! A timer tick delivered while a task is running preempts it if a
//! higher-priority task's sleep ends.
use kestrel_kernel::{sched::StrictPriority, TaskAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            SLEEPER = TaskAttr::new(sleeper),
            BUSY = TaskAttr::new(busy),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

fn sleeper() {
    SEQ.expect_and_replace(0, 1);
    System::sleep(2);

    SEQ.expect_and_replace(2, 3);
    assert_eq!(System::timer_current_ticks(), 2);
    System::block();
    unreachable!();
}

fn busy() {
    SEQ.expect_and_replace(1, 2);

    // The busy task never blocks, so the ticks have to come from interrupts
    kestrel_port_std::pend_tick::<SystemTraits>();
    assert_eq!(SEQ.get(), 2);
    assert_eq!(System::timer_current_ticks(), 1);

    kestrel_port_std::pend_tick::<SystemTraits>();

    SEQ.expect_and_replace(3, 4);
    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
