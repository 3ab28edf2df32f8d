//! Sleeping and timed waits end only when the task timer fires. Signals
//! delivered meanwhile wake the task without ending the wait, and stay
//! pending until the task receives them.
use kestrel_kernel::{sched::StrictPriority, SemaphoreAttr, SignalSet, TaskAttr, TimerAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

const ALL: SignalSet = SignalSet::MAX;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            SLEEPER = TaskAttr::new(sleeper),
            SENDER = TaskAttr::new(sender),
        },
        mutexes: {},
        semaphores: {
            SEM = SemaphoreAttr::new(),
        },
        message_queues: {},
        timers: {
            NOISE = TimerAttr::new().reload(3).enabled(true).signal(SLEEPER, ALL),
        },
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

fn sleeper() {
    SEQ.expect_and_replace(0, 1);

    // `NOISE` fires at 3, 6 and 9
    System::sleep(10);
    SEQ.expect_and_replace(2, 3);
    assert_eq!(System::timer_current_ticks(), 10);
    assert_eq!(System::signal_peek_set(ALL), ALL);

    // `NOISE` fires at 12
    assert!(!System::sem_wait_timeout(SEM, 4));
    assert_eq!(System::timer_current_ticks(), 14);
    System::timer_disable(NOISE);

    assert_eq!(System::signal_poll_set(ALL), ALL);
    assert_eq!(System::signal_peek_set(ALL), 0);

    crate::success::<SystemTraits>();
}

fn sender() {
    SEQ.expect_and_replace(1, 2);

    // Each of these switches to `sleeper`, which goes back to sleep
    System::signal_send_set(SLEEPER, ALL);
    System::unblock(SLEEPER);

    System::block();
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
