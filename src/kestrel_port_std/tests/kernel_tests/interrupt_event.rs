//! Interrupt handlers wake tasks by raising interrupt events.
use kestrel_kernel::{sched::StrictPriority, InterruptEventAttr, SignalSet, TaskAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

const RX_SIGNAL: SignalSet = 0b10;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            HANDLER = TaskAttr::new(handler),
            BACKGROUND = TaskAttr::new(background),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {
            WAKE = InterruptEventAttr::unblock(HANDLER),
            RX = InterruptEventAttr::signal(HANDLER, RX_SIGNAL),
        },
    }
}

static SEQ: SeqTracker = SeqTracker::new();

fn handler() {
    SEQ.expect_and_replace(0, 1);
    System::block();

    SEQ.expect_and_replace(2, 3);
    assert_eq!(System::signal_wait_set(RX_SIGNAL), RX_SIGNAL);

    SEQ.expect_and_replace(4, 5);
    System::block();

    SEQ.expect_and_replace(6, 7);
    crate::success::<SystemTraits>();
}

fn background() {
    SEQ.expect_and_replace(1, 2);

    // The switch happens on the way out of the interrupt handler
    kestrel_port_std::simulate_interrupt::<SystemTraits>(|| {
        System::interrupt_event_raise(WAKE);
    });

    SEQ.expect_and_replace(3, 4);
    kestrel_port_std::simulate_interrupt::<SystemTraits>(|| {
        System::interrupt_event_raise(RX);
    });

    // Raising an event from a task takes effect immediately
    SEQ.expect_and_replace(5, 6);
    System::interrupt_event_raise(WAKE);
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
