//! A task waiting for signals wakes up only for the ones it waits for. The
//! others stay pending.
use kestrel_kernel::{sched::StrictPriority, SignalSet, TaskAttr};
use kestrel_port_std::Outcome;

use crate::SeqTracker;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            RECEIVER = TaskAttr::new(receiver),
            SENDER = TaskAttr::new(sender),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

static SEQ: SeqTracker = SeqTracker::new();

const A: SignalSet = 0b001;
const B: SignalSet = 0b010;
const C: SignalSet = 0b100;

fn receiver() {
    SEQ.expect_and_replace(0, 1);
    assert_eq!(System::signal_poll_set(A | B | C), 0);

    assert_eq!(System::signal_wait_set(B | C), C);
    SEQ.expect_and_replace(2, 3);

    // `A` arrived first but wasn't consumed
    assert_eq!(System::signal_peek_set(!0), A);
    assert_eq!(System::signal_peek_set(B), 0);
    assert_eq!(System::signal_poll_set(A | B), A);
    assert_eq!(System::signal_peek_set(!0), 0);

    // Already pending, so this doesn't block
    System::signal_send_set(RECEIVER, B | C);
    assert_eq!(System::signal_wait_set(B), B);
    assert_eq!(System::signal_wait_set(A | C), C);

    SEQ.expect_and_replace(3, 4);
    crate::success::<SystemTraits>();
}

fn sender() {
    SEQ.expect_and_replace(1, 2);
    System::signal_send_set(RECEIVER, A);

    // `receiver` checked its signals and went back to waiting
    System::signal_send_set(RECEIVER, C);
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
