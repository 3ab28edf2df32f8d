//! A message must have exactly the queue's element size.
use kestrel_kernel::{sched::StrictPriority, FatalError, MessageQueueAttr, TaskAttr};
use kestrel_port_std::Outcome;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK = TaskAttr::new(task),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {
            QUEUE = MessageQueueAttr::new(4, 2),
        },
        timers: {},
        interrupt_events: {},
    }
}

fn task() {
    assert!(System::message_queue_try_put(QUEUE, &[1, 2, 3, 4]));
    System::message_queue_try_put(QUEUE, &[1, 2, 3]);
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::MessageSizeMismatch)
    );
}
