//! Returning from a task's entry point is a fatal error.
use kestrel_kernel::{sched::StrictPriority, FatalError, TaskAttr};
use kestrel_port_std::Outcome;

kestrel_port_std::use_port!(unsafe struct SystemTraits);

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK = TaskAttr::new(task),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

fn task() {}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::TaskReturned)
    );
}
