//! Task-facing operations called by an interrupt handler are a fatal error.
use kestrel_kernel::{sched::StrictPriority, FatalError, SemaphoreAttr, TaskAttr};
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
        semaphores: {
            SEM = SemaphoreAttr::new(),
        },
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

fn task() {
    System::sem_post(SEM);
    assert_eq!(System::sem_value(SEM), 1);

    kestrel_port_std::simulate_interrupt::<SystemTraits>(|| {
        System::sem_post(SEM);
    });
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::BadContext)
    );
}
