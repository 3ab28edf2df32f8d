//! A bounded semaphore counts up to its maximum, and posting beyond it is a
//! fatal error.
use kestrel_kernel::{sched::StrictPriority, FatalError, SemaphoreAttr, TaskAttr};
use kestrel_port_std::Outcome;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

const MAX: u32 = 3;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK = TaskAttr::new(task),
        },
        mutexes: {},
        semaphores: {
            SEM = SemaphoreAttr::new().max(MAX),
        },
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

fn task() {
    assert_eq!(System::sem_value(SEM), 0);
    assert!(!System::sem_try_wait(SEM));

    for i in 0..MAX {
        System::sem_post(SEM);
        assert_eq!(System::sem_value(SEM), i + 1);
    }
    for _ in 0..MAX {
        assert!(System::sem_try_wait(SEM));
    }
    assert!(!System::sem_try_wait(SEM));

    for _ in 0..MAX {
        System::sem_post(SEM);
    }
    assert_eq!(System::sem_value(SEM), MAX);

    // A token is available, so this doesn't block
    System::sem_wait(SEM);
    assert_eq!(System::sem_value(SEM), MAX - 1);
    System::sem_post(SEM);

    System::sem_post(SEM);
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::SemaphoreMaxExceeded)
    );
}
