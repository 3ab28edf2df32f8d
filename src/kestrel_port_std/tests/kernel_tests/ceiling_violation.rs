//! Locking a mutex whose ceiling is below the task's priority is a fatal
//! error.
use kestrel_kernel::{sched::PriorityCeiling, FatalError, MutexAttr, TaskAttr};
use kestrel_port_std::Outcome;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: PriorityCeiling,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            TASK_HI = TaskAttr::new(task_hi),
            TASK_LO = TaskAttr::new(task_lo).autostart(false),
        },
        mutexes: {
            MUTEX_HI = MutexAttr::new().ceiling(TASK_HI),
            MUTEX_LO = MutexAttr::new().ceiling(TASK_LO),
        },
        semaphores: {},
        message_queues: {},
        timers: {},
        interrupt_events: {},
    }
}

fn task_hi() {
    System::mutex_lock(MUTEX_HI);
    System::mutex_unlock(MUTEX_HI);

    System::mutex_lock(MUTEX_LO);
    unreachable!();
}

fn task_lo() {
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::CeilingViolation)
    );
}
