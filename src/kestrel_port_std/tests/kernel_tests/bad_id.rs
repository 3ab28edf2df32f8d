//! An object id that doesn't refer to a configured object is a fatal error.

/// A semaphore id past the end of the semaphore table.
mod semaphore {
    use kestrel_kernel::{sched::StrictPriority, FatalError, SemaphoreAttr, SemaphoreId, TaskAttr};
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
        System::sem_post(SemaphoreId::new(SEM.index() + 1));
        unreachable!();
    }

    #[test]
    fn run() {
        assert_eq!(
            crate::run::<SystemTraits>(),
            Outcome::Fatal(FatalError::BadId)
        );
    }
}

/// A task id past the end of the task table.
mod task {
    use kestrel_kernel::{sched::PriorityInheritance, FatalError, TaskAttr, TaskId};
    use kestrel_port_std::Outcome;

    kestrel_port_std::use_port!(unsafe struct SystemTraits);
    type System = kestrel_kernel::System<SystemTraits>;

    kestrel_kernel::build! {
        SystemTraits {
            scheduler: PriorityInheritance,
            fatal_error: kestrel_port_std::halt::<SystemTraits>,
            tasks: {
                TASK0 = TaskAttr::new(task0),
                TASK1 = TaskAttr::new(task1).autostart(false),
            },
            mutexes: {},
            semaphores: {},
            message_queues: {},
            timers: {},
            interrupt_events: {},
        }
    }

    fn task0() {
        assert_eq!(System::task_effective_priority(TASK1), 1);
        System::signal_send_set(TaskId::new(2), 1);
        unreachable!();
    }

    fn task1() {
        unreachable!();
    }

    #[test]
    fn run() {
        assert_eq!(
            crate::run::<SystemTraits>(),
            Outcome::Fatal(FatalError::BadId)
        );
    }
}
