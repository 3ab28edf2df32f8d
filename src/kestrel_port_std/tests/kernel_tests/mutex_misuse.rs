//! Misusing a mutex is a fatal error.

/// Locking a mutex the current task already holds.
mod relock {
    use kestrel_kernel::{sched::StrictPriority, FatalError, MutexAttr, TaskAttr};
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
            mutexes: {
                MUTEX = MutexAttr::new(),
            },
            semaphores: {},
            message_queues: {},
            timers: {},
            interrupt_events: {},
        }
    }

    fn task() {
        System::mutex_lock(MUTEX);

        // Non-blocking attempts just fail
        assert!(!System::mutex_try_lock(MUTEX));

        System::mutex_lock(MUTEX);
        unreachable!();
    }

    #[test]
    fn run() {
        assert_eq!(
            crate::run::<SystemTraits>(),
            Outcome::Fatal(FatalError::MutexDeadlock)
        );
    }
}

/// Unlocking a mutex held by another task.
mod not_owner {
    use kestrel_kernel::{sched::StrictPriority, FatalError, MutexAttr, TaskAttr};
    use kestrel_port_std::Outcome;

    kestrel_port_std::use_port!(unsafe struct SystemTraits);
    type System = kestrel_kernel::System<SystemTraits>;

    kestrel_kernel::build! {
        SystemTraits {
            scheduler: StrictPriority,
            fatal_error: kestrel_port_std::halt::<SystemTraits>,
            tasks: {
                TASK0 = TaskAttr::new(task0),
                TASK1 = TaskAttr::new(task1),
            },
            mutexes: {
                MUTEX = MutexAttr::new(),
            },
            semaphores: {},
            message_queues: {},
            timers: {},
            interrupt_events: {},
        }
    }

    fn task0() {
        System::mutex_lock(MUTEX);
        System::block();
        unreachable!();
    }

    fn task1() {
        assert!(System::mutex_is_locked(MUTEX));
        System::mutex_unlock(MUTEX);
        unreachable!();
    }

    #[test]
    fn run() {
        assert_eq!(
            crate::run::<SystemTraits>(),
            Outcome::Fatal(FatalError::MutexNotOwner)
        );
    }
}
