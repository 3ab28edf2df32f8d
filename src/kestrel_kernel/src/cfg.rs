//! Static configuration mechanism for the kernel

/// Configure a kernel instance. This defines the object ids as `pub const`
/// items in the calling module, instantiates the control blocks, and
/// implements [`KernelCfg`] for the system type.
///
/// Every section must be present, but may be empty. Objects are numbered
/// from zero in declaration order. Tasks declared first have higher
/// priorities.
///
/// ```ignore
/// kestrel_kernel::build! {
///     SystemTraits {
///         scheduler: kestrel_kernel::sched::PriorityInheritance,
///         fatal_error: kestrel_port_std::halt::<SystemTraits>,
///         tasks: {
///             TASK_HI = TaskAttr::new(task_hi),
///             TASK_LO = TaskAttr::new(task_lo).stack_size(8192),
///         },
///         mutexes: {
///             MUTEX = MutexAttr::new(),
///         },
///         semaphores: {
///             SEM = SemaphoreAttr::new().initial(1).max(1),
///         },
///         message_queues: {
///             QUEUE = MessageQueueAttr::new(4, 8),
///         },
///         timers: {
///             TIMER = TimerAttr::new().reload(10).signal(TASK_LO, 1),
///         },
///         interrupt_events: {
///             EVENT = InterruptEventAttr::unblock(TASK_HI),
///         },
///     }
/// }
/// ```
///
/// [`KernelCfg`]: crate::KernelCfg
#[macro_export]
macro_rules! build {
    (
        $sys:ty {
            scheduler: $sched:ty,
            fatal_error: $fatal_error:expr,
            tasks: { $( $task:ident = $task_attr:expr ),* $(,)? },
            mutexes: { $( $mutex:ident = $mutex_attr:expr ),* $(,)? },
            semaphores: { $( $semaphore:ident = $semaphore_attr:expr ),* $(,)? },
            message_queues: { $( $queue:ident = $queue_attr:expr ),* $(,)? },
            timers: { $( $timer:ident = $timer_attr:expr ),* $(,)? },
            interrupt_events: { $( $event:ident = $event_attr:expr ),* $(,)? } $(,)?
        }
    ) => {
        $crate::__define_ids!(TaskId; 0; $($task)*);
        $crate::__define_ids!(MutexId; 0; $($mutex)*);
        $crate::__define_ids!(SemaphoreId; 0; $($semaphore)*);
        $crate::__define_ids!(MessageQueueId; 0; $($queue)*);
        $crate::__define_ids!(TimerId; 0; $($timer)*);
        $crate::__define_ids!(InterruptEventId; 0; $($event)*);

        const _: () = {
            // The attribute expressions are evaluated in this scope, so only
            // names they don't use are imported
            use $crate::{
                sched::SchedSlot, utils::Init, KernelCell, KernelCfg, MessageQueueCb, MutexCb,
                SemaphoreCb, State, TaskCb, TimerCb,
            };

            const NUM_TASKS: usize = $crate::__count!($($task)*);
            const NUM_MUTEXES: usize = $crate::__count!($($mutex)*);
            const NUM_SEMAPHORES: usize = $crate::__count!($($semaphore)*);
            const NUM_QUEUES: usize = $crate::__count!($($queue)*);
            const NUM_TIMERS: usize = $crate::__count!($($timer)*);
            const NUM_EVENTS: usize = $crate::__count!($($event)*);
            const QUEUE_BUFFER_LEN: usize = 0 $( + ($queue_attr).buffer_len() )*;

            static KERNEL_STATE: State<$sys> = Init::INIT;

            static TASK_CB_POOL: [TaskCb<$sys>; NUM_TASKS] = [
                $( TaskCb::new($task_attr), )*
            ];

            static MUTEX_CB_POOL: [MutexCb<$sys>; NUM_MUTEXES] = [
                $( MutexCb::new($mutex_attr), )*
            ];

            static SEMAPHORE_CB_POOL: [SemaphoreCb<$sys>; NUM_SEMAPHORES] = [
                $( SemaphoreCb::new($semaphore_attr), )*
            ];

            static MESSAGE_QUEUE_CB_POOL: [MessageQueueCb<$sys>; NUM_QUEUES] = [
                $( MessageQueueCb::new($queue_attr), )*
            ];

            static MESSAGE_QUEUE_BUFFER_POOL: [KernelCell<$sys, u8>; QUEUE_BUFFER_LEN] =
                Init::INIT;

            // User timers first, then one task timer per task
            static TIMER_CB_POOL: [TimerCb<$sys>; NUM_TIMERS + NUM_TASKS] = [
                $( TimerCb::new($timer_attr), )*
                $( TimerCb::task_timer($task), )*
            ];

            static SCHED_SLOT_POOL: [SchedSlot<$sys>; NUM_TASKS + NUM_MUTEXES] = Init::INIT;

            static INTERRUPT_EVENT_ATTR_POOL: [$crate::InterruptEventAttr; NUM_EVENTS] = [
                $( $event_attr, )*
            ];

            // Safety: We are `build!`, so it's okay to `impl` this
            unsafe impl KernelCfg for $sys {
                type Sched = $sched;

                #[inline]
                fn fatal_error(error: $crate::FatalError) -> ! {
                    ($fatal_error)(error)
                }

                #[inline(always)]
                fn state() -> &'static State<Self> {
                    &KERNEL_STATE
                }

                #[inline(always)]
                fn task_cb_pool() -> &'static [TaskCb<Self>] {
                    &TASK_CB_POOL
                }

                #[inline(always)]
                fn mutex_cb_pool() -> &'static [MutexCb<Self>] {
                    &MUTEX_CB_POOL
                }

                #[inline(always)]
                fn semaphore_cb_pool() -> &'static [SemaphoreCb<Self>] {
                    &SEMAPHORE_CB_POOL
                }

                #[inline(always)]
                fn message_queue_cb_pool() -> &'static [MessageQueueCb<Self>] {
                    &MESSAGE_QUEUE_CB_POOL
                }

                #[inline(always)]
                fn message_queue_buffer_pool() -> &'static [KernelCell<Self, u8>] {
                    &MESSAGE_QUEUE_BUFFER_POOL
                }

                #[inline(always)]
                fn timer_cb_pool() -> &'static [TimerCb<Self>] {
                    &TIMER_CB_POOL
                }

                #[inline(always)]
                fn sched_slot_pool() -> &'static [SchedSlot<Self>] {
                    &SCHED_SLOT_POOL
                }

                #[inline(always)]
                fn interrupt_event_attr_pool() -> &'static [$crate::InterruptEventAttr] {
                    &INTERRUPT_EVENT_ATTR_POOL
                }
            }
        };
    };
}
