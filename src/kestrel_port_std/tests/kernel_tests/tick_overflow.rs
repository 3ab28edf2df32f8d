//! Two ticks arriving before the kernel accounts the first one is a fatal
//! error.
use kestrel_kernel::{sched::StrictPriority, FatalError, PortToKernel, TaskAttr};
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

fn task() {
    kestrel_port_std::simulate_interrupt::<SystemTraits>(|| {
        // Safety: CPU Lock inactive, an interrupt context
        unsafe {
            <SystemTraits as PortToKernel>::timer_tick();
            <SystemTraits as PortToKernel>::timer_tick();
        }
    });
    unreachable!();
}

#[test]
fn run() {
    assert_eq!(
        crate::run::<SystemTraits>(),
        Outcome::Fatal(FatalError::TickOverflow)
    );
}
