//! A periodic timer signals a task every period. A period that elapses while
//! the previous signal is still pending sets the overflow flag.
use kestrel_kernel::{sched::StrictPriority, TaskAttr, TimerAttr};
use kestrel_port_std::Outcome;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

const PERIOD: u32 = 5;
const TICK_SIGNAL: u32 = 1;

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
        timers: {
            TIMER = TimerAttr::new()
                .reload(PERIOD)
                .enabled(true)
                .signal(TASK, TICK_SIGNAL),
            IDLE_TIMER = TimerAttr::new().reload(3),
        },
        interrupt_events: {},
    }
}

fn task() {
    assert_eq!(System::timer_current_ticks(), 0);
    assert_eq!(System::timer_remaining(TIMER), PERIOD);
    assert_eq!(System::timer_remaining(IDLE_TIMER), 0);

    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), PERIOD);
    assert!(!System::timer_check_overflow(TIMER));

    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), PERIOD * 2);

    // The timer fires at 15 and 20. The second one finds the first one's
    // signal still pending.
    System::sleep(12);
    assert_eq!(System::timer_current_ticks(), 22);
    assert!(System::timer_check_overflow(TIMER));
    assert!(!System::timer_check_overflow(TIMER));
    assert_eq!(System::signal_poll_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::signal_poll_set(TICK_SIGNAL), 0);
    assert_eq!(System::timer_remaining(TIMER), 3);

    // A new period takes effect at the next expiry
    System::timer_reload_set(TIMER, 2);
    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), 25);
    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), 27);

    System::timer_disable(TIMER);
    assert_eq!(System::timer_remaining(TIMER), 0);

    // A one-shot timer fires once and then disables itself
    System::timer_signal_set(IDLE_TIMER, TASK, TICK_SIGNAL);
    System::timer_oneshot(IDLE_TIMER, 4);
    assert_eq!(System::timer_remaining(IDLE_TIMER), 4);
    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), 31);
    assert_eq!(System::timer_remaining(IDLE_TIMER), 0);

    // `enable` restarts it with its reload value
    System::timer_reload_set(IDLE_TIMER, 3);
    System::timer_enable(IDLE_TIMER);
    assert_eq!(System::signal_wait_set(TICK_SIGNAL), TICK_SIGNAL);
    assert_eq!(System::timer_current_ticks(), 34);
    System::timer_disable(IDLE_TIMER);

    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
