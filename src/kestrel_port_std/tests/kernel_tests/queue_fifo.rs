//! Messages come out of a queue in the order they went in, and a full queue
//! rejects non-blocking puts.
use kestrel_kernel::{sched::StrictPriority, MessageQueueAttr, TaskAttr};
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
            QUEUE = MessageQueueAttr::new(4, 3),
            // Shares the buffer pool with `QUEUE`
            OTHER = MessageQueueAttr::new(2, 2),
        },
        timers: {},
        interrupt_events: {},
    }
}

fn get(queue: kestrel_kernel::MessageQueueId, message: &mut [u8]) -> bool {
    System::message_queue_try_get(queue, message)
}

fn task() {
    let mut buf = [0u8; 4];
    assert_eq!(System::message_queue_len(QUEUE), 0);
    assert!(!get(QUEUE, &mut buf));

    assert!(System::message_queue_try_put(QUEUE, b"aaaa"));
    assert!(System::message_queue_try_put(QUEUE, b"bbbb"));
    assert!(System::message_queue_try_put(OTHER, b"xy"));
    assert!(System::message_queue_try_put(QUEUE, b"cccc"));
    assert!(!System::message_queue_try_put(QUEUE, b"dddd"));
    assert_eq!(System::message_queue_len(QUEUE), 3);

    assert!(get(QUEUE, &mut buf));
    assert_eq!(&buf, b"aaaa");

    // Wraps around the end of the ring
    System::message_queue_put(QUEUE, b"dddd");
    assert_eq!(System::message_queue_len(QUEUE), 3);

    for expected in [b"bbbb", b"cccc", b"dddd"] {
        System::message_queue_get(QUEUE, &mut buf);
        assert_eq!(&buf, expected);
    }
    assert!(!get(QUEUE, &mut buf));
    assert!(!System::message_queue_get_timeout(QUEUE, &mut buf, 0));

    // Untouched by the traffic on `QUEUE`
    let mut small = [0u8; 2];
    assert_eq!(System::message_queue_len(OTHER), 1);
    assert!(get(OTHER, &mut small));
    assert_eq!(&small, b"xy");

    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
