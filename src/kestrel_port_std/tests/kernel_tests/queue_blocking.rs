//! A producer fills a small queue faster than a consumer drains it. Both
//! sides block, and every message arrives intact and in order.
use kestrel_kernel::{sched::StrictPriority, MessageQueueAttr, TaskAttr};
use kestrel_port_std::Outcome;

use crate::Xorshift32;

kestrel_port_std::use_port!(unsafe struct SystemTraits);
type System = kestrel_kernel::System<SystemTraits>;

const SEED: u32 = 0x2545_f491;
const COUNT: usize = 200;

kestrel_kernel::build! {
    SystemTraits {
        scheduler: StrictPriority,
        fatal_error: kestrel_port_std::halt::<SystemTraits>,
        tasks: {
            PRODUCER = TaskAttr::new(producer),
            CONSUMER = TaskAttr::new(consumer),
        },
        mutexes: {},
        semaphores: {},
        message_queues: {
            QUEUE = MessageQueueAttr::new(4, 3),
        },
        timers: {},
        interrupt_events: {},
    }
}

fn producer() {
    let mut rng = Xorshift32(SEED);
    for i in 0..COUNT {
        let message = rng.next().to_le_bytes();
        if i % 7 == 0 {
            // Let the consumer drain the queue
            System::sleep(1);
        }
        System::message_queue_put(QUEUE, &message);
    }
    System::block();
    unreachable!();
}

fn consumer() {
    let mut rng = Xorshift32(SEED);
    let mut buf = [0u8; 4];
    for _ in 0..COUNT {
        System::message_queue_get(QUEUE, &mut buf);
        assert_eq!(u32::from_le_bytes(buf), rng.next());
    }
    assert_eq!(System::message_queue_len(QUEUE), 0);
    crate::success::<SystemTraits>();
}

#[test]
fn run() {
    assert_eq!(crate::run::<SystemTraits>(), Outcome::Complete);
}
