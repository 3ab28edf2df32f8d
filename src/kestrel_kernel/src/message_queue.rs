//! Message queues
//!
//! A message queue is a fixed-capacity ring of fixed-size messages. The
//! rings of all queues are carved out of one byte pool,
//! [`KernelCfg::message_queue_buffer_pool`], at boot.
use core::{fmt, mem::size_of_val, ops::Range};

use crate::{
    error::{fatal, FatalError},
    klock::{self, KernelCell, KernelTokenRefMut},
    task::{self, WaitObject},
    timer::{self, TicksRelative},
    utils::Init,
    KernelCfg, KernelTraits, TaskId,
};

/// Identifies a message queue.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct MessageQueueId(usize);

impl MessageQueueId {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }

    /// Get the control block of the queue, raising `BadId` if the id is out
    /// of range.
    pub(crate) fn cb<Traits: KernelTraits>(self) -> &'static MessageQueueCb<Traits> {
        match Traits::message_queue_cb_pool().get(self.0) {
            Some(queue_cb) => queue_cb,
            None => fatal::<Traits>(FatalError::BadId),
        }
    }
}

/// The static properties of a message queue.
#[derive(Clone, Copy, Debug)]
pub struct MessageQueueAttr {
    /// The size of every message, in bytes.
    pub element_size: usize,

    /// The capacity, in messages.
    pub queue_length: usize,
}

impl MessageQueueAttr {
    pub const fn new(element_size: usize, queue_length: usize) -> Self {
        Self {
            element_size,
            queue_length,
        }
    }

    /// The number of bytes the queue takes from the buffer pool.
    pub const fn buffer_len(&self) -> usize {
        self.element_size * self.queue_length
    }
}

/// *Message queue control block* - the state data of a message queue.
pub struct MessageQueueCb<Traits: KernelCfg> {
    pub attr: MessageQueueAttr,

    /// The start of the queue's ring in the buffer pool.
    pub(super) offset: KernelCell<Traits, usize>,

    /// The slot of the oldest message.
    pub(crate) head: KernelCell<Traits, usize>,

    /// The number of stored messages.
    pub(crate) available: KernelCell<Traits, usize>,
}

impl<Traits: KernelCfg> MessageQueueCb<Traits> {
    pub const fn new(attr: MessageQueueAttr) -> Self {
        Self {
            attr,
            offset: Init::INIT,
            head: Init::INIT,
            available: Init::INIT,
        }
    }
}

impl<Traits: KernelCfg> fmt::Debug for MessageQueueCb<Traits> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageQueueCb")
            .field("self", &(self as *const _))
            .field("attr", &self.attr)
            .finish_non_exhaustive()
    }
}

/// The position of a ring buffer's occupied region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Ring {
    head: usize,
    available: usize,
    len: usize,
}

impl Ring {
    /// Reserve the slot after the newest message.
    fn push(&mut self) -> Option<usize> {
        if self.available == self.len {
            return None;
        }
        let slot = (self.head + self.available) % self.len;
        self.available += 1;
        Some(slot)
    }

    /// Release the slot of the oldest message.
    fn pop(&mut self) -> Option<usize> {
        if self.available == 0 {
            return None;
        }
        let slot = self.head;
        self.head = (self.head + 1) % self.len;
        self.available -= 1;
        Some(slot)
    }
}

/// Lay out the rings in the buffer pool. Called at boot.
pub(super) fn init<Traits: KernelTraits>(mut lock: KernelTokenRefMut<'_, Traits>) {
    let pool_len = Traits::message_queue_buffer_pool().len();
    let mut offset = 0usize;

    for queue_cb in Traits::message_queue_cb_pool() {
        let attr = queue_cb.attr;
        if attr.element_size == 0 || attr.queue_length == 0 {
            fatal::<Traits>(FatalError::InvalidConfig);
        }

        queue_cb.offset.replace(&mut *lock, offset);

        offset = match attr
            .element_size
            .checked_mul(attr.queue_length)
            .and_then(|len| offset.checked_add(len))
        {
            Some(end) if end <= pool_len => end,
            _ => fatal::<Traits>(FatalError::InvalidConfig),
        };
    }
}

fn ring<Traits: KernelTraits>(
    lock: &KernelTokenRefMut<'_, Traits>,
    queue_cb: &MessageQueueCb<Traits>,
) -> Ring {
    Ring {
        head: queue_cb.head.get(&**lock),
        available: queue_cb.available.get(&**lock),
        len: queue_cb.attr.queue_length,
    }
}

fn set_ring<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    queue_cb: &MessageQueueCb<Traits>,
    ring: Ring,
) {
    queue_cb.head.replace(&mut *lock, ring.head);
    queue_cb.available.replace(&mut *lock, ring.available);
}

/// Get the cells of `slot` and check that `message` can be copied in or out
/// of them.
fn slot_cells<Traits: KernelTraits>(
    lock: &KernelTokenRefMut<'_, Traits>,
    queue_cb: &MessageQueueCb<Traits>,
    slot: usize,
    message: &[u8],
) -> &'static [KernelCell<Traits, u8>] {
    let element_size = queue_cb.attr.element_size;
    let start = queue_cb.offset.get(&**lock) + slot * element_size;
    let cells = &Traits::message_queue_buffer_pool()[start..start + element_size];

    if ranges_overlap(address_range(cells), address_range(message)) {
        fatal::<Traits>(FatalError::MessageBufferOverlap);
    }
    cells
}

fn address_range<T>(x: &[T]) -> Range<usize> {
    let start = x.as_ptr() as usize;
    start..start + size_of_val(x)
}

fn ranges_overlap(a: Range<usize>, b: Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

fn expect_message_size<Traits: KernelTraits>(queue: MessageQueueId, message: &[u8]) {
    if message.len() != queue.cb::<Traits>().attr.element_size {
        fatal::<Traits>(FatalError::MessageSizeMismatch);
    }
}

fn try_put_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    queue: MessageQueueId,
    message: &[u8],
) -> bool {
    let queue_cb = queue.cb::<Traits>();
    let mut ring = ring(&lock, queue_cb);
    let Some(slot) = ring.push() else {
        return false;
    };

    let cells = slot_cells(&lock, queue_cb, slot, message);
    for (cell, &byte) in cells.iter().zip(message) {
        cell.replace(&mut *lock, byte);
    }
    set_ring(lock.borrow_mut(), queue_cb, ring);

    // Getters block only on an empty queue
    if ring.available == 1 {
        task::wake_waiters::<Traits>(lock, WaitObject::MessageQueue(queue));
    }
    true
}

fn try_get_inner<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    queue: MessageQueueId,
    message: &mut [u8],
) -> bool {
    let queue_cb = queue.cb::<Traits>();
    let mut ring = ring(&lock, queue_cb);
    let Some(slot) = ring.pop() else {
        return false;
    };

    let cells = slot_cells(&lock, queue_cb, slot, message);
    for (cell, byte) in cells.iter().zip(message.iter_mut()) {
        *byte = cell.get(&*lock);
    }
    set_ring(lock.borrow_mut(), queue_cb, ring);

    // Putters block only on a full queue
    if ring.available == ring.len - 1 {
        task::wake_waiters::<Traits>(lock, WaitObject::MessageQueue(queue));
    }
    true
}

/// Block until the queue changes or, if `timeout` is given, the timeout
/// elapses.
fn wait_for_change<Traits: KernelTraits>(
    mut lock: KernelTokenRefMut<'_, Traits>,
    queue: MessageQueueId,
    task: TaskId,
    timeout: Option<TicksRelative>,
) {
    task::set_wait::<Traits>(lock.borrow_mut(), task, Some(WaitObject::MessageQueue(queue)));

    match timeout {
        Some(timeout) => task::block_current_timeout::<Traits>(lock.borrow_mut(), timeout),
        None => task::block_current::<Traits>(lock.borrow_mut()),
    }

    task::set_wait::<Traits>(lock, task, None);
}

pub(super) fn put<Traits: KernelTraits>(queue: MessageQueueId, message: &[u8]) {
    expect_message_size::<Traits>(queue, message);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    while !try_put_inner::<Traits>(lock.borrow_mut(), queue, message) {
        wait_for_change::<Traits>(lock.borrow_mut(), queue, current, None);
    }
}

pub(super) fn try_put<Traits: KernelTraits>(queue: MessageQueueId, message: &[u8]) -> bool {
    expect_message_size::<Traits>(queue, message);
    let mut lock = klock::lock_preempt::<Traits>();
    let stored = try_put_inner::<Traits>(lock.borrow_mut(), queue, message);
    stored
}

pub(super) fn put_timeout<Traits: KernelTraits>(
    queue: MessageQueueId,
    message: &[u8],
    timeout: TicksRelative,
) -> bool {
    expect_message_size::<Traits>(queue, message);
    timer::expect_valid_timeout::<Traits>(timeout);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    let deadline = timer::deadline::<Traits>(lock.borrow_mut(), timeout);
    loop {
        if try_put_inner::<Traits>(lock.borrow_mut(), queue, message) {
            return true;
        }
        let Some(remaining) = timer::remaining_until::<Traits>(lock.borrow_mut(), deadline) else {
            return false;
        };
        wait_for_change::<Traits>(lock.borrow_mut(), queue, current, Some(remaining));
    }
}

pub(super) fn get<Traits: KernelTraits>(queue: MessageQueueId, message: &mut [u8]) {
    expect_message_size::<Traits>(queue, message);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    while !try_get_inner::<Traits>(lock.borrow_mut(), queue, message) {
        wait_for_change::<Traits>(lock.borrow_mut(), queue, current, None);
    }
}

pub(super) fn try_get<Traits: KernelTraits>(queue: MessageQueueId, message: &mut [u8]) -> bool {
    expect_message_size::<Traits>(queue, message);
    let mut lock = klock::lock_preempt::<Traits>();
    let taken = try_get_inner::<Traits>(lock.borrow_mut(), queue, message);
    taken
}

pub(super) fn get_timeout<Traits: KernelTraits>(
    queue: MessageQueueId,
    message: &mut [u8],
    timeout: TicksRelative,
) -> bool {
    expect_message_size::<Traits>(queue, message);
    timer::expect_valid_timeout::<Traits>(timeout);
    let mut lock = klock::lock_preempt::<Traits>();
    let current = task::current_in::<Traits>(&lock.borrow_mut());

    let deadline = timer::deadline::<Traits>(lock.borrow_mut(), timeout);
    loop {
        if try_get_inner::<Traits>(lock.borrow_mut(), queue, message) {
            return true;
        }
        let Some(remaining) = timer::remaining_until::<Traits>(lock.borrow_mut(), deadline) else {
            return false;
        };
        wait_for_change::<Traits>(lock.borrow_mut(), queue, current, Some(remaining));
    }
}

pub(super) fn len<Traits: KernelTraits>(queue: MessageQueueId) -> usize {
    let lock = klock::lock_preempt::<Traits>();
    let available = queue.cb::<Traits>().available.get(&*lock);
    available
}
