//! Bounded blocking ring buffer
//!
//! The channel between one connected output endpoint and one input endpoint.
//! A [`RingBuffer`] is bound to one element type and one capacity for its
//! whole lifetime. Internally it keeps `capacity + 1` slots: one slot is
//! always left unused, so "full" and "empty" are told apart from the two
//! cursors alone, without a separate counter.
//!
//! All mutation happens under one mutex; producers wait on `not_full`,
//! consumers on `not_empty`, and every mutation wakes the opposite side.
//!
//! ## Bulk transfer
//!
//! [`RingBuffer::push_many`] and [`RingBuffer::pop_many`] move as many
//! elements as fit in one wrap-free run of slots, then keep going with the
//! rest. The first run honours the caller's timeout; how long the remainder
//! may wait is the buffer's [`RemainderWait`] policy. Vector (frame) elements
//! move at most one per bulk call and never continue.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use tracing::trace;

use super::attribute::{AttributeSet, WeakAttributeSet};
use super::timeout::{Deadline, Timeout};
use super::types::{Element, ElementType};

/// How long the remainder of a bulk transfer may wait once the first run of
/// elements went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderWait {
    /// The remainder waits without bound (until transferred or interrupted).
    Forever,
    /// The remainder shares the caller's original deadline.
    #[default]
    Deadline,
}

/// Which side of a buffer an endpoint attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Producer,
    Consumer,
}

struct RingState<T> {
    slots: Vec<Option<T>>,
    read: usize,
    write: usize,
    /// Bumped to make in-flight producer waits give up.
    producer_epoch: u64,
    /// Bumped to make in-flight consumer waits give up.
    consumer_epoch: u64,
    producers: usize,
    consumers: usize,
    producer_attributes: Option<WeakAttributeSet>,
}

impl<T> RingState<T> {
    fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn used(&self) -> usize {
        (self.write + self.slot_count() - self.read) % self.slot_count()
    }

    fn is_empty(&self) -> bool {
        self.read == self.write
    }

    fn is_full(&self) -> bool {
        (self.write + 1) % self.slot_count() == self.read
    }

    /// Free slots reachable from the write cursor without wrapping.
    fn free_run(&self) -> usize {
        if self.write >= self.read {
            let run = self.slot_count() - self.write;
            if self.read == 0 { run - 1 } else { run }
        } else {
            self.read - self.write - 1
        }
    }

    /// Occupied slots reachable from the read cursor without wrapping.
    fn used_run(&self) -> usize {
        if self.write >= self.read {
            self.write - self.read
        } else {
            self.slot_count() - self.read
        }
    }

    fn put(&mut self, value: T) {
        self.slots[self.write] = Some(value);
        self.write = (self.write + 1) % self.slot_count();
    }

    fn take(&mut self) -> Option<T> {
        let value = self.slots[self.read].take();
        self.read = (self.read + 1) % self.slot_count();
        value
    }

    fn epoch(&self, side: Side) -> u64 {
        match side {
            Side::Producer => self.producer_epoch,
            Side::Consumer => self.consumer_epoch,
        }
    }
}

/// Fixed-capacity FIFO of one element type with blocking, timed access.
pub struct RingBuffer<T> {
    state: Mutex<RingState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    remainder: RemainderWait,
}

impl<T: Element> RingBuffer<T> {
    /// Create a buffer holding up to `capacity` elements.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_remainder_wait(capacity, RemainderWait::default())
    }

    pub fn with_remainder_wait(capacity: usize, remainder: RemainderWait) -> Self {
        assert!(capacity >= 1, "ring buffer capacity must be at least 1");
        let slots = (0..=capacity).map(|_| None).collect();
        Self {
            state: Mutex::new(RingState {
                slots,
                read: 0,
                write: 0,
                producer_epoch: 0,
                consumer_epoch: 0,
                producers: 0,
                consumers: 0,
                producer_attributes: None,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            remainder,
        }
    }

    /// A fresh, empty buffer with this buffer's characteristics.
    pub fn sibling(&self) -> Arc<Self> {
        Arc::new(Self::with_remainder_wait(self.capacity, self.remainder))
    }

    pub fn element_type(&self) -> ElementType {
        T::TYPE
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remainder_wait(&self) -> RemainderWait {
        self.remainder
    }

    pub fn used(&self) -> usize {
        self.state.lock().used()
    }

    pub fn free(&self) -> usize {
        self.capacity - self.used()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().is_full()
    }

    /// Append one element, waiting for a free slot.
    ///
    /// On timeout or interruption the element is handed back.
    pub fn push(&self, value: T, timeout: Timeout) -> Result<(), T> {
        self.push_from(self.epoch(Side::Producer), value, timeout)
    }

    /// Remove the oldest element, waiting for one to arrive.
    pub fn pop(&self, timeout: Timeout) -> Option<T> {
        self.pop_from(self.epoch(Side::Consumer), timeout)
    }

    /// Append a run of elements; returns how many were accepted.
    pub fn push_many(&self, items: &[T], timeout: Timeout) -> usize {
        self.push_many_from(self.epoch(Side::Producer), items, timeout)
    }

    /// Remove up to `max` elements into `out`; returns how many were moved.
    pub fn pop_many(&self, out: &mut Vec<T>, max: usize, timeout: Timeout) -> usize {
        self.pop_many_from(self.epoch(Side::Consumer), out, max, timeout)
    }

    /// Current interruption epoch of one side. The `*_from` calls fail as
    /// soon as the side's epoch moves past the one they were given.
    pub(crate) fn epoch(&self, side: Side) -> u64 {
        self.state.lock().epoch(side)
    }

    pub(crate) fn push_from(&self, epoch: u64, value: T, timeout: Timeout) -> Result<(), T> {
        let mut state = self.state.lock();
        if !self.wait_for_space(&mut state, epoch, timeout.deadline()) {
            return Err(value);
        }
        state.put(value);
        self.not_empty.notify_all();
        Ok(())
    }

    pub(crate) fn pop_from(&self, epoch: u64, timeout: Timeout) -> Option<T> {
        let mut state = self.state.lock();
        if !self.wait_for_data(&mut state, epoch, timeout.deadline()) {
            return None;
        }
        let value = state.take();
        self.not_full.notify_all();
        value
    }

    pub(crate) fn push_many_from(&self, epoch: u64, items: &[T], timeout: Timeout) -> usize {
        let original = timeout.deadline();
        let mut deadline = original;
        let mut done = 0;
        let mut state = self.state.lock();

        while done < items.len() {
            if !self.wait_for_space(&mut state, epoch, deadline) {
                break;
            }
            let mut run = state.free_run().min(items.len() - done);
            if T::TYPE.is_vector() {
                run = run.min(1);
            }
            for item in &items[done..done + run] {
                state.put(item.clone());
            }
            done += run;
            self.not_empty.notify_all();

            if T::TYPE.is_vector() {
                break;
            }
            deadline = self.remainder_deadline(original);
        }

        if done < items.len() {
            trace!("push_many: accepted {} of {}", done, items.len());
        }
        done
    }

    pub(crate) fn pop_many_from(
        &self,
        epoch: u64,
        out: &mut Vec<T>,
        max: usize,
        timeout: Timeout,
    ) -> usize {
        let original = timeout.deadline();
        let mut deadline = original;
        let mut done = 0;
        let mut state = self.state.lock();

        while done < max {
            if !self.wait_for_data(&mut state, epoch, deadline) {
                break;
            }
            let mut run = state.used_run().min(max - done);
            if T::TYPE.is_vector() {
                run = run.min(1);
            }
            out.extend((0..run).filter_map(|_| state.take()));
            done += run;
            self.not_full.notify_all();

            if T::TYPE.is_vector() {
                break;
            }
            deadline = self.remainder_deadline(original);
        }
        done
    }

    /// Drop every queued element.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        while !state.is_empty() {
            state.take();
        }
        self.not_full.notify_all();
    }

    /// Wake every waiter on one side and make its in-flight call fail.
    pub fn interrupt(&self, side: Side) {
        let mut state = self.state.lock();
        self.interrupt_locked(&mut state, side);
    }

    /// Record an endpoint attaching to one side. A producer may hand over
    /// its attribute set so consumers can cascade to it.
    pub fn attach(&self, side: Side, attributes: Option<&AttributeSet>) {
        let mut state = self.state.lock();
        match side {
            Side::Producer => {
                state.producers += 1;
                state.producer_attributes = attributes.map(AttributeSet::downgrade);
            }
            Side::Consumer => state.consumers += 1,
        }
    }

    /// Record an endpoint detaching from one side; its waiters are woken.
    pub fn detach(&self, side: Side) {
        let mut state = self.state.lock();
        match side {
            Side::Producer => {
                state.producers = state.producers.saturating_sub(1);
                if state.producers == 0 {
                    state.producer_attributes = None;
                }
            }
            Side::Consumer => state.consumers = state.consumers.saturating_sub(1),
        }
        self.interrupt_locked(&mut state, side);
    }

    pub fn producers(&self) -> usize {
        self.state.lock().producers
    }

    pub fn consumers(&self) -> usize {
        self.state.lock().consumers
    }

    /// Attribute set of the attached producer, if it is still alive.
    pub fn producer_attributes(&self) -> Option<AttributeSet> {
        self.state
            .lock()
            .producer_attributes
            .as_ref()
            .and_then(WeakAttributeSet::upgrade)
    }

    fn interrupt_locked(&self, state: &mut RingState<T>, side: Side) {
        match side {
            Side::Producer => {
                state.producer_epoch += 1;
                self.not_full.notify_all();
            }
            Side::Consumer => {
                state.consumer_epoch += 1;
                self.not_empty.notify_all();
            }
        }
    }

    fn remainder_deadline(&self, original: Deadline) -> Deadline {
        match self.remainder {
            RemainderWait::Forever => Deadline::Never,
            RemainderWait::Deadline => original,
        }
    }

    fn wait_for_space(
        &self,
        state: &mut MutexGuard<'_, RingState<T>>,
        epoch: u64,
        deadline: Deadline,
    ) -> bool {
        loop {
            if state.epoch(Side::Producer) != epoch {
                return false;
            }
            if !state.is_full() {
                return true;
            }
            if !deadline.wait(&self.not_full, state) {
                return state.epoch(Side::Producer) == epoch && !state.is_full();
            }
        }
    }

    fn wait_for_data(
        &self,
        state: &mut MutexGuard<'_, RingState<T>>,
        epoch: u64,
        deadline: Deadline,
    ) -> bool {
        loop {
            if state.epoch(Side::Consumer) != epoch {
                return false;
            }
            if !state.is_empty() {
                return true;
            }
            if !deadline.wait(&self.not_empty, state) {
                return state.epoch(Side::Consumer) == epoch && !state.is_empty();
            }
        }
    }
}

impl<T> std::fmt::Debug for RingBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("used", &state.used())
            .field("remainder", &self.remainder)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frame::Frame;
    use crate::runtime::types::{Event, Stereo};
    use num_complex::{Complex32, Complex64};
    use proptest::prelude::*;
    use std::fmt::Debug;
    use std::thread;
    use std::time::{Duration, Instant};

    fn round_trip<T: Element + PartialEq + Debug>(values: Vec<T>) {
        let buffer = RingBuffer::<T>::new(values.len());
        for v in &values {
            buffer.push(v.clone(), Timeout::ZERO).unwrap();
        }
        let popped: Vec<T> = (0..values.len())
            .map(|_| buffer.pop(Timeout::ZERO).unwrap())
            .collect();
        assert_eq!(popped, values);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_round_trip_every_scalar_type() {
        round_trip(vec![true, false, true]);
        round_trip(vec![0u8, 127, 255]);
        round_trip(vec![i16::MIN, 0, i16::MAX]);
        round_trip(vec![-1i32, 2, -3, 4]);
        round_trip(vec![i64::MIN, i64::MAX]);
        round_trip(vec![0.5f32, -0.25]);
        round_trip(vec![1e300f64, -1e-300]);
        round_trip(vec![Complex32::new(1.0, -1.0), Complex32::new(0.0, 2.0)]);
        round_trip(vec![Complex64::new(3.0, 4.0)]);
        round_trip(vec![Stereo::new(0.1, 0.2), Stereo::new(-0.1, -0.2)]);
        round_trip(vec!["alpha".to_string(), "beta".to_string()]);
        round_trip(vec![Event, Event]);
    }

    #[test]
    fn test_round_trip_frames() {
        let frames = vec![
            Frame::from_vec(vec![1.0f32, 2.0]),
            Frame::from_vec(vec![3.0f32]),
        ];
        round_trip(frames);
    }

    #[test]
    fn test_capacity_bound_and_full_push_fails() {
        for capacity in 1..6 {
            let buffer = RingBuffer::<i32>::new(capacity);
            for i in 0..capacity {
                assert!(buffer.push(i as i32, Timeout::ZERO).is_ok());
                assert!(buffer.used() <= capacity);
            }
            assert!(buffer.is_full());
            assert_eq!(buffer.used(), capacity);
            assert_eq!(buffer.push(99, Timeout::ZERO), Err(99));
            assert_eq!(buffer.used(), capacity);
        }
    }

    #[test]
    fn test_pop_times_out_on_empty() {
        let buffer = RingBuffer::<i32>::new(4);
        let start = Instant::now();
        assert_eq!(buffer.pop(Timeout::from_millis(30)), None);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_push_blocks_until_pop() {
        let buffer = Arc::new(RingBuffer::<i32>::new(1));
        buffer.push(1, Timeout::ZERO).unwrap();

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push(2, Timeout::Infinite))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished(), "push must block while full");

        assert_eq!(buffer.pop(Timeout::ZERO), Some(1));
        assert!(producer.join().unwrap().is_ok());
        assert_eq!(buffer.pop(Timeout::ZERO), Some(2));
    }

    #[test]
    fn test_bulk_transfer_across_wraparound() {
        let buffer = RingBuffer::<i32>::with_remainder_wait(4, RemainderWait::Deadline);
        // Move the cursors near the end of the slot array
        assert_eq!(buffer.push_many(&[0, 0, 0], Timeout::ZERO), 3);
        let mut sink = Vec::new();
        assert_eq!(buffer.pop_many(&mut sink, 3, Timeout::ZERO), 3);

        assert_eq!(buffer.push_many(&[1, 2, 3, 4, 5], Timeout::ZERO), 4);
        let mut out = Vec::new();
        assert_eq!(buffer.pop_many(&mut out, 10, Timeout::ZERO), 4);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_vector_elements_move_one_per_bulk_call() {
        let buffer = RingBuffer::<Frame<f32>>::new(8);
        let frames: Vec<_> = (0..3).map(|i| Frame::from_vec(vec![i as f32; 4])).collect();
        assert_eq!(buffer.push_many(&frames, Timeout::ZERO), 1);
        assert_eq!(buffer.push_many(&frames[1..], Timeout::ZERO), 1);

        let mut out = Vec::new();
        assert_eq!(buffer.pop_many(&mut out, 5, Timeout::ZERO), 1);
        assert_eq!(out[0][0], 0.0);
    }

    #[test]
    fn test_remainder_waits_forever() {
        let buffer = Arc::new(RingBuffer::<i32>::with_remainder_wait(4, RemainderWait::Forever));

        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(150));
                let mut out = Vec::new();
                while out.len() < 6 {
                    buffer.pop_many(&mut out, 6, Timeout::from_millis(500));
                }
                out
            })
        };

        // First run fits immediately; the rest outlives the 20ms timeout
        let written = buffer.push_many(&[1, 2, 3, 4, 5, 6], Timeout::from_millis(20));
        assert_eq!(written, 6);
        assert_eq!(consumer.join().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_remainder_honours_deadline() {
        let buffer = RingBuffer::<i32>::with_remainder_wait(4, RemainderWait::Deadline);
        let start = Instant::now();
        let written = buffer.push_many(&[1, 2, 3, 4, 5, 6], Timeout::from_millis(30));
        assert_eq!(written, 4);
        assert!(start.elapsed() >= Duration::from_millis(25));
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_interrupt_wakes_blocked_consumer() {
        let buffer = Arc::new(RingBuffer::<i32>::new(2));
        let consumer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.pop(Timeout::Infinite))
        };
        thread::sleep(Duration::from_millis(30));
        buffer.interrupt(Side::Consumer);
        assert_eq!(consumer.join().unwrap(), None);

        // Interruption only affects calls already in flight
        buffer.push(5, Timeout::ZERO).unwrap();
        assert_eq!(buffer.pop(Timeout::ZERO), Some(5));
    }

    #[test]
    fn test_detach_counts_and_wakes() {
        let buffer = Arc::new(RingBuffer::<i32>::new(1));
        buffer.attach(Side::Producer, None);
        buffer.attach(Side::Consumer, None);
        assert_eq!((buffer.producers(), buffer.consumers()), (1, 1));

        buffer.push(1, Timeout::ZERO).unwrap();
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.push(2, Timeout::Infinite))
        };
        thread::sleep(Duration::from_millis(30));
        buffer.detach(Side::Producer);
        assert_eq!(producer.join().unwrap(), Err(2));
        assert_eq!(buffer.producers(), 0);
    }

    #[test]
    fn test_detach_before_wait_still_fails_pinned_calls() {
        let buffer = RingBuffer::<i32>::new(1);
        buffer.attach(Side::Consumer, None);
        buffer.attach(Side::Producer, None);
        let consumer_epoch = buffer.epoch(Side::Consumer);
        let producer_epoch = buffer.epoch(Side::Producer);

        // Both sides detach before the calls start waiting
        buffer.detach(Side::Consumer);
        buffer.detach(Side::Producer);
        buffer.push(1, Timeout::ZERO).unwrap();

        assert_eq!(buffer.pop_from(consumer_epoch, Timeout::Infinite), None);
        let mut out = Vec::new();
        assert_eq!(buffer.pop_many_from(consumer_epoch, &mut out, 4, Timeout::Infinite), 0);
        assert_eq!(buffer.push_from(producer_epoch, 2, Timeout::Infinite), Err(2));
        assert_eq!(buffer.push_many_from(producer_epoch, &[3], Timeout::Infinite), 0);

        // Fresh calls see the current epoch
        assert_eq!(buffer.pop(Timeout::ZERO), Some(1));
    }

    #[test]
    fn test_sibling_keeps_characteristics() {
        let buffer = RingBuffer::<i16>::with_remainder_wait(7, RemainderWait::Forever);
        buffer.push(1, Timeout::ZERO).unwrap();
        let sibling = buffer.sibling();
        assert_eq!(sibling.capacity(), 7);
        assert_eq!(sibling.remainder_wait(), RemainderWait::Forever);
        assert!(sibling.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Push(Vec<i32>),
        Pop(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            prop::collection::vec(any::<i32>(), 0..12).prop_map(Op::Push),
            (0usize..12).prop_map(Op::Pop),
        ]
    }

    proptest! {
        #[test]
        fn prop_bulk_matches_scalar(
            capacity in 1usize..9,
            ops in prop::collection::vec(op_strategy(), 1..24),
        ) {
            let bulk = RingBuffer::<i32>::with_remainder_wait(capacity, RemainderWait::Deadline);
            let scalar = RingBuffer::<i32>::with_remainder_wait(capacity, RemainderWait::Deadline);

            for op in &ops {
                match op {
                    Op::Push(items) => {
                        let moved = bulk.push_many(items, Timeout::ZERO);
                        let mut expected = 0;
                        for item in items {
                            if scalar.push(*item, Timeout::ZERO).is_err() {
                                break;
                            }
                            expected += 1;
                        }
                        prop_assert_eq!(moved, expected);
                    }
                    Op::Pop(n) => {
                        let mut a = Vec::new();
                        bulk.pop_many(&mut a, *n, Timeout::ZERO);
                        let b: Vec<i32> =
                            (0..*n).map_while(|_| scalar.pop(Timeout::ZERO)).collect();
                        prop_assert_eq!(a, b);
                    }
                }
                prop_assert!(bulk.used() <= capacity);
                prop_assert_eq!(bulk.used(), scalar.used());
            }
        }
    }
}
