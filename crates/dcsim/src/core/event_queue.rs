//! Time-ordered event queue shared by trace producers and the engine.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex};

use crate::core::events::Event;

struct QueuedEvent {
    event: Event,
    seq: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedEvent {}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedEvent {
    // Reversed so that the binary heap pops the earliest event; equal times
    // fall back to insertion order.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .event
            .time
            .total_cmp(&self.event.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueuedEvent>,
    next_seq: u64,
    pushed: u64,
    popped: u64,
    terminated: bool,
}

/// A blocking min-priority queue keyed by event time with FIFO tie-break at
/// equal times.
///
/// Multiple producers push concurrently; the single consumer blocks in
/// [`pop`](EventQueue::pop) until an event arrives or the queue is
/// terminated. Events still queued at termination time are discarded. One
/// mutex guards the heap together with the push/pop counters so the
/// observables stay consistent.
pub struct EventQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
                pushed: 0,
                popped: 0,
                terminated: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Pushes an event and wakes one waiting consumer.
    pub fn push(&self, event: Event) {
        let mut state = self.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(QueuedEvent { event, seq });
        state.pushed += 1;
        drop(state);
        self.available.notify_one();
    }

    /// Blocks until an event is available and returns the earliest one, or
    /// returns `None` once the queue has been terminated.
    pub fn pop(&self) -> Option<Event> {
        let mut state = self.state.lock().unwrap();
        while !state.terminated && state.heap.is_empty() {
            state = self.available.wait(state).unwrap();
        }
        if state.terminated {
            return None;
        }
        let queued = state.heap.pop().unwrap();
        state.popped += 1;
        Some(queued.event)
    }

    /// Non-blocking variant of [`pop`](EventQueue::pop) used by the stepping
    /// API: returns `None` when the queue is empty or terminated.
    pub fn try_pop(&self) -> Option<Event> {
        let mut state = self.state.lock().unwrap();
        if state.terminated {
            return None;
        }
        let queued = state.heap.pop()?;
        state.popped += 1;
        Some(queued.event)
    }

    /// Terminates the queue, waking all consumers. Idempotent.
    pub fn terminate(&self) {
        let mut state = self.state.lock().unwrap();
        state.terminated = true;
        drop(state);
        self.available.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.state.lock().unwrap().terminated
    }

    /// Removes all queued events matching the predicate and returns how many
    /// were dropped. Relative order of the remaining events is preserved.
    pub fn remove<F>(&self, predicate: F) -> usize
    where
        F: Fn(&Event) -> bool,
    {
        let mut state = self.state.lock().unwrap();
        let before = state.heap.len();
        let retained: Vec<QueuedEvent> = state
            .heap
            .drain()
            .filter(|queued| !predicate(&queued.event))
            .collect();
        let removed = before - retained.len();
        state.heap = retained.into_iter().collect();
        removed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pushed_count(&self) -> u64 {
        self.state.lock().unwrap().pushed
    }

    pub fn popped_count(&self) -> u64 {
        self.state.lock().unwrap().popped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EventPayload;

    fn departure(time: f64, vm_id: u32) -> Event {
        Event::new(time, EventPayload::VmDeparture { vm_id })
    }

    #[test]
    fn pops_in_time_order() {
        let queue = EventQueue::new();
        queue.push(departure(3., 1));
        queue.push(departure(1., 2));
        queue.push(departure(2., 3));
        assert_eq!(queue.pop().unwrap().time, 1.);
        assert_eq!(queue.pop().unwrap().time, 2.);
        assert_eq!(queue.pop().unwrap().time, 3.);
    }

    #[test]
    fn equal_times_preserve_insertion_order() {
        let queue = EventQueue::new();
        for vm_id in [3, 1, 2] {
            queue.push(departure(0., vm_id));
        }
        let order: Vec<u32> = (0..3).map(|_| queue.pop().unwrap().vm_id().unwrap()).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn counters_track_push_and_pop() {
        let queue = EventQueue::new();
        queue.push(departure(0., 1));
        queue.push(departure(1., 2));
        assert_eq!(queue.pushed_count(), 2);
        assert_eq!(queue.len(), 2);
        queue.pop();
        assert_eq!(queue.popped_count(), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn remove_filters_matching_events() {
        let queue = EventQueue::new();
        for vm_id in 0..5 {
            queue.push(departure(vm_id as f64, vm_id));
        }
        let removed = queue.remove(|event| event.vm_id() == Some(2));
        assert_eq!(removed, 1);
        assert_eq!(queue.len(), 4);
        while let Some(event) = queue.try_pop() {
            assert_ne!(event.vm_id(), Some(2));
        }
    }

    #[test]
    fn terminate_discards_pending_events() {
        let queue = EventQueue::new();
        queue.push(departure(0., 1));
        queue.terminate();
        queue.terminate();
        assert!(queue.pop().is_none());
    }

    #[test]
    fn pop_unblocks_on_terminate() {
        use std::sync::Arc;

        let queue = Arc::new(EventQueue::new());
        let consumer = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.pop())
        };
        std::thread::sleep(std::time::Duration::from_millis(20));
        queue.terminate();
        assert!(consumer.join().unwrap().is_none());
    }
}
