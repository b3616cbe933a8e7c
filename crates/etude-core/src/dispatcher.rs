use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::error::{EtudeError, EtudeResult};

struct Queue<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO between the reactor (single producer) and the workers.
///
/// `enqueue` never blocks: a full queue is reported back to the producer as
/// backpressure. `pop` blocks until an item arrives or the queue is closed.
pub struct Dispatcher<T> {
    queue: Mutex<Queue<T>>,
    ready: Condvar,
    capacity: usize,
}

impl<T> Dispatcher<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        }
    }

    /// Append `item` and wake one idle worker.
    ///
    /// Fails with `QueueFull` once `capacity` items are waiting, or after
    /// the queue was closed. A rejected item is dropped.
    pub fn enqueue(&self, item: T) -> EtudeResult<()> {
        let mut queue = self.queue.lock();
        if queue.closed || queue.items.len() >= self.capacity {
            return Err(EtudeError::QueueFull);
        }
        queue.items.push_back(item);
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Take the oldest item, waiting if there is none. `None` once closed.
    pub fn pop(&self) -> Option<T> {
        let mut queue = self.queue.lock();
        loop {
            if queue.closed {
                return None;
            }
            if let Some(item) = queue.items.pop_front() {
                return Some(item);
            }
            self.ready.wait(&mut queue);
        }
    }

    /// Stop accepting work and wake every waiting worker.
    ///
    /// Items still queued are dropped.
    pub fn close(&self) {
        let mut queue = self.queue.lock();
        queue.closed = true;
        queue.items.clear();
        drop(queue);
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.queue.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn full_queue_rejects_without_reordering() {
        let dispatcher = Dispatcher::new(2);
        dispatcher.enqueue(1).unwrap();
        dispatcher.enqueue(2).unwrap();
        assert!(matches!(dispatcher.enqueue(3), Err(EtudeError::QueueFull)));
        assert_eq!(dispatcher.len(), 2);

        assert_eq!(dispatcher.pop(), Some(1));
        dispatcher.enqueue(4).unwrap();
        assert!(dispatcher.enqueue(5).is_err());
        assert_eq!(dispatcher.pop(), Some(2));
        assert_eq!(dispatcher.pop(), Some(4));
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn pop_waits_for_an_item() {
        let dispatcher = Arc::new(Dispatcher::new(4));
        let consumer = {
            let dispatcher = dispatcher.clone();
            thread::spawn(move || dispatcher.pop())
        };
        thread::sleep(Duration::from_millis(20));
        dispatcher.enqueue("job").unwrap();
        assert_eq!(consumer.join().unwrap(), Some("job"));
    }

    #[test]
    fn close_wakes_every_worker() {
        let dispatcher = Arc::new(Dispatcher::<u32>::new(4));
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                thread::spawn(move || dispatcher.pop())
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        dispatcher.close();
        for worker in workers {
            assert_eq!(worker.join().unwrap(), None);
        }
        assert!(dispatcher.enqueue(1).is_err());
    }
}
