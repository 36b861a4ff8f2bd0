use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::flagpole::{Flag, Flagpole};

/// FIFO whose "has data" condition is one flag on its consumer's flagpole.
///
/// Several mailboxes may share a flagpole under different flags so a single
/// loop can wait on all of them at once.
#[derive(Debug)]
pub struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    pole: Arc<Flagpole>,
    flag: Flag,
    capacity: Option<usize>,
}

impl<T> Mailbox<T> {
    pub fn new(pole: Arc<Flagpole>, flag: Flag) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pole,
            flag,
            capacity: None,
        }
    }

    /// A mailbox holding at most `capacity` items; pushing into a full one
    /// discards the oldest item.
    pub fn bounded(pole: Arc<Flagpole>, flag: Flag, capacity: usize) -> Self {
        Self {
            capacity: Some(capacity.max(1)),
            ..Self::new(pole, flag)
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pole(&self) -> &Arc<Flagpole> {
        &self.pole
    }

    pub fn flag(&self) -> Flag {
        self.flag
    }

    /// Queues `item`. Returns `false` if an older item was discarded.
    pub fn push(&self, item: T) -> bool {
        let mut queue = self.queue();
        let mut kept = true;
        if let Some(cap) = self.capacity {
            while queue.len() >= cap {
                queue.pop_front();
                kept = false;
            }
        }
        queue.push_back(item);
        self.pole.raise(self.flag);
        kept
    }

    pub fn pop(&self) -> Option<T> {
        let mut queue = self.queue();
        let item = queue.pop_front();
        if queue.is_empty() {
            self.pole.lower(self.flag);
        }
        item
    }

    /// Pops, waiting until `deadline` (or forever) for an item. Returns
    /// `None` on timeout or once STOP is raised on the flagpole.
    pub fn pop_wait(&self, deadline: Option<Instant>) -> Option<T> {
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            let raised = match deadline {
                Some(deadline) => self.pole.wait_until(&[self.flag], deadline),
                None => self.pole.wait(&[self.flag]),
            };
            if raised.stopped() {
                return self.pop();
            }
            if raised.is_empty() {
                return None;
            }
        }
    }

    /// Pops for a consumer whose cancellation lives on another flagpole.
    /// Waits in `slice` steps and gives up once `stop` or this mailbox's own
    /// flagpole has STOP raised.
    pub fn pop_until_stopped(&self, stop: &Flagpole, slice: Duration) -> Option<T> {
        loop {
            if let Some(item) = self.pop() {
                return Some(item);
            }
            if stop.stopped() || self.pole.stopped() {
                return None;
            }
            self.pole.wait_timeout(&[self.flag], slice);
        }
    }

    pub fn len(&self) -> usize {
        self.queue().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue().is_empty()
    }

    pub fn clear(&self) {
        let mut queue = self.queue();
        queue.clear();
        self.pole.lower(self.flag);
    }
}

#[cfg(test)]
mod tests {
    use super::Mailbox;
    use crate::flagpole::{Flag, Flagpole};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    const IN: Flag = Flag::new(3);
    const OUT: Flag = Flag::new(4);

    #[test]
    fn flag_tracks_contents() {
        let pole = Arc::new(Flagpole::new());
        let mb = Mailbox::new(Arc::clone(&pole), IN);
        mb.push(1);
        mb.push(2);
        assert!(pole.raised(IN));
        assert_eq!(mb.pop(), Some(1));
        assert!(pole.raised(IN));
        assert_eq!(mb.pop(), Some(2));
        assert!(!pole.raised(IN));
        assert_eq!(mb.pop(), None);
    }

    #[test]
    fn shared_pole_separates_flags() {
        let pole = Arc::new(Flagpole::new());
        let a = Mailbox::new(Arc::clone(&pole), IN);
        let b: Mailbox<u8> = Mailbox::new(Arc::clone(&pole), OUT);
        a.push("x");
        let raised = pole.wait(&[IN, OUT]);
        assert!(raised.contains(IN));
        assert!(!raised.contains(OUT));
        assert!(b.is_empty());
    }

    #[test]
    fn bounded_drops_oldest() {
        let mb = Mailbox::bounded(Arc::new(Flagpole::new()), IN, 2);
        assert!(mb.push(1));
        assert!(mb.push(2));
        assert!(!mb.push(3));
        assert_eq!(mb.len(), 2);
        assert_eq!(mb.pop(), Some(2));
        assert_eq!(mb.pop(), Some(3));
    }

    #[test]
    fn pop_wait_receives_from_other_thread() {
        let mb = Arc::new(Mailbox::new(Arc::new(Flagpole::new()), IN));
        let producer = Arc::clone(&mb);
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(7u32);
        });
        let got = mb.pop_wait(Some(Instant::now() + Duration::from_secs(5)));
        assert_eq!(got, Some(7));
        t.join().unwrap();
    }

    #[test]
    fn pop_wait_times_out_and_stops() {
        let pole = Arc::new(Flagpole::new());
        let mb: Mailbox<u8> = Mailbox::new(Arc::clone(&pole), IN);
        assert_eq!(
            mb.pop_wait(Some(Instant::now() + Duration::from_millis(20))),
            None
        );
        pole.raise(Flag::STOP);
        assert_eq!(mb.pop_wait(None), None);
    }
}
