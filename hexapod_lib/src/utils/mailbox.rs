//! Single-slot hand-off channel with last-write-wins semantics.
//!
//! The network side publishes at whatever rate the sender produces; the
//! regulation side samples. Intermediate values that were never taken are
//! overwritten, which is exactly what a sampled control loop wants.

use std::sync::{Condvar, Mutex, MutexGuard};

pub struct Mailbox<T> {
    slot: Mutex<Slot<T>>,
    available: Condvar,
}

struct Slot<T> {
    value: Option<T>,
    closed: bool,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Publishes a value, replacing any still-pending one.
    ///
    /// Publishing to a closed mailbox is a no-op.
    pub fn publish(&self, value: T) {
        let mut slot = self.lock();
        if slot.closed {
            return;
        }
        slot.value = Some(value);
        self.available.notify_one();
    }

    /// Blocks until a value is pending, returns it and clears the slot.
    ///
    /// Returns `None` once the mailbox has been closed and the last pending
    /// value (if any) has been taken. A value that was pending when this is
    /// called is never lost.
    pub fn take_latest(&self) -> Option<T> {
        let mut slot = self.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if slot.closed {
                return None;
            }
            slot = match self.available.wait(slot) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Closes the mailbox and wakes every blocked consumer.
    ///
    /// Idempotent. Consumers drain a pending value first, then observe
    /// end-of-stream forever.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        self.available.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_publish_overwrites_pending_value() {
        let mailbox = Mailbox::new();
        mailbox.publish(1);
        mailbox.publish(2);

        // the overwritten value is never observed
        assert_eq!(mailbox.take_latest(), Some(2));
    }

    #[test]
    fn test_take_clears_the_slot() {
        let mailbox = Mailbox::new();
        mailbox.publish(7);
        assert_eq!(mailbox.take_latest(), Some(7));

        mailbox.close();
        assert_eq!(mailbox.take_latest(), None);
    }

    #[test]
    fn test_take_blocks_until_published() {
        let mailbox = Arc::new(Mailbox::new());

        let consumer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.take_latest())
        };

        thread::sleep(Duration::from_millis(50));
        mailbox.publish(42);

        assert_eq!(consumer.join().unwrap(), Some(42));
    }

    #[test]
    fn test_close_wakes_blocked_consumer() {
        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new());

        let consumer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || mailbox.take_latest())
        };

        thread::sleep(Duration::from_millis(50));
        mailbox.close();

        assert_eq!(consumer.join().unwrap(), None);
        assert!(mailbox.is_closed());
    }

    #[test]
    fn test_pending_value_survives_close() {
        let mailbox = Mailbox::new();
        mailbox.publish(5);
        mailbox.close();

        // the value that was pending at close time is still delivered once
        assert_eq!(mailbox.take_latest(), Some(5));
        assert_eq!(mailbox.take_latest(), None);
    }

    #[test]
    fn test_publish_after_close_is_dropped() {
        let mailbox = Mailbox::new();
        mailbox.close();
        mailbox.publish(9);
        assert_eq!(mailbox.take_latest(), None);
    }
}
