//! src/dataloader/buffer.rs
//!
//! Fixed-capacity queue between the prefetch worker and the consumer.
//!
//! One slot is always kept free: a buffer of capacity `n` holds at most
//! `n - 1` items. Neither side ever blocks; `push` hands the item back when the
//! buffer is full and `pop` returns `None` when it is empty, so the worker can
//! keep checking its shutdown flag between attempts.

use crate::error::{LoaderError, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

/// Bounded single-producer single-consumer queue.
///
/// Backed by a crossbeam `bounded` channel. Both ends live in the same
/// struct, so the channel can never disconnect while the buffer exists.
pub struct BoundedBuffer<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
}

impl<T> BoundedBuffer<T> {
    /// Creates a buffer that holds up to `capacity - 1` items.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity < 2 {
            return Err(LoaderError::InvalidConfig {
                reason: format!("buffer capacity must be >= 2, got {}", capacity),
            });
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self { tx, rx, capacity })
    }

    /// Enqueues `item`, or gives it back if the buffer is full.
    ///
    /// Only the producer calls this, so the length can only shrink between the
    /// check and the send.
    pub fn push(&self, item: T) -> std::result::Result<(), T> {
        if !self.has_spare_capacity() {
            return Err(item);
        }
        self.tx.try_send(item).map_err(|e| e.into_inner())
    }

    /// Dequeues the oldest item.
    pub fn pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// True if at least one item can be popped.
    pub fn peek_nonempty(&self) -> bool {
        !self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True while a push would succeed.
    pub fn has_spare_capacity(&self) -> bool {
        self.rx.len() < self.capacity - 1
    }

    /// Drops every queued item. Only call while the producer is stopped.
    pub fn clear(&self) -> usize {
        self.rx.try_iter().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_one_slot_free() -> Result<()> {
        let buffer = BoundedBuffer::new(3)?;
        assert!(buffer.push(1).is_ok());
        assert!(buffer.push(2).is_ok());
        assert_eq!(buffer.push(3), Err(3));
        assert_eq!(buffer.len(), 2);
        assert!(!buffer.has_spare_capacity());

        assert_eq!(buffer.pop(), Some(1));
        assert!(buffer.push(3).is_ok());
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), Some(3));
        assert_eq!(buffer.pop(), None);
        assert!(!buffer.peek_nonempty());
        Ok(())
    }

    #[test]
    fn test_rejects_small_capacity() {
        assert!(matches!(
            BoundedBuffer::<u8>::new(1),
            Err(LoaderError::InvalidConfig { .. })
        ));
        assert!(BoundedBuffer::<u8>::new(2).is_ok());
    }

    #[test]
    fn test_clear() -> Result<()> {
        let buffer = BoundedBuffer::new(5)?;
        for i in 0..4 {
            buffer.push(i).map_err(|_| LoaderError::EmptyBuffer)?;
        }
        assert_eq!(buffer.clear(), 4);
        assert!(buffer.is_empty());
        assert!(buffer.has_spare_capacity());
        Ok(())
    }

    #[test]
    fn test_fifo_across_threads() -> Result<()> {
        let buffer = std::sync::Arc::new(BoundedBuffer::new(4)?);
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    let mut item = i;
                    while let Err(back) = buffer.push(item) {
                        item = back;
                        std::thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::new();
        while seen.len() < 100 {
            match buffer.pop() {
                Some(v) => seen.push(v),
                None => std::thread::yield_now(),
            }
            assert!(buffer.len() <= 3);
        }
        producer.join().expect("producer panicked");
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        Ok(())
    }
}
