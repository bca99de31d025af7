// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::num::NonZeroUsize;

//======================================================================================================================
// Structures
//======================================================================================================================

/// A fixed-capacity circular buffer. Callers provide synchronization.
pub struct RingBuffer<T> {
    // Underlying buffer. Occupied slots are `Some`.
    slots: Box<[Option<T>]>,
    // Indexes the first item in the front of the ring buffer.
    front: usize,
    // Number of items stored.
    len: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl<T> RingBuffer<T> {
    /// Creates a ring buffer that holds up to `capacity` items.
    pub fn new(capacity: usize) -> Result<RingBuffer<T>, Fail> {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Ok(Self::with_capacity(capacity)),
            None => {
                let cause: &str = "cannot create a ring buffer with zero capacity";
                error!("new(): {}", cause);
                Err(Fail::new(libc::EINVAL, cause))
            },
        }
    }

    /// Creates a ring buffer from a capacity that is known to be valid.
    pub fn with_capacity(capacity: NonZeroUsize) -> RingBuffer<T> {
        let slots: Box<[Option<T>]> = (0..capacity.get()).map(|_| None).collect();
        RingBuffer {
            slots,
            front: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Number of free slots.
    pub fn free(&self) -> usize {
        self.capacity() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Attempts to insert an item at the back of the ring buffer, handing it back if the buffer is full.
    pub fn try_enqueue(&mut self, item: T) -> Result<(), T> {
        if self.is_full() {
            return Err(item);
        }
        let back: usize = self.index(self.len);
        self.slots[back] = Some(item);
        self.len += 1;
        Ok(())
    }

    /// Attempts to remove the item at the front of the ring buffer.
    pub fn try_dequeue(&mut self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let item: Option<T> = self.slots[self.front].take();
        debug_assert!(item.is_some());
        self.front = self.index(1);
        self.len -= 1;
        item
    }

    /// Translates an offset from the front into a slot index.
    fn index(&self, offset: usize) -> usize {
        (self.front + offset) % self.capacity()
    }
}

impl<T: Copy> RingBuffer<T> {
    /// Copies as many items of `items` as fit. Returns the number copied.
    pub fn push_slice(&mut self, items: &[T]) -> usize {
        let count: usize = items.len().min(self.free());
        for item in &items[..count] {
            let back: usize = self.index(self.len);
            self.slots[back] = Some(*item);
            self.len += 1;
        }
        count
    }

    /// Moves as many items as are stored and fit into `buf`. Returns the number moved.
    pub fn pop_slice(&mut self, buf: &mut [T]) -> usize {
        let count: usize = buf.len().min(self.len);
        for slot in &mut buf[..count] {
            match self.try_dequeue() {
                Some(item) => *slot = item,
                None => unreachable!("ring buffer length is out of sync"),
            }
        }
        count
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::RingBuffer;
    use ::anyhow::Result;

    #[test]
    fn zero_capacity_is_rejected() -> Result<()> {
        crate::ensure_eq!(RingBuffer::<u8>::new(0).map(|_| ()).map_err(|e| e.errno), Err(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn wraps_around_in_fifo_order() -> Result<()> {
        let mut ring: RingBuffer<u32> = RingBuffer::new(3)?;
        for round in 0..10u32 {
            crate::ensure_eq!(ring.try_enqueue(round), Ok(()));
            crate::ensure_eq!(ring.try_enqueue(round + 100), Ok(()));
            crate::ensure_eq!(ring.try_dequeue(), Some(round));
            crate::ensure_eq!(ring.try_dequeue(), Some(round + 100));
        }
        crate::ensure_eq!(ring.is_empty(), true);
        Ok(())
    }

    #[test]
    fn full_ring_hands_item_back() -> Result<()> {
        let mut ring: RingBuffer<String> = RingBuffer::new(1)?;
        crate::ensure_eq!(ring.try_enqueue("a".to_string()), Ok(()));
        crate::ensure_eq!(ring.is_full(), true);
        crate::ensure_eq!(ring.try_enqueue("b".to_string()), Err("b".to_string()));
        crate::ensure_eq!(ring.len(), 1);
        Ok(())
    }

    #[test]
    fn slices_move_partial_amounts() -> Result<()> {
        let mut ring: RingBuffer<u8> = RingBuffer::new(4)?;
        crate::ensure_eq!(ring.push_slice(&[1]), 1);
        crate::ensure_eq!(ring.push_slice(&[2, 3, 4, 5, 6, 7, 8, 9, 10, 11]), 3);
        crate::ensure_eq!(ring.push_slice(&[12]), 0);

        let mut buf: [u8; 3] = [0; 3];
        crate::ensure_eq!(ring.pop_slice(&mut buf), 3);
        crate::ensure_eq!(buf, [1u8, 2, 3]);
        crate::ensure_eq!(ring.push_slice(&[5, 6]), 2);

        let mut buf: [u8; 8] = [0; 8];
        crate::ensure_eq!(ring.pop_slice(&mut buf), 3);
        crate::ensure_eq!(buf[..3], [4u8, 5, 6]);
        Ok(())
    }
}
