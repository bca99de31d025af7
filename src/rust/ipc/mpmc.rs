// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Multi-producer multi-consumer queue used for fan-in (drivers feeding one consumer) and fan-out.

//======================================================================================================================
// Imports
//======================================================================================================================

pub use crate::ipc::{
    Closed,
    TryRecvError,
    TrySendError,
};

use crate::runtime::{
    fail::Fail,
    wait_queue::{
        WaitQueue,
        WaitSlot,
    },
};
use ::futures::{
    stream,
    Stream,
};
use ::std::{
    collections::VecDeque,
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
        Waker,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct State<T> {
    queue: VecDeque<T>,
    /// None for an unbounded queue.
    capacity: Option<usize>,
    senders: usize,
    receivers: usize,
    recv_waiters: WaitQueue,
    send_waiters: WaitQueue,
}

struct Shared<T> {
    state: spin::Mutex<State<T>>,
}

/// Sending handle. Cloning adds a producer.
pub struct Sender<T> {
    shared: Arc<Shared<T>>,
}

/// Receiving handle. Cloning adds a consumer; each item goes to exactly one consumer.
pub struct Receiver<T> {
    shared: Arc<Shared<T>>,
}

/// Future returned by [Sender::send].
#[must_use = "futures do nothing unless polled"]
pub struct SendItem<'a, T> {
    shared: &'a Shared<T>,
    item: Option<T>,
    slot: WaitSlot,
}

/// Future returned by [Receiver::recv].
#[must_use = "futures do nothing unless polled"]
pub struct RecvItem<'a, T> {
    shared: &'a Shared<T>,
    slot: WaitSlot,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates a queue without a capacity limit.
pub fn unbounded<T>() -> (Sender<T>, Receiver<T>) {
    new(None)
}

/// Creates a queue that holds up to `capacity` items. Fails with `EINVAL` if `capacity` is zero.
pub fn bounded<T>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), Fail> {
    if capacity == 0 {
        let cause: &str = "queue capacity must be greater than zero";
        error!("bounded(): {}", cause);
        return Err(Fail::new(libc::EINVAL, cause));
    }
    Ok(new(Some(capacity)))
}

fn new<T>(capacity: Option<usize>) -> (Sender<T>, Receiver<T>) {
    let shared: Arc<Shared<T>> = Arc::new(Shared {
        state: spin::Mutex::new(State {
            queue: VecDeque::new(),
            capacity,
            senders: 1,
            receivers: 1,
            recv_waiters: WaitQueue::new(),
            send_waiters: WaitQueue::new(),
        }),
    });
    (
        Sender {
            shared: shared.clone(),
        },
        Receiver { shared },
    )
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> State<T> {
    fn is_full(&self) -> bool {
        match self.capacity {
            Some(capacity) => self.queue.len() >= capacity,
            None => false,
        }
    }
}

impl<T> Shared<T> {
    fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        let waker: Option<Waker> = {
            let mut state = self.state.lock();
            if state.receivers == 0 {
                return Err(TrySendError::Closed(item));
            }
            if state.is_full() {
                return Err(TrySendError::Full(item));
            }
            state.queue.push_back(item);
            state.recv_waiters.take_one()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    fn try_recv(&self) -> Result<T, TryRecvError> {
        let (item, waker): (T, Option<Waker>) = {
            let mut state = self.state.lock();
            match state.queue.pop_front() {
                Some(item) => (item, state.send_waiters.take_one()),
                None if state.senders == 0 => return Err(TryRecvError::Closed),
                None => return Err(TryRecvError::Empty),
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(item)
    }
}

impl<T> Sender<T> {
    /// Enqueues `item` without suspending.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.shared.try_send(item)
    }

    /// Enqueues `item`, suspending while a bounded queue is full. Fails with [Closed] once every receiver is gone.
    pub fn send(&self, item: T) -> SendItem<'_, T> {
        SendItem {
            shared: &self.shared,
            item: Some(item),
            slot: WaitSlot::new(),
        }
    }

    /// True once every receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().receivers == 0
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }
}

impl<T> Receiver<T> {
    /// Dequeues without suspending.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.shared.try_recv()
    }

    /// Dequeues the next item, suspending while the queue is empty. Fails with [Closed] once every sender is gone and
    /// the queue is drained.
    pub fn recv(&self) -> RecvItem<'_, T> {
        RecvItem {
            shared: &self.shared,
            slot: WaitSlot::new(),
        }
    }

    /// True once every sender is gone. Queued items may still be received.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().senders == 0
    }

    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().queue.is_empty()
    }

    /// Turns this receiver into a stream that ends when the queue is closed and drained.
    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |rx| async move {
            let item: T = rx.recv().await.ok()?;
            Some((item, rx))
        })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().senders += 1;
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let wakers: Vec<Waker> = {
            let mut state = self.shared.state.lock();
            state.senders -= 1;
            if state.senders > 0 {
                return;
            }
            state.recv_waiters.take_all()
        };
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.shared.state.lock().receivers += 1;
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let (wakers, orphaned): (Vec<Waker>, VecDeque<T>) = {
            let mut state = self.shared.state.lock();
            state.receivers -= 1;
            if state.receivers > 0 {
                return;
            }
            (state.send_waiters.take_all(), ::std::mem::take(&mut state.queue))
        };
        // Nobody can receive these anymore. Drop them outside the lock.
        drop(orphaned);
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Unpin for SendItem<'_, T> {}

impl<T> Future for SendItem<'_, T> {
    type Output = Result<(), Closed>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut state = self_.shared.state.lock();
        if state.receivers == 0 {
            self_.slot.complete(&mut state.send_waiters);
            drop(state);
            drop(self_.item.take());
            return Poll::Ready(Err(Closed));
        }
        if state.is_full() {
            self_.slot.park(&mut state.send_waiters, ctx.waker());
            return Poll::Pending;
        }
        match self_.item.take() {
            Some(item) => state.queue.push_back(item),
            None => panic!("send future polled after completion"),
        }
        self_.slot.complete(&mut state.send_waiters);
        let waker: Option<Waker> = state.recv_waiters.take_one();
        drop(state);
        if let Some(waker) = waker {
            waker.wake();
        }
        Poll::Ready(Ok(()))
    }
}

impl<T> Drop for SendItem<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let relay: Option<Waker> = self.slot.cancel(&mut self.shared.state.lock().send_waiters);
            if let Some(waker) = relay {
                waker.wake();
            }
        }
    }
}

impl<T> Future for RecvItem<'_, T> {
    type Output = Result<T, Closed>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut state = self_.shared.state.lock();
        if let Some(item) = state.queue.pop_front() {
            self_.slot.complete(&mut state.recv_waiters);
            let waker: Option<Waker> = state.send_waiters.take_one();
            drop(state);
            if let Some(waker) = waker {
                waker.wake();
            }
            return Poll::Ready(Ok(item));
        }
        if state.senders == 0 {
            self_.slot.complete(&mut state.recv_waiters);
            return Poll::Ready(Err(Closed));
        }
        self_.slot.park(&mut state.recv_waiters, ctx.waker());
        Poll::Pending
    }
}

impl<T> Drop for RecvItem<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let relay: Option<Waker> = self.slot.cancel(&mut self.shared.state.lock().recv_waiters);
            if let Some(waker) = relay {
                waker.wake();
            }
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Sender")
            .field("len", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("senders", &state.senders)
            .field("receivers", &state.receivers)
            .finish()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Receiver")
            .field("len", &state.queue.len())
            .field("capacity", &state.capacity)
            .field("senders", &state.senders)
            .field("receivers", &state.receivers)
            .finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        bounded,
        unbounded,
        Closed,
        Receiver,
        Sender,
        TryRecvError,
        TrySendError,
    };
    use ::anyhow::Result;
    use ::futures::{
        task::noop_waker_ref,
        StreamExt,
    };
    use ::std::{
        future::Future,
        pin::Pin,
        task::{
            Context,
            Poll,
        },
    };

    #[test]
    fn fan_in_preserves_per_producer_order() -> Result<()> {
        let (tx, rx): (Sender<(u8, u8)>, Receiver<(u8, u8)>) = unbounded();
        let producers: Vec<Sender<(u8, u8)>> = (0..3).map(|_| tx.clone()).collect();
        drop(tx);
        for seq in 0..4 {
            for (id, producer) in producers.iter().enumerate() {
                crate::ensure_eq!(producer.try_send((id as u8, seq)), Ok(()));
            }
        }
        drop(producers);

        let mut last: [Option<u8>; 3] = [None; 3];
        loop {
            match rx.try_recv() {
                Ok((id, seq)) => {
                    let previous: Option<u8> = last[id as usize].replace(seq);
                    crate::ensure_eq!(previous < Some(seq), true);
                },
                Err(e) => {
                    crate::ensure_eq!(e, TryRecvError::Closed);
                    break;
                },
            }
        }
        crate::ensure_eq!(last, [Some(3); 3]);
        Ok(())
    }

    #[test]
    fn bounded_send_waits_for_room() -> Result<()> {
        let mut ctx = Context::from_waker(noop_waker_ref());
        crate::ensure_eq!(bounded::<u8>(0).is_err(), true);
        let (tx, rx): (Sender<u8>, Receiver<u8>) = bounded(1)?;
        crate::ensure_eq!(tx.try_send(1), Ok(()));
        crate::ensure_eq!(tx.try_send(2), Err(TrySendError::Full(2)));
        // A rejected item is handed back.
        crate::ensure_eq!(tx.try_send(3).map_err(|e| e.into_inner()), Err(3));

        let mut send = tx.send(2);
        crate::ensure_eq!(Pin::new(&mut send).poll(&mut ctx), Poll::Pending);
        crate::ensure_eq!(rx.try_recv(), Ok(1));
        crate::ensure_eq!(Pin::new(&mut send).poll(&mut ctx), Poll::Ready(Ok(())));
        crate::ensure_eq!(rx.try_recv(), Ok(2));
        Ok(())
    }

    #[test]
    fn send_fails_without_receivers() -> Result<()> {
        let mut ctx = Context::from_waker(noop_waker_ref());
        let (tx, rx): (Sender<u8>, Receiver<u8>) = unbounded();
        let rx2: Receiver<u8> = rx.clone();
        drop(rx);
        crate::ensure_eq!(tx.is_closed(), false);
        drop(rx2);
        crate::ensure_eq!(tx.try_send(1), Err(TrySendError::Closed(1)));
        let mut send = tx.send(1);
        crate::ensure_eq!(Pin::new(&mut send).poll(&mut ctx), Poll::Ready(Err(Closed)));
        Ok(())
    }

    #[test]
    fn stream_ends_after_drain() -> Result<()> {
        let (tx, rx): (Sender<u32>, Receiver<u32>) = unbounded();
        for i in 0..3 {
            crate::ensure_eq!(tx.try_send(i), Ok(()));
        }
        drop(tx);
        let items: Vec<u32> = ::futures::executor::block_on(rx.into_stream().collect::<Vec<u32>>());
        crate::ensure_eq!(items, vec![0, 1, 2]);
        Ok(())
    }
}
