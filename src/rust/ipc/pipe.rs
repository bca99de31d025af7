// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Bounded channel with independent half-close.
//!
//! A [Channel] is split once into a [Sender] and a [Receiver]. Both handles may be cloned; a side is closed when its
//! last handle is dropped. Senders observe [Closed] as soon as every receiver is gone. Receivers drain whatever is
//! buffered before they observe [Closed].

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    collections::ring::RingBuffer,
    ipc::{
        Closed,
        TryRecvError,
        TrySendError,
    },
    runtime::{
        fail::Fail,
        limits,
        wait_queue::{
            WaitQueue,
            WaitSlot,
        },
    },
};
use ::std::{
    fmt,
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
        Waker,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Capacity of a byte pipe created without an explicit capacity.
pub const DEFAULT_PIPE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(limits::DEFAULT_PIPE_CAPACITY) {
    Some(capacity) => capacity,
    None => panic!("default pipe capacity must be greater than zero"),
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct State<T> {
    ring: RingBuffer<T>,
    senders: usize,
    receivers: usize,
    /// Senders waiting for room.
    send_waiters: WaitQueue,
    /// Receivers waiting for items.
    recv_waiters: WaitQueue,
    /// Tasks waiting for the send side to close.
    send_closed_waiters: WaitQueue,
    /// Tasks waiting for the receive side to close.
    recv_closed_waiters: WaitQueue,
}

/// Fixed-capacity FIFO shared by a sending side and a receiving side.
pub struct Channel<T> {
    state: spin::Mutex<State<T>>,
}

/// Sending handle of a [Channel].
pub struct Sender<T> {
    channel: Arc<Channel<T>>,
}

/// Receiving handle of a [Channel].
pub struct Receiver<T> {
    channel: Arc<Channel<T>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Send,
    Recv,
}

/// Future returned by [Sender::send].
#[must_use = "futures do nothing unless polled"]
pub struct SendItem<'a, T> {
    channel: &'a Channel<T>,
    item: Option<T>,
    slot: WaitSlot,
}

/// Future returned by [Receiver::recv].
#[must_use = "futures do nothing unless polled"]
pub struct RecvItem<'a, T> {
    channel: &'a Channel<T>,
    slot: WaitSlot,
}

/// Future returned by [Sender::send_slice].
#[must_use = "futures do nothing unless polled"]
pub struct SendSlice<'a, T> {
    channel: &'a Channel<T>,
    data: &'a [T],
    slot: WaitSlot,
}

/// Future returned by [Receiver::recv_slice].
#[must_use = "futures do nothing unless polled"]
pub struct RecvSlice<'a, T> {
    channel: &'a Channel<T>,
    buf: &'a mut [T],
    slot: WaitSlot,
}

/// Future that completes once one side of a channel is closed.
#[must_use = "futures do nothing unless polled"]
pub struct WaitClosed<'a, T> {
    channel: &'a Channel<T>,
    side: Side,
    slot: WaitSlot,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Creates a byte pipe with the default capacity.
pub fn pipe() -> (Sender<u8>, Receiver<u8>) {
    Channel::with_capacity(DEFAULT_PIPE_CAPACITY).split()
}

/// Creates a byte pipe that buffers up to `capacity` bytes.
pub fn pipe_with(capacity: usize) -> Result<(Sender<u8>, Receiver<u8>), Fail> {
    channel(capacity)
}

/// Creates a typed channel that buffers up to `capacity` items.
pub fn channel<T>(capacity: usize) -> Result<(Sender<T>, Receiver<T>), Fail> {
    Ok(Channel::new(capacity)?.split())
}

/// Invokes wakers collected under a lock.
fn wake_all(wakers: Vec<Waker>) {
    for waker in wakers {
        waker.wake();
    }
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> State<T> {
    fn send_closed(&self) -> bool {
        self.senders == 0
    }

    fn recv_closed(&self) -> bool {
        self.receivers == 0
    }
}

impl<T> Channel<T> {
    /// Creates a channel that buffers up to `capacity` items. Fails with `EINVAL` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, Fail> {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => Ok(Self::with_capacity(capacity)),
            None => {
                let cause: &str = "channel capacity must be greater than zero";
                error!("new(): {}", cause);
                Err(Fail::new(libc::EINVAL, cause))
            },
        }
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            state: spin::Mutex::new(State {
                ring: RingBuffer::with_capacity(capacity),
                senders: 0,
                receivers: 0,
                send_waiters: WaitQueue::new(),
                recv_waiters: WaitQueue::new(),
                send_closed_waiters: WaitQueue::new(),
                recv_closed_waiters: WaitQueue::new(),
            }),
        }
    }

    /// Hands out the two sides of the channel.
    pub fn split(self) -> (Sender<T>, Receiver<T>) {
        {
            let mut state = self.state.lock();
            state.senders = 1;
            state.receivers = 1;
        }
        let channel: Arc<Channel<T>> = Arc::new(self);
        (
            Sender {
                channel: channel.clone(),
            },
            Receiver { channel },
        )
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    pub fn len(&self) -> usize {
        self.state.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().ring.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.state.lock().ring.is_full()
    }

    fn send(&self, item: T) -> SendItem<'_, T> {
        SendItem {
            channel: self,
            item: Some(item),
            slot: WaitSlot::new(),
        }
    }

    fn recv(&self) -> RecvItem<'_, T> {
        RecvItem {
            channel: self,
            slot: WaitSlot::new(),
        }
    }

    fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        let waker: Option<Waker> = {
            let mut state = self.state.lock();
            if state.recv_closed() {
                return Err(TrySendError::Closed(item));
            }
            if let Err(item) = state.ring.try_enqueue(item) {
                return Err(TrySendError::Full(item));
            }
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
            match state.ring.try_dequeue() {
                Some(item) => (item, state.send_waiters.take_one()),
                None if state.send_closed() => return Err(TryRecvError::Closed),
                None => return Err(TryRecvError::Empty),
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(item)
    }

    /// Suspends until every sender is gone.
    pub fn send_closed(&self) -> WaitClosed<'_, T> {
        WaitClosed {
            channel: self,
            side: Side::Send,
            slot: WaitSlot::new(),
        }
    }

    /// Suspends until every receiver is gone.
    pub fn recv_closed(&self) -> WaitClosed<'_, T> {
        WaitClosed {
            channel: self,
            side: Side::Recv,
            slot: WaitSlot::new(),
        }
    }

    fn open_send(&self) {
        self.state.lock().senders += 1;
    }

    fn open_recv(&self) {
        self.state.lock().receivers += 1;
    }

    /// Drops one sender. The last one closes the send side and wakes everyone waiting on it.
    fn close_send(&self) {
        let wakers: Vec<Waker> = {
            let mut state = self.state.lock();
            state.senders -= 1;
            if state.senders > 0 {
                return;
            }
            trace!("close_send(): send side closed (buffered={})", state.ring.len());
            let mut wakers: Vec<Waker> = state.recv_waiters.take_all();
            wakers.extend(state.send_closed_waiters.take_all());
            wakers
        };
        wake_all(wakers);
    }

    /// Drops one receiver. The last one closes the receive side and wakes everyone waiting on it.
    fn close_recv(&self) {
        let wakers: Vec<Waker> = {
            let mut state = self.state.lock();
            state.receivers -= 1;
            if state.receivers > 0 {
                return;
            }
            trace!("close_recv(): receive side closed (buffered={})", state.ring.len());
            let mut wakers: Vec<Waker> = state.send_waiters.take_all();
            wakers.extend(state.recv_closed_waiters.take_all());
            wakers
        };
        wake_all(wakers);
    }
}

impl<T: Copy> Channel<T> {
    fn send_slice<'a>(&'a self, data: &'a [T]) -> SendSlice<'a, T> {
        SendSlice {
            channel: self,
            data,
            slot: WaitSlot::new(),
        }
    }

    fn recv_slice<'a>(&'a self, buf: &'a mut [T]) -> RecvSlice<'a, T> {
        RecvSlice {
            channel: self,
            buf,
            slot: WaitSlot::new(),
        }
    }

    /// Sends every item of `data`, suspending as often as needed. Returns the number of items sent, which is short
    /// of `data.len()` only if the receive side closed part way. Items are never split.
    async fn send_all(&self, data: &[T]) -> usize {
        let mut sent: usize = 0;
        while sent < data.len() {
            match self.send_slice(&data[sent..]).await {
                Ok(n) => sent += n,
                Err(Closed) => {
                    debug!("send_all(): receive side closed ({} of {} items sent)", sent, data.len());
                    break;
                },
            }
        }
        sent
    }
}

impl<T> Sender<T> {
    /// Enqueues `item`, suspending while the channel is full. Fails with [Closed] once every receiver is gone; the
    /// item is dropped.
    pub fn send(&self, item: T) -> SendItem<'_, T> {
        self.channel.send(item)
    }

    /// Enqueues `item` without suspending.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError<T>> {
        self.channel.try_send(item)
    }

    /// Suspends until every receiver is gone.
    pub fn wait_closed(&self) -> WaitClosed<'_, T> {
        self.channel.recv_closed()
    }

    /// True once every receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.channel.state.lock().recv_closed()
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }
}

impl<T: Copy> Sender<T> {
    /// Enqueues as many items of `data` as fit, suspending only until at least one fits. Returns the number sent.
    pub fn send_slice<'a>(&'a self, data: &'a [T]) -> SendSlice<'a, T> {
        self.channel.send_slice(data)
    }

    /// Enqueues all of `data`. Returns how many items were sent before the receive side closed, if it did.
    pub async fn send_all(&self, data: &[T]) -> usize {
        self.channel.send_all(data).await
    }

    /// Reads from the channel without holding the receive side open.
    pub fn weak_recv_slice<'a>(&'a self, buf: &'a mut [T]) -> RecvSlice<'a, T> {
        self.channel.recv_slice(buf)
    }
}

impl<T> Receiver<T> {
    /// Dequeues the next item, suspending while the channel is empty. Fails with [Closed] once every sender is gone
    /// and the buffer is drained.
    pub fn recv(&self) -> RecvItem<'_, T> {
        self.channel.recv()
    }

    /// Dequeues the next item without suspending.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.channel.try_recv()
    }

    /// Suspends until every sender is gone.
    pub fn wait_closed(&self) -> WaitClosed<'_, T> {
        self.channel.send_closed()
    }

    /// True once every sender is gone. Buffered items may still be received.
    pub fn is_closed(&self) -> bool {
        self.channel.state.lock().send_closed()
    }

    pub fn capacity(&self) -> usize {
        self.channel.capacity()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.channel.is_full()
    }
}

impl<T: Copy> Receiver<T> {
    /// Dequeues as many items as are buffered and fit in `buf`, suspending only until at least one is available.
    pub fn recv_slice<'a>(&'a self, buf: &'a mut [T]) -> RecvSlice<'a, T> {
        self.channel.recv_slice(buf)
    }

    /// Writes to the channel without holding the send side open.
    pub fn weak_send_slice<'a>(&'a self, data: &'a [T]) -> SendSlice<'a, T> {
        self.channel.send_slice(data)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.channel.open_send();
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        self.channel.close_send();
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.channel.open_recv();
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.channel.close_recv();
    }
}

impl<T> Unpin for SendItem<'_, T> {}

impl<T> Future for SendItem<'_, T> {
    type Output = Result<(), Closed>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut state = self_.channel.state.lock();
        if state.recv_closed() {
            self_.slot.complete(&mut state.send_waiters);
            drop(state);
            drop(self_.item.take());
            return Poll::Ready(Err(Closed));
        }
        let item: T = match self_.item.take() {
            Some(item) => item,
            None => panic!("send future polled after completion"),
        };
        match state.ring.try_enqueue(item) {
            Ok(()) => {
                self_.slot.complete(&mut state.send_waiters);
                let waker: Option<Waker> = state.recv_waiters.take_one();
                drop(state);
                if let Some(waker) = waker {
                    waker.wake();
                }
                Poll::Ready(Ok(()))
            },
            Err(item) => {
                self_.item = Some(item);
                self_.slot.park(&mut state.send_waiters, ctx.waker());
                Poll::Pending
            },
        }
    }
}

impl<T> Drop for SendItem<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let relay: Option<Waker> = self.slot.cancel(&mut self.channel.state.lock().send_waiters);
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
        let mut state = self_.channel.state.lock();
        if let Some(item) = state.ring.try_dequeue() {
            self_.slot.complete(&mut state.recv_waiters);
            let waker: Option<Waker> = state.send_waiters.take_one();
            drop(state);
            if let Some(waker) = waker {
                waker.wake();
            }
            return Poll::Ready(Ok(item));
        }
        if state.send_closed() {
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
            let relay: Option<Waker> = self.slot.cancel(&mut self.channel.state.lock().recv_waiters);
            if let Some(waker) = relay {
                waker.wake();
            }
        }
    }
}

impl<T: Copy> Future for SendSlice<'_, T> {
    type Output = Result<usize, Closed>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut state = self_.channel.state.lock();
        if state.recv_closed() {
            self_.slot.complete(&mut state.send_waiters);
            return Poll::Ready(Err(Closed));
        }
        if self_.data.is_empty() {
            return Poll::Ready(Ok(0));
        }
        match state.ring.push_slice(self_.data) {
            0 => {
                self_.slot.park(&mut state.send_waiters, ctx.waker());
                Poll::Pending
            },
            sent => {
                self_.slot.complete(&mut state.send_waiters);
                let wakers: Vec<Waker> = state.recv_waiters.take_all();
                drop(state);
                wake_all(wakers);
                Poll::Ready(Ok(sent))
            },
        }
    }
}

impl<T> Drop for SendSlice<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let relay: Option<Waker> = self.slot.cancel(&mut self.channel.state.lock().send_waiters);
            if let Some(waker) = relay {
                waker.wake();
            }
        }
    }
}

impl<T: Copy> Future for RecvSlice<'_, T> {
    type Output = Result<usize, Closed>;

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut state = self_.channel.state.lock();
        match state.ring.pop_slice(self_.buf) {
            0 if state.send_closed() => {
                self_.slot.complete(&mut state.recv_waiters);
                Poll::Ready(Err(Closed))
            },
            0 => {
                self_.slot.park(&mut state.recv_waiters, ctx.waker());
                Poll::Pending
            },
            received => {
                self_.slot.complete(&mut state.recv_waiters);
                let wakers: Vec<Waker> = state.send_waiters.take_all();
                drop(state);
                wake_all(wakers);
                Poll::Ready(Ok(received))
            },
        }
    }
}

impl<T> Drop for RecvSlice<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let relay: Option<Waker> = self.slot.cancel(&mut self.channel.state.lock().recv_waiters);
            if let Some(waker) = relay {
                waker.wake();
            }
        }
    }
}

impl<T> Future for WaitClosed<'_, T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut guard = self_.channel.state.lock();
        let state: &mut State<T> = &mut guard;
        let (closed, waiters): (bool, &mut WaitQueue) = match self_.side {
            Side::Send => (state.send_closed(), &mut state.send_closed_waiters),
            Side::Recv => (state.recv_closed(), &mut state.recv_closed_waiters),
        };
        if closed {
            self_.slot.complete(waiters);
            Poll::Ready(())
        } else {
            self_.slot.park(waiters, ctx.waker());
            Poll::Pending
        }
    }
}

impl<T> Drop for WaitClosed<'_, T> {
    fn drop(&mut self) {
        if self.slot.is_parked() {
            let mut state = self.channel.state.lock();
            let waiters: &mut WaitQueue = match self.side {
                Side::Send => &mut state.send_closed_waiters,
                Side::Recv => &mut state.recv_closed_waiters,
            };
            // Closure wakes every waiter, so there is nothing to relay.
            let _ = self.slot.cancel(waiters);
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Channel")
            .field("len", &state.ring.len())
            .field("capacity", &state.ring.capacity())
            .field("senders", &state.senders)
            .field("receivers", &state.receivers)
            .finish()
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Sender").field(&self.channel).finish()
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Receiver").field(&self.channel).finish()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
