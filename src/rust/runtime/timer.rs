// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        current,
        Tid,
    },
};
use ::core::cmp::Reverse;
use ::futures::{
    FutureExt,
    Stream,
};
use ::slab::Slab;
use ::std::{
    collections::BinaryHeap,
    fmt,
    future::Future,
    ops::Add,
    pin::Pin,
    sync::Arc,
    task::{
        Context,
        Poll,
        Waker,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Value of the monotonic tick counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticks(u64);

/// Names a registration in the timer. `seq` tells a live entry apart from a later one that reuses its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct TimerKey {
    index: usize,
    seq: u64,
}

struct TimerEntry {
    tid: Option<Tid>,
    waker: Waker,
    seq: u64,
}

/// Deadline queue of pending sleeps.
pub struct Timer {
    now: Ticks,
    // Use a reverse to get a min heap. Equal deadlines are ordered by registration sequence.
    heap: BinaryHeap<Reverse<(Ticks, u64, usize)>>,
    entries: Slab<TimerEntry>,
    next_seq: u64,
}

#[derive(Clone)]
pub struct SharedTimer(Arc<spin::Mutex<Timer>>);

/// Future that completes once the timer reaches an absolute deadline.
#[must_use = "futures do nothing unless polled"]
pub struct SleepUntil {
    timer: SharedTimer,
    deadline: Ticks,
    key: Option<TimerKey>,
}

/// Future that completes a number of ticks after its creation.
#[must_use = "futures do nothing unless polled"]
pub struct Sleep {
    inner: SleepUntil,
}

/// Stream that yields once per period. Each deadline is computed from the previous one, not from the time the
/// previous item was consumed.
#[must_use = "streams do nothing unless polled"]
pub struct Interval {
    timer: SharedTimer,
    next: Ticks,
    period: u64,
    sleep: Option<SleepUntil>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Ticks {
    pub const fn new(ticks: u64) -> Self {
        Self(ticks)
    }

    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl Timer {
    fn new() -> Self {
        Self {
            now: Ticks::default(),
            heap: BinaryHeap::new(),
            entries: Slab::new(),
            next_seq: 0,
        }
    }

    /// Registers or refreshes a wake-up. Returns false if `deadline` has already passed.
    fn register(&mut self, deadline: Ticks, waker: &Waker, key: &mut Option<TimerKey>) -> bool {
        if deadline <= self.now {
            return false;
        }
        if let Some(existing) = key {
            if let Some(entry) = self.entries.get_mut(existing.index) {
                if entry.seq == existing.seq {
                    if !entry.waker.will_wake(waker) {
                        entry.waker = waker.clone();
                    }
                    return true;
                }
            }
        }
        let seq: u64 = self.next_seq;
        self.next_seq += 1;
        let tid: Option<Tid> = current::tid();
        let index: usize = self.entries.insert(TimerEntry {
            tid,
            waker: waker.clone(),
            seq,
        });
        self.heap.push(Reverse((deadline, seq, index)));
        *key = Some(TimerKey { index, seq });
        trace!("register(): deadline={}, seq={}, tid={:?}", deadline, seq, tid);
        true
    }

    /// Drops a registration if it is still pending.
    fn deregister(&mut self, key: TimerKey) -> bool {
        match self.entries.get(key.index) {
            Some(entry) if entry.seq == key.seq => {
                self.entries.remove(key.index);
                self.compact();
                true
            },
            _ => false,
        }
    }

    /// Drops heap records left behind by removed entries once they outnumber the live ones.
    fn compact(&mut self) {
        if self.heap.len() <= 2 * self.entries.len() {
            return;
        }
        let entries: &Slab<TimerEntry> = &self.entries;
        self.heap
            .retain(|Reverse((_, seq, index))| entries.get(*index).is_some_and(|entry| entry.seq == *seq));
    }

    /// Moves the clock forward and collects the wakers of every expired entry, earliest first.
    fn expire(&mut self, now: Ticks) -> Vec<Waker> {
        assert!(self.now <= now, "timer cannot go backwards (now={}, requested={})", self.now, now);
        self.now = now;

        let mut expired: Vec<Waker> = Vec::new();
        while let Some(Reverse((deadline, seq, index))) = self.heap.peek().copied() {
            if deadline > now {
                break;
            }
            self.heap.pop();
            // Entries removed by drop or by task cancellation leave stale heap records behind.
            match self.entries.get(index) {
                Some(entry) if entry.seq == seq => {
                    let entry: TimerEntry = self.entries.remove(index);
                    expired.push(entry.waker);
                },
                _ => continue,
            }
        }
        expired
    }
}

impl SharedTimer {
    pub fn new() -> Self {
        Self(Arc::new(spin::Mutex::new(Timer::new())))
    }

    pub fn now(&self) -> Ticks {
        self.0.lock().now
    }

    /// Sets the clock to `now` and wakes every sleeper whose deadline is at or before it. Returns the number of tasks
    /// woken. The clock is monotonic: moving it backwards is an invariant violation.
    pub fn advance_to(&self, now: Ticks) -> usize {
        let expired: Vec<Waker> = self.0.lock().expire(now);
        Self::wake_all(expired)
    }

    /// Advances the clock by one tick.
    pub fn tick(&self) -> usize {
        let expired: Vec<Waker> = {
            let mut timer = self.0.lock();
            let now: Ticks = timer.now + 1;
            timer.expire(now)
        };
        Self::wake_all(expired)
    }

    fn wake_all(expired: Vec<Waker>) -> usize {
        let count: usize = expired.len();
        for waker in expired {
            waker.wake();
        }
        count
    }

    /// Removes every pending entry registered by `tid`. Returns the number removed.
    pub fn cancel_task(&self, tid: Tid) -> usize {
        let mut timer = self.0.lock();
        let before: usize = timer.entries.len();
        timer.entries.retain(|_, entry| entry.tid != Some(tid));
        let removed: usize = before - timer.entries.len();
        if removed > 0 {
            timer.compact();
            trace!("cancel_task(): tid={}, removed={}", tid, removed);
        }
        removed
    }

    /// Number of pending sleeps.
    pub fn pending(&self) -> usize {
        self.0.lock().entries.len()
    }

    /// Sleeps for `ticks` ticks from now.
    pub fn sleep(&self, ticks: u64) -> Sleep {
        let deadline: Ticks = self.now() + ticks;
        Sleep {
            inner: self.sleep_until(deadline),
        }
    }

    /// Sleeps until the clock reaches `deadline`.
    pub fn sleep_until(&self, deadline: Ticks) -> SleepUntil {
        SleepUntil {
            timer: self.clone(),
            deadline,
            key: None,
        }
    }

    /// Yields every `period` ticks, starting one period from now.
    pub fn interval(&self, period: u64) -> Result<Interval, Fail> {
        if period == 0 {
            let cause: &str = "interval period must be greater than zero";
            error!("interval(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        }
        Ok(Interval {
            timer: self.clone(),
            next: self.now() + period,
            period,
            sleep: None,
        })
    }
}

impl SleepUntil {
    pub fn deadline(&self) -> Ticks {
        self.deadline
    }
}

impl Sleep {
    pub fn deadline(&self) -> Ticks {
        self.inner.deadline
    }
}

/// Races `future` against `timeout`. Fails with `ETIMEDOUT` if the timer wins.
pub async fn with_timeout<F: Future>(future: F, timeout: Sleep) -> Result<F::Output, Fail> {
    let future = future.fuse();
    let timeout = timeout.fuse();
    ::futures::pin_mut!(future, timeout);
    ::futures::select_biased! {
        output = future => Ok(output),
        () = timeout => {
            let cause: &str = "timer expired";
            warn!("with_timeout(): {}", cause);
            Err(Fail::new(libc::ETIMEDOUT, cause))
        },
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Add<u64> for Ticks {
    type Output = Ticks;

    fn add(self, rhs: u64) -> Self::Output {
        Ticks(self.0.saturating_add(rhs))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for SharedTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Future for SleepUntil {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        let mut timer = self_.timer.0.lock();
        if timer.register(self_.deadline, ctx.waker(), &mut self_.key) {
            return Poll::Pending;
        }
        if let Some(key) = self_.key.take() {
            timer.deregister(key);
        }
        Poll::Ready(())
    }
}

impl Drop for SleepUntil {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.timer.0.lock().deregister(key);
        }
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(ctx)
    }
}

impl Stream for Interval {
    type Item = Ticks;

    fn poll_next(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let self_: &mut Self = self.get_mut();
        let deadline: Ticks = self_.next;
        let timer: &SharedTimer = &self_.timer;
        let sleep: &mut SleepUntil = self_.sleep.get_or_insert_with(|| timer.sleep_until(deadline));
        match Pin::new(sleep).poll(ctx) {
            Poll::Ready(()) => {
                self_.sleep = None;
                self_.next = deadline + self_.period;
                Poll::Ready(Some(deadline))
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for SharedTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let timer = self.0.lock();
        f.debug_struct("SharedTimer")
            .field("now", &timer.now)
            .field("pending", &timer.entries.len())
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
