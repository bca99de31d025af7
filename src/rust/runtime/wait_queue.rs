// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Waker registry used by every component a task can block on.
//!
//! A suspended future parks itself in a [WaitQueue] through a [WaitSlot]. Whoever makes progress possible takes one
//! or all wakers out of the queue and invokes them once its own lock is released. Entries are removed when the owning
//! future completes or is dropped, so a freed task never leaves a wake target behind.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::{
    current,
    Tid,
};
use ::std::{
    collections::BTreeMap,
    task::Waker,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies an entry of a [WaitQueue]. Keys are never reused within a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct WaitKey(u64);

struct Waiter {
    /// Task that parked this entry, if it was parked from inside a task.
    tid: Option<Tid>,
    waker: Waker,
}

/// FIFO queue of parked wakers.
pub struct WaitQueue {
    waiters: BTreeMap<WaitKey, Waiter>,
    next_key: u64,
}

/// The parking state of one future on one [WaitQueue].
#[derive(Default, Debug)]
pub struct WaitSlot {
    key: Option<WaitKey>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: BTreeMap::new(),
            next_key: 0,
        }
    }

    /// Parks `waker`. If `key` still names a live entry its waker is refreshed in place, keeping its position.
    fn register(&mut self, key: &mut Option<WaitKey>, waker: &Waker) {
        if let Some(existing) = key {
            if let Some(waiter) = self.waiters.get_mut(existing) {
                if !waiter.waker.will_wake(waker) {
                    waiter.waker = waker.clone();
                }
                return;
            }
        }
        let new_key: WaitKey = WaitKey(self.next_key);
        self.next_key += 1;
        self.waiters.insert(
            new_key,
            Waiter {
                tid: current::tid(),
                waker: waker.clone(),
            },
        );
        *key = Some(new_key);
    }

    /// Removes an entry. Returns false if the entry was already taken by a wake.
    fn remove(&mut self, key: WaitKey) -> bool {
        self.waiters.remove(&key).is_some()
    }

    /// Takes the oldest parked waker.
    pub fn take_one(&mut self) -> Option<Waker> {
        let (_, waiter): (WaitKey, Waiter) = self.waiters.pop_first()?;
        if let Some(tid) = waiter.tid {
            trace!("take_one(): waking tid={}", tid);
        }
        Some(waiter.waker)
    }

    /// Takes every parked waker, oldest first.
    pub fn take_all(&mut self) -> Vec<Waker> {
        let waiters: BTreeMap<WaitKey, Waiter> = ::std::mem::take(&mut self.waiters);
        waiters.into_values().map(|waiter| waiter.waker).collect()
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

impl WaitSlot {
    pub const fn new() -> Self {
        Self { key: None }
    }

    /// Parks (or re-parks) the current future on `queue`.
    pub fn park(&mut self, queue: &mut WaitQueue, waker: &Waker) {
        queue.register(&mut self.key, waker);
    }

    /// Leaves `queue` after the awaited condition was met.
    pub fn complete(&mut self, queue: &mut WaitQueue) {
        if let Some(key) = self.key.take() {
            queue.remove(key);
        }
    }

    /// Leaves `queue` without having consumed the condition. If a wake was already delivered to this slot it is
    /// handed to the next waiter instead of being lost; the returned waker must be invoked by the caller.
    pub fn cancel(&mut self, queue: &mut WaitQueue) -> Option<Waker> {
        let key: WaitKey = self.key.take()?;
        if queue.remove(key) {
            None
        } else {
            queue.take_one()
        }
    }

    pub fn is_parked(&self) -> bool {
        self.key.is_some()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
