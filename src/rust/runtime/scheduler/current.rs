// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Identity of the task an executor is currently polling on this thread.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::scheduler::{
    process::Pid,
    scheduler::{
        Scheduler,
        SchedulerInner,
    },
    task::Tid,
};
use ::std::{
    cell::RefCell,
    sync::Weak,
};

//==============================================================================
// Structures
//==============================================================================

#[derive(Clone)]
pub(super) struct Current {
    pub tid: Tid,
    pub pid: Pid,
    pub core: usize,
    pub scheduler: Weak<SchedulerInner>,
}

/// Restores the previous context when dropped.
pub(super) struct CurrentGuard {
    previous: Option<Current>,
}

//==============================================================================
// Static Variables
//==============================================================================

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Installs `current` for the duration of a poll.
pub(super) fn enter(current: Current) -> CurrentGuard {
    let previous: Option<Current> = CURRENT.with(|slot| slot.borrow_mut().replace(current));
    CurrentGuard { previous }
}

/// Task being polled on this thread, if any.
pub fn tid() -> Option<Tid> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|current| current.tid))
}

/// Process of the task being polled on this thread, if any.
pub fn pid() -> Option<Pid> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|current| current.pid))
}

/// Core whose executor is polling on this thread, if any.
pub fn core() -> Option<usize> {
    CURRENT.with(|slot| slot.borrow().as_ref().map(|current| current.core))
}

/// Scheduler that owns the task being polled on this thread, if any.
pub(super) fn scheduler() -> Option<Scheduler> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|current| current.scheduler.upgrade())
            .map(Scheduler::from_inner)
    })
}

/// Context of the calling task if it belongs to `scheduler`.
pub(super) fn within(scheduler: &Scheduler) -> Option<Current> {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|current| scheduler.owns(&current.scheduler))
            .cloned()
    })
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Drop for CurrentGuard {
    fn drop(&mut self) {
        let previous: Option<Current> = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
