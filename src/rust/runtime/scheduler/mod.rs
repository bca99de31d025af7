// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub(crate) mod current;
mod executor;
mod handle;
mod process;
#[allow(clippy::module_inception)]
mod scheduler;
mod stack;
mod task;
mod yielder;

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::timer::{
    Interval,
    Sleep,
    SleepUntil,
    Ticks,
};

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    executor::Executor,
    handle::JoinHandle,
    process::{
        AddressSpace,
        Pid,
        Process,
        ProcessImage,
        ResourceTable,
    },
    scheduler::Scheduler,
    stack::{
        HeapStacks,
        Stack,
        StackAllocator,
    },
    task::{
        Cleanup,
        Exit,
        ExitReason,
        TaskInfo,
        TaskState,
        Tid,
    },
    yielder::{
        yield_now,
        yield_times,
        YieldNow,
    },
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Scheduler of the calling task.
///
/// # Panics
///
/// Panics when called outside of a task.
fn this_scheduler(caller: &str) -> Scheduler {
    match Scheduler::current() {
        Some(scheduler) => scheduler,
        None => panic!("{}(): called outside of a task", caller),
    }
}

/// Task being polled on this thread, if any.
pub fn current_tid() -> Option<Tid> {
    current::tid()
}

/// Process of the task being polled on this thread, if any.
pub fn current_pid() -> Option<Pid> {
    current::pid()
}

/// Core whose executor is polling on this thread, if any.
pub fn current_core() -> Option<usize> {
    current::core()
}

/// Suspends the calling task for `ticks` ticks.
///
/// # Panics
///
/// Panics when called outside of a task. Code running outside a task sleeps through [Scheduler::timer].
pub fn sleep(ticks: u64) -> Sleep {
    this_scheduler("sleep").timer().sleep(ticks)
}

/// Suspends the calling task until the clock reaches `deadline`.
///
/// # Panics
///
/// Panics when called outside of a task.
pub fn sleep_until(deadline: Ticks) -> SleepUntil {
    this_scheduler("sleep_until").timer().sleep_until(deadline)
}

/// Periodic stream on the calling task's scheduler.
///
/// # Panics
///
/// Panics when called outside of a task.
pub fn interval(period: u64) -> Result<Interval, crate::runtime::fail::Fail> {
    this_scheduler("interval").timer().interval(period)
}

//==============================================================================
// Unit Tests
//==============================================================================
