// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::std::{
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//==============================================================================
// Structures
//==============================================================================

/// Future that lets the running task cooperatively give up the core. Each yield puts the task back at the tail of
/// its run queue.
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    /// How many more times should we yield?
    remaining: usize,
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Yields once.
pub fn yield_now() -> YieldNow {
    yield_times(1)
}

/// Yields `n` times in a row.
pub fn yield_times(n: usize) -> YieldNow {
    YieldNow { remaining: n }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.remaining == 0 {
            return Poll::Ready(());
        }
        self_.remaining -= 1;
        ctx.waker().wake_by_ref();
        Poll::Pending
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
