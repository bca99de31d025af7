// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    ipc::Closed,
    runtime::scheduler::task::Tid,
};
use ::futures::channel::oneshot;
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

/// Resolves to the output of a spawned task, or to [Closed] if the task was freed before it finished.
#[must_use = "dropping a join handle detaches the task"]
pub struct JoinHandle<T> {
    tid: Tid,
    rx: oneshot::Receiver<T>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl<T> JoinHandle<T> {
    pub(super) fn new(tid: Tid, rx: oneshot::Receiver<T>) -> Self {
        Self { tid, rx }
    }

    /// Task this handle waits on.
    pub fn tid(&self) -> Tid {
        self.tid
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, Closed>;

    fn poll(mut self: Pin<&mut Self>, ctx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(ctx) {
            Poll::Ready(Ok(output)) => Poll::Ready(Ok(output)),
            Poll::Ready(Err(oneshot::Canceled)) => {
                debug!("poll(): task exited without output (tid={})", self.tid);
                Poll::Ready(Err(Closed))
            },
            Poll::Pending => Poll::Pending,
        }
    }
}
