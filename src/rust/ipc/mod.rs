// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod mpmc;
pub mod pipe;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        current_pid,
        Pid,
        Process,
        Scheduler,
    },
};
use ::std::{
    error,
    fmt,
    sync::Arc,
};

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::pipe::{
    channel,
    pipe,
    pipe_with,
    Channel,
    Receiver,
    Sender,
    DEFAULT_PIPE_CAPACITY,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The other side of a channel is gone for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Closed;

/// Why a non-suspending send did not go through. The item is handed back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    Full(T),
    Closed(T),
}

/// Why a non-suspending receive returned nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(item) | TrySendError::Closed(item) => item,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Writes `data` to the pipe of process `pid`. Returns the number of bytes written, which is short only if the
/// process went away part way.
pub async fn send(scheduler: &Scheduler, pid: Pid, data: &[u8]) -> Result<usize, Fail> {
    let tx: Sender<u8> = match scheduler.process(pid).and_then(|process| process.ipc_sender()) {
        Some(tx) => tx,
        None => {
            let cause: String = format!("no such process (pid={})", pid);
            warn!("send(): {}", cause);
            return Err(Fail::new(libc::ESRCH, &cause));
        },
    };
    let sent: usize = tx.send_all(data).await;
    if sent == 0 && !data.is_empty() {
        return Err(Closed.into());
    }
    Ok(sent)
}

/// Reads from the pipe of the calling task's process. Must be called from inside a task.
pub async fn recv(buf: &mut [u8]) -> Result<usize, Fail> {
    let process: Option<Arc<Process>> = match (Scheduler::current(), current_pid()) {
        (Some(scheduler), Some(pid)) => scheduler.process(pid),
        _ => {
            let cause: &str = "called outside of a task";
            error!("recv(): {}", cause);
            return Err(Fail::new(libc::EINVAL, cause));
        },
    };
    let rx: Receiver<u8> = match process.and_then(|process| process.ipc_receiver()) {
        Some(rx) => rx,
        None => {
            let cause: &str = "process pipe is gone";
            warn!("recv(): {}", cause);
            return Err(Fail::new(libc::EPIPE, cause));
        },
    };
    Ok(rx.recv_slice(buf).await?)
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel closed")
    }
}

impl error::Error for Closed {}

impl From<Closed> for Fail {
    fn from(_: Closed) -> Self {
        Fail::new(libc::EPIPE, "channel closed")
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel is full"),
            TrySendError::Closed(_) => write!(f, "channel closed"),
        }
    }
}

impl<T: fmt::Debug> error::Error for TrySendError<T> {}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel is empty"),
            TryRecvError::Closed => write!(f, "channel closed"),
        }
    }
}

impl error::Error for TryRecvError {}
