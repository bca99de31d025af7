// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    ipc::mpmc,
    runtime::{
        fail::FreeErr,
        scheduler::{
            executor::RunQueue,
            process::Pid,
            stack::Stack,
        },
    },
};
use ::futures::task::ArcWake;
use ::std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{
            AtomicU64,
            Ordering,
        },
        Arc,
        Weak,
    },
    task::{
        Context,
        Poll,
    },
};

//==============================================================================
// Static Variables
//==============================================================================

/// Source of task identifiers. Identifiers are never reused.
static NEXT_TID: AtomicU64 = AtomicU64::new(1);

//==============================================================================
// Structures
//==============================================================================

/// Externally visible task identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Tid(u64);

/// Scheduling state of a task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in its core's run queue.
    Ready,
    /// Being polled by an executor.
    Running,
    /// Suspended until a registered waker fires.
    Sleeping,
    /// Finished or freed. Never scheduled again.
    Dead,
}

/// Why a task died.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The computation returned.
    Completed,
    /// The task was freed before its computation returned.
    Killed,
}

/// Notice delivered under [Cleanup::Notify].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Exit {
    pub tid: Tid,
    pub pid: Pid,
    pub reason: ExitReason,
}

/// What happens to the rest of the system when a task dies.
#[derive(Debug)]
pub enum Cleanup {
    /// Nobody is told.
    Detach,
    /// An [Exit] notice is sent on the channel.
    Notify(mpmc::Sender<Exit>),
    /// Children of the dead task are handed to the reaper.
    Orphan,
}

/// Read-only snapshot of a task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskInfo {
    pub tid: Tid,
    pub pid: Pid,
    pub parent: Option<Tid>,
    pub name: String,
    pub state: TaskState,
    pub core: usize,
    pub polls: u64,
}

pub(super) type Computation = Pin<Box<dyn Future<Output = ()> + Send>>;

/// What the executor does with a task after polling it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum PollOutcome {
    /// Woken during its own poll: back to the tail of the run queue.
    Yielded,
    /// Waiting on an event.
    Parked,
    /// Dead: the executor runs the death path.
    Finished(ExitReason),
}

/// Who runs the death path of a freed task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Teardown {
    /// The caller of free.
    Now,
    /// The executor currently polling the task, once the poll returns.
    Deferred,
}

struct Sched {
    state: TaskState,
    /// Woken while running.
    notified: bool,
}

/// Unit of scheduling.
pub struct Task {
    tid: Tid,
    pid: Pid,
    name: String,
    core: usize,
    parent: spin::Mutex<Option<Tid>>,
    cleanup: spin::Mutex<Option<Cleanup>>,
    sched: spin::Mutex<Sched>,
    computation: spin::Mutex<Option<Computation>>,
    stack: spin::Mutex<Option<Stack>>,
    polls: AtomicU64,
    queue: Weak<RunQueue>,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Tid {
    /// Issues the next identifier.
    pub(super) fn next() -> Self {
        Self(NEXT_TID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        tid: Tid,
        pid: Pid,
        name: String,
        core: usize,
        parent: Option<Tid>,
        cleanup: Cleanup,
        computation: Computation,
        stack: Stack,
        queue: Weak<RunQueue>,
    ) -> Self {
        Self {
            tid,
            pid,
            name,
            core,
            parent: spin::Mutex::new(parent),
            cleanup: spin::Mutex::new(Some(cleanup)),
            sched: spin::Mutex::new(Sched {
                state: TaskState::Ready,
                notified: false,
            }),
            computation: spin::Mutex::new(Some(computation)),
            stack: spin::Mutex::new(Some(stack)),
            polls: AtomicU64::new(0),
            queue,
        }
    }

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core(&self) -> usize {
        self.core
    }

    pub fn state(&self) -> TaskState {
        self.sched.lock().state
    }

    pub fn parent(&self) -> Option<Tid> {
        *self.parent.lock()
    }

    pub(super) fn set_parent(&self, parent: Option<Tid>) {
        *self.parent.lock() = parent;
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            tid: self.tid,
            pid: self.pid,
            parent: self.parent(),
            name: self.name.clone(),
            state: self.state(),
            core: self.core,
            polls: self.polls.load(Ordering::Relaxed),
        }
    }

    /// Moves a task popped from the run queue to `Running`. Returns false if it was freed while queued.
    pub(super) fn begin_poll(&self) -> bool {
        let mut sched = self.sched.lock();
        match sched.state {
            TaskState::Ready => {
                sched.state = TaskState::Running;
                sched.notified = false;
                true
            },
            TaskState::Dead => false,
            state => panic!("task {} found in the run queue while {}", self.tid, state),
        }
    }

    /// Polls the computation once.
    pub(super) fn poll_computation(&self, ctx: &mut Context<'_>) -> Poll<()> {
        self.polls.fetch_add(1, Ordering::Relaxed);
        let mut computation = self.computation.lock();
        match computation.as_mut() {
            Some(computation) => computation.as_mut().poll(ctx),
            None => Poll::Ready(()),
        }
    }

    /// Decides where the task goes after a poll.
    pub(super) fn end_poll(&self, completed: bool) -> PollOutcome {
        let mut sched = self.sched.lock();
        match sched.state {
            TaskState::Running if completed => {
                sched.state = TaskState::Dead;
                PollOutcome::Finished(ExitReason::Completed)
            },
            TaskState::Running if sched.notified => {
                sched.state = TaskState::Ready;
                sched.notified = false;
                PollOutcome::Yielded
            },
            TaskState::Running => {
                sched.state = TaskState::Sleeping;
                PollOutcome::Parked
            },
            // Freed during its own poll.
            TaskState::Dead => PollOutcome::Finished(ExitReason::Killed),
            state => panic!("task {} left a poll while {}", self.tid, state),
        }
    }

    /// Marks the task dead on behalf of `free`.
    pub(super) fn mark_dead(&self) -> Result<Teardown, FreeErr> {
        let mut sched = self.sched.lock();
        match sched.state {
            TaskState::Dead => Err(FreeErr::AlreadyFreeing),
            TaskState::Running => {
                sched.state = TaskState::Dead;
                Ok(Teardown::Deferred)
            },
            TaskState::Ready | TaskState::Sleeping => {
                sched.state = TaskState::Dead;
                Ok(Teardown::Now)
            },
        }
    }

    pub(super) fn take_computation(&self) -> Option<Computation> {
        self.computation.lock().take()
    }

    pub(super) fn take_cleanup(&self) -> Option<Cleanup> {
        self.cleanup.lock().take()
    }

    pub(super) fn take_stack(&self) -> Option<Stack> {
        self.stack.lock().take()
    }

    /// Puts a runnable task at the tail of its core's run queue.
    pub(super) fn enqueue(self: &Arc<Self>) {
        match self.queue.upgrade() {
            Some(queue) => queue.push(self.clone()),
            None => debug!("enqueue(): run queue is gone (tid={})", self.tid),
        }
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Tid> for u64 {
    fn from(value: Tid) -> Self {
        value.0
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Sleeping => "sleeping",
            TaskState::Dead => "dead",
        };
        write!(f, "{}", name)
    }
}

/// Waking a task makes it runnable again.
impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let runnable: bool = {
            let mut sched = arc_self.sched.lock();
            match sched.state {
                TaskState::Sleeping => {
                    sched.state = TaskState::Ready;
                    true
                },
                TaskState::Running => {
                    sched.notified = true;
                    false
                },
                TaskState::Ready => false,
                TaskState::Dead => {
                    debug!("wake_by_ref(): task is dead (tid={})", arc_self.tid);
                    false
                },
            }
        };
        if runnable {
            trace!("wake_by_ref(): tid={}", arc_self.tid);
            arc_self.enqueue();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("tid", &self.tid)
            .field("pid", &self.pid)
            .field("name", &self.name())
            .field("core", &self.core())
            .field("state", &self.state())
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================
