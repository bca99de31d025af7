// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-core run queues and the executors that drain them.
//!
//! Every core owns one FIFO run queue. An executor pops the next ready task, polls its computation until the next
//! suspension point and then either puts it back at the tail (it woke itself), leaves it parked until a waker fires,
//! or runs its death path. When the queue is empty the core halts until a waker pushes a task or an interrupt is
//! delivered.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::scheduler::{
    current::{
        self,
        Current,
        CurrentGuard,
    },
    scheduler::Scheduler,
    task::{
        PollOutcome,
        Task,
    },
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::{
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

/// FIFO of ready tasks of one core, plus its interrupt line.
pub struct RunQueue {
    core: usize,
    tx: Sender<Arc<Task>>,
    rx: Receiver<Arc<Task>>,
    irq_tx: Sender<()>,
    irq_rx: Receiver<()>,
}

/// Drives the run queue of one core.
#[derive(Clone)]
pub struct Executor {
    core: usize,
    queue: Arc<RunQueue>,
    scheduler: Scheduler,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl RunQueue {
    pub(super) fn new(core: usize) -> Self {
        let (tx, rx): (Sender<Arc<Task>>, Receiver<Arc<Task>>) = crossbeam_channel::unbounded();
        let (irq_tx, irq_rx): (Sender<()>, Receiver<()>) = crossbeam_channel::unbounded();
        Self {
            core,
            tx,
            rx,
            irq_tx,
            irq_rx,
        }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    pub(super) fn push(&self, task: Arc<Task>) {
        // Both ends live in this structure, so the channel cannot be disconnected.
        if self.tx.send(task).is_err() {
            unreachable!("run queue of core {} is disconnected", self.core);
        }
    }

    fn try_pop(&self) -> Option<Arc<Task>> {
        self.rx.try_recv().ok()
    }

    /// Un-halts the core.
    pub(super) fn interrupt(&self) {
        if self.irq_tx.send(()).is_err() {
            unreachable!("interrupt line of core {} is disconnected", self.core);
        }
    }
}

impl Executor {
    pub(super) fn new(scheduler: Scheduler, queue: Arc<RunQueue>) -> Self {
        Self {
            core: queue.core(),
            queue,
            scheduler,
        }
    }

    pub fn core(&self) -> usize {
        self.core
    }

    /// Polls the task at the head of the run queue, if any. Returns false if the queue was empty.
    pub fn run_once(&self) -> bool {
        match self.queue.try_pop() {
            Some(task) => {
                self.poll_task(task);
                true
            },
            None => false,
        }
    }

    /// Polls until the run queue is empty, without halting. Returns the number of tasks taken off the queue.
    pub fn run_until_idle(&self) -> usize {
        let mut polled: usize = 0;
        while self.run_once() {
            polled += 1;
        }
        polled
    }

    /// Runs the core until the scheduler shuts down. The core halts whenever no task is ready.
    pub fn run(&self) {
        trace!("run(): starting core {}", self.core);
        loop {
            self.run_until_idle();
            if self.scheduler.is_shutdown() {
                break;
            }
            ::crossbeam_channel::select! {
                recv(self.queue.rx) -> task => match task {
                    Ok(task) => self.poll_task(task),
                    Err(_) => break,
                },
                recv(self.queue.irq_rx) -> _ => trace!("run(): core {} interrupted", self.core),
            }
        }
        trace!("run(): stopping core {}", self.core);
    }

    /// Delivers an interrupt to this core, waking it if halted.
    pub fn interrupt(&self) {
        self.queue.interrupt();
    }

    fn poll_task(&self, task: Arc<Task>) {
        if !task.begin_poll() {
            trace!("poll_task(): skipping dead task (tid={})", task.tid());
            return;
        }

        let poll: Poll<()> = {
            let _guard: CurrentGuard = current::enter(Current {
                tid: task.tid(),
                pid: task.pid(),
                core: self.core,
                scheduler: self.scheduler.downgrade(),
            });
            let waker: Waker = ::futures::task::waker(task.clone());
            let mut ctx: Context = Context::from_waker(&waker);
            task.poll_computation(&mut ctx)
        };

        match task.end_poll(poll.is_ready()) {
            PollOutcome::Yielded => self.queue.push(task),
            PollOutcome::Parked => {},
            PollOutcome::Finished(reason) => self.scheduler.finish(&task, reason),
        }
    }
}
