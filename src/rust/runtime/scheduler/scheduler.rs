// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Task and process registry.
//!
//! A [Scheduler] lives from boot to shutdown. It hands out task and process identifiers, owns the per-core run
//! queues and the timer, and runs the death path of every task: the computation is dropped (which unregisters it
//! from every channel and timer it waits on), the cleanup policy runs, the stack goes back to the allocator and the
//! owning process is torn down once its last task is gone.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    ipc::TrySendError,
    runtime::{
        config::Config,
        fail::{
            AllocErr,
            Fail,
            FreeErr,
        },
        scheduler::{
            current,
            executor::{
                Executor,
                RunQueue,
            },
            handle::JoinHandle,
            process::{
                Pid,
                Process,
                ProcessImage,
            },
            stack::{
                HeapStacks,
                Stack,
                StackAllocator,
            },
            task::{
                Cleanup,
                Computation,
                Exit,
                ExitReason,
                Task,
                TaskInfo,
                Teardown,
                Tid,
            },
        },
        timer::{
            SharedTimer,
            Ticks,
        },
    },
};
use ::futures::channel::oneshot;
use ::std::{
    collections::BTreeMap,
    future::Future,
    num::NonZeroUsize,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        Weak,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

pub struct SchedulerInner {
    max_tasks: usize,
    stack_size: usize,
    pipe_capacity: NonZeroUsize,
    tasks: spin::Mutex<BTreeMap<Tid, Arc<Task>>>,
    processes: spin::Mutex<BTreeMap<Pid, Arc<Process>>>,
    cores: Vec<Arc<RunQueue>>,
    timer: SharedTimer,
    stacks: Box<dyn StackAllocator>,
    kernel: Arc<Process>,
    reaper: spin::Mutex<Option<Tid>>,
    shutdown: AtomicBool,
}

/// Task Scheduler
#[derive(Clone)]
pub struct Scheduler(Arc<SchedulerInner>);

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Scheduler {
    /// Boots a scheduler with heap-backed stacks.
    pub fn new(config: &Config) -> Result<Self, Fail> {
        let stacks: HeapStacks = HeapStacks::new(config.stack_budget()?);
        Self::with_stacks(config, Box::new(stacks))
    }

    /// Boots a scheduler that takes task stacks from `stacks`.
    pub fn with_stacks(config: &Config, stacks: Box<dyn StackAllocator>) -> Result<Self, Fail> {
        let num_cores: usize = config.cores()?;
        let pipe_capacity: NonZeroUsize = match NonZeroUsize::new(config.pipe_capacity()?) {
            Some(capacity) => capacity,
            None => return Err(Fail::new(libc::EINVAL, "pipe capacity must be greater than zero")),
        };
        let kernel: Arc<Process> = Arc::new(Process::new(
            Pid::next(),
            ProcessImage::new("kernel"),
            true,
            pipe_capacity,
        ));
        let mut processes: BTreeMap<Pid, Arc<Process>> = BTreeMap::new();
        processes.insert(kernel.pid(), kernel.clone());
        let cores: Vec<Arc<RunQueue>> = (0..num_cores).map(|core| Arc::new(RunQueue::new(core))).collect();

        trace!("new(): cores={}, kernel pid={}", num_cores, kernel.pid());
        Ok(Self(Arc::new(SchedulerInner {
            max_tasks: config.max_tasks()?,
            stack_size: config.stack_size()?,
            pipe_capacity,
            tasks: spin::Mutex::new(BTreeMap::new()),
            processes: spin::Mutex::new(processes),
            cores,
            timer: SharedTimer::new(),
            stacks,
            kernel,
            reaper: spin::Mutex::new(None),
            shutdown: AtomicBool::new(false),
        })))
    }

    /// Scheduler of the task being polled on this thread.
    pub fn current() -> Option<Scheduler> {
        current::scheduler()
    }

    pub(super) fn from_inner(inner: Arc<SchedulerInner>) -> Self {
        Self(inner)
    }

    pub(super) fn downgrade(&self) -> Weak<SchedulerInner> {
        Arc::downgrade(&self.0)
    }

    pub(super) fn owns(&self, inner: &Weak<SchedulerInner>) -> bool {
        Weak::as_ptr(inner) == Arc::as_ptr(&self.0)
    }

    /// Executor for `core`.
    pub fn executor(&self, core: usize) -> Option<Executor> {
        let queue: Arc<RunQueue> = self.0.cores.get(core)?.clone();
        Some(Executor::new(self.clone(), queue))
    }

    pub fn cores(&self) -> usize {
        self.0.cores.len()
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.0.timer
    }

    pub fn now(&self) -> Ticks {
        self.0.timer.now()
    }

    /// Tick source: advances the clock by one tick and wakes expired sleepers.
    pub fn tick(&self) -> usize {
        self.0.timer.tick()
    }

    /// Tick source: sets the clock and wakes expired sleepers.
    pub fn advance_to(&self, now: Ticks) -> usize {
        self.0.timer.advance_to(now)
    }

    /// Spawns a task in the caller's process, on the caller's core. Outside a task the kernel process and core 0 are
    /// used.
    pub fn spawn<F>(&self, name: &str, computation: F, cleanup: Cleanup) -> Result<Tid, AllocErr>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (pid, core, parent): (Pid, usize, Option<Tid>) = match current::within(self) {
            Some(current) => (current.pid, current.core, Some(current.tid)),
            None => (self.0.kernel.pid(), 0, None),
        };
        let process: Arc<Process> = self.process(pid).unwrap_or_else(|| self.0.kernel.clone());
        self.spawn_task(&process, core, name, Box::pin(computation), cleanup, parent)
    }

    /// Spawns a task in the caller's process on a given core.
    pub fn spawn_on<F>(&self, core: usize, name: &str, computation: F, cleanup: Cleanup) -> Result<Tid, Fail>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if core >= self.cores() {
            let cause: String = format!("no such core (core={:?})", core);
            error!("spawn_on(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        let (pid, parent): (Pid, Option<Tid>) = match current::within(self) {
            Some(current) => (current.pid, Some(current.tid)),
            None => (self.0.kernel.pid(), None),
        };
        let process: Arc<Process> = self.process(pid).unwrap_or_else(|| self.0.kernel.clone());
        Ok(self.spawn_task(&process, core, name, Box::pin(computation), cleanup, parent)?)
    }

    /// Creates a process whose first task runs `computation`.
    pub fn spawn_process<F>(
        &self,
        image: ProcessImage,
        computation: F,
        cleanup: Cleanup,
    ) -> Result<(Pid, Tid), AllocErr>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (core, parent): (usize, Option<Tid>) = match current::within(self) {
            Some(current) => (current.core, Some(current.tid)),
            None => (0, None),
        };
        let name: String = image.name().to_string();
        let process: Arc<Process> = Arc::new(Process::new(Pid::next(), image, false, self.0.pipe_capacity));
        let pid: Pid = process.pid();
        self.0.processes.lock().insert(pid, process.clone());

        match self.spawn_task(&process, core, &name, Box::pin(computation), cleanup, parent) {
            Ok(tid) => {
                trace!("spawn_process(): pid={}, name={:?}", pid, name);
                Ok((pid, tid))
            },
            Err(e) => {
                self.0.processes.lock().remove(&pid);
                process.teardown();
                Err(e)
            },
        }
    }

    /// Spawns a task whose output can be awaited through the returned handle.
    pub fn spawn_with_handle<F, T>(&self, name: &str, computation: F, cleanup: Cleanup) -> Result<JoinHandle<T>, AllocErr>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx): (oneshot::Sender<T>, oneshot::Receiver<T>) = oneshot::channel();
        let tid: Tid = self.spawn(
            name,
            async move {
                let output: T = computation.await;
                // The handle may have been dropped.
                let _ = tx.send(output);
            },
            cleanup,
        )?;
        Ok(JoinHandle::new(tid, rx))
    }

    fn spawn_task(
        &self,
        process: &Arc<Process>,
        core: usize,
        name: &str,
        computation: Computation,
        cleanup: Cleanup,
        parent: Option<Tid>,
    ) -> Result<Tid, AllocErr> {
        if self.num_tasks() >= self.0.max_tasks {
            warn!("spawn(): {} (max_tasks={})", AllocErr::TaskTableFull, self.0.max_tasks);
            return Err(AllocErr::TaskTableFull);
        }
        let stack: Stack = self.0.stacks.alloc_stack(self.0.stack_size)?;
        let queue: &Arc<RunQueue> = &self.0.cores[core];

        let tid: Tid = Tid::next();
        let task: Arc<Task> = Arc::new(Task::new(
            tid,
            process.pid(),
            name.to_string(),
            core,
            parent,
            cleanup,
            computation,
            stack,
            Arc::downgrade(queue),
        ));

        {
            let mut tasks = self.0.tasks.lock();
            // Another spawner may have taken the last slot since the check above.
            if tasks.len() >= self.0.max_tasks {
                drop(tasks);
                if let Some(stack) = task.take_stack() {
                    self.0.stacks.free_stack(stack);
                }
                warn!("spawn(): {} (max_tasks={})", AllocErr::TaskTableFull, self.0.max_tasks);
                return Err(AllocErr::TaskTableFull);
            }
            tasks.insert(tid, task.clone());
        }
        process.attach(tid);

        trace!("spawn(): tid={}, pid={}, core={}, name={:?}", tid, process.pid(), core, name);
        queue.push(task);
        Ok(tid)
    }

    /// Forcibly terminates a task. A task that is being polled dies as soon as its poll returns.
    pub fn free(&self, tid: Tid) -> Result<(), FreeErr> {
        let task: Arc<Task> = match self.0.tasks.lock().get(&tid) {
            Some(task) => task.clone(),
            None => {
                warn!("free(): {} (tid={})", FreeErr::NoSuchTask, tid);
                return Err(FreeErr::NoSuchTask);
            },
        };
        match task.mark_dead() {
            Ok(Teardown::Now) => self.finish(&task, ExitReason::Killed),
            Ok(Teardown::Deferred) => trace!("free(): deferred until poll returns (tid={})", tid),
            Err(e) => {
                warn!("free(): {} (tid={})", e, tid);
                return Err(e);
            },
        }
        Ok(())
    }

    /// Asks a process to terminate and frees all of its tasks. Returns the number of tasks freed.
    pub fn kill(&self, pid: Pid) -> Result<usize, Fail> {
        let process: Arc<Process> = match self.process(pid) {
            Some(process) => process,
            None => {
                let cause: String = format!("no such process (pid={})", pid);
                warn!("kill(): {}", cause);
                return Err(Fail::new(libc::ESRCH, &cause));
            },
        };
        process.request_termination();
        let mut freed: usize = 0;
        for tid in process.tasks() {
            match self.free(tid) {
                Ok(()) => freed += 1,
                Err(e) => debug!("kill(): {} (tid={})", e, tid),
            }
        }
        Ok(freed)
    }

    /// Runs the death path of a task already marked dead.
    pub(super) fn finish(&self, task: &Arc<Task>, reason: ExitReason) {
        let tid: Tid = task.tid();
        let pid: Pid = task.pid();

        // Dropping the computation drops every future it was suspended on, which unregisters its wakers.
        let computation: Option<Computation> = task.take_computation();
        drop(computation);
        self.0.timer.cancel_task(tid);
        self.0.tasks.lock().remove(&tid);

        match task.take_cleanup() {
            None | Some(Cleanup::Detach) => {},
            Some(Cleanup::Notify(tx)) => match tx.try_send(Exit { tid, pid, reason }) {
                Ok(()) => {},
                Err(TrySendError::Full(exit)) => warn!("finish(): exit notice dropped, channel full ({:?})", exit),
                Err(TrySendError::Closed(exit)) => debug!("finish(): nobody listens for {:?}", exit),
            },
            Some(Cleanup::Orphan) => self.reparent_children(tid),
        }

        if let Some(stack) = task.take_stack() {
            self.0.stacks.free_stack(stack);
        }

        let process: Option<Arc<Process>> = self.process(pid);
        if let Some(process) = process {
            if process.detach(tid) && !process.is_persistent() {
                self.0.processes.lock().remove(&pid);
                process.teardown();
            }
        }
        trace!("finish(): tid={}, pid={}, reason={:?}", tid, pid, reason);
    }

    /// Hands the children of `tid` to the reaper.
    fn reparent_children(&self, tid: Tid) {
        let reaper: Option<Tid> = self.reaper();
        let tasks = self.0.tasks.lock();
        for child in tasks.values().filter(|task| task.parent() == Some(tid)) {
            trace!("reparent_children(): tid={}, new parent={:?}", child.tid(), reaper);
            child.set_parent(reaper);
        }
    }

    /// Snapshot of a live task.
    pub fn lookup(&self, tid: Tid) -> Option<TaskInfo> {
        let task: Arc<Task> = self.0.tasks.lock().get(&tid)?.clone();
        Some(task.info())
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<Process>> {
        self.0.processes.lock().get(&pid).cloned()
    }

    pub fn kernel_pid(&self) -> Pid {
        self.0.kernel.pid()
    }

    /// Designates the task that inherits the children of `Orphan` tasks.
    pub fn set_reaper(&self, tid: Tid) {
        *self.0.reaper.lock() = Some(tid);
    }

    pub fn reaper(&self) -> Option<Tid> {
        *self.0.reaper.lock()
    }

    pub fn num_tasks(&self) -> usize {
        self.0.tasks.lock().len()
    }

    pub fn num_processes(&self) -> usize {
        self.0.processes.lock().len()
    }

    /// Stops every executor at its next halt.
    pub fn shutdown(&self) {
        if self.0.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!("shutdown(): stopping {} cores", self.cores());
        for queue in &self.0.cores {
            queue.interrupt();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.shutdown.load(Ordering::Acquire)
    }

    /// Drains every core until no task is ready anywhere. Returns the number of polls.
    pub fn run_until_idle(&self) -> usize {
        let executors: Vec<Executor> = (0..self.cores()).filter_map(|core| self.executor(core)).collect();
        let mut total: usize = 0;
        loop {
            let polled: usize = executors.iter().map(|executor| executor.run_until_idle()).sum();
            if polled == 0 {
                return total;
            }
            total += polled;
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
