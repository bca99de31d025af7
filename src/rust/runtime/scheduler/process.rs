// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::{
    ipc::pipe::{
        Channel,
        Receiver,
        Sender,
    },
    runtime::scheduler::task::Tid,
};
use ::std::{
    collections::BTreeSet,
    fmt,
    num::NonZeroUsize,
    sync::atomic::{
        AtomicBool,
        AtomicU64,
        Ordering,
    },
};

//==============================================================================
// Static Variables
//==============================================================================

/// Source of process identifiers. Identifiers are never reused.
static NEXT_PID: AtomicU64 = AtomicU64::new(1);

//==============================================================================
// Traits
//==============================================================================

/// Address space of a process, released when the process dies.
pub trait AddressSpace: Send {
    fn release(self: Box<Self>);
}

/// Resources held by a process (open files, devices), closed when the process dies.
pub trait ResourceTable: Send {
    fn close(self: Box<Self>);
}

//==============================================================================
// Structures
//==============================================================================

/// Externally visible process identifier.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Pid(u64);

/// Everything needed to start a process besides its first task.
pub struct ProcessImage {
    name: String,
    address_space: Option<Box<dyn AddressSpace>>,
    resources: Option<Box<dyn ResourceTable>>,
}

/// A group of tasks sharing an address space and a resource table.
pub struct Process {
    pid: Pid,
    name: String,
    /// Processes that outlive their tasks (the kernel).
    persistent: bool,
    tasks: spin::Mutex<BTreeSet<Tid>>,
    address_space: spin::Mutex<Option<Box<dyn AddressSpace>>>,
    resources: spin::Mutex<Option<Box<dyn ResourceTable>>>,
    /// Byte pipe other tasks use to message this process.
    simple_ipc: spin::Mutex<Option<(Sender<u8>, Receiver<u8>)>>,
    torn_down: AtomicBool,
    should_terminate: AtomicBool,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl Pid {
    /// Issues the next identifier.
    pub(super) fn next() -> Self {
        Self(NEXT_PID.fetch_add(1, Ordering::Relaxed))
    }
}

impl ProcessImage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            address_space: None,
            resources: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_address_space(mut self, address_space: Box<dyn AddressSpace>) -> Self {
        self.address_space = Some(address_space);
        self
    }

    pub fn with_resources(mut self, resources: Box<dyn ResourceTable>) -> Self {
        self.resources = Some(resources);
        self
    }
}

impl Process {
    pub(super) fn new(pid: Pid, image: ProcessImage, persistent: bool, pipe_capacity: NonZeroUsize) -> Self {
        Self {
            pid,
            name: image.name,
            persistent,
            tasks: spin::Mutex::new(BTreeSet::new()),
            address_space: spin::Mutex::new(image.address_space),
            resources: spin::Mutex::new(image.resources),
            simple_ipc: spin::Mutex::new(Some(Channel::with_capacity(pipe_capacity).split())),
            torn_down: AtomicBool::new(false),
            should_terminate: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Identifiers of the live tasks of this process.
    pub fn tasks(&self) -> Vec<Tid> {
        self.tasks.lock().iter().copied().collect()
    }

    pub fn num_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Set once the process has been asked to exit. Tasks may poll this at their own suspension points.
    pub fn should_terminate(&self) -> bool {
        self.should_terminate.load(Ordering::Acquire)
    }

    pub(super) fn request_termination(&self) {
        self.should_terminate.store(true, Ordering::Release);
    }

    /// Sending end of the process pipe, if the process is still alive.
    pub fn ipc_sender(&self) -> Option<Sender<u8>> {
        self.simple_ipc.lock().as_ref().map(|(tx, _)| tx.clone())
    }

    /// Receiving end of the process pipe, if the process is still alive.
    pub fn ipc_receiver(&self) -> Option<Receiver<u8>> {
        self.simple_ipc.lock().as_ref().map(|(_, rx)| rx.clone())
    }

    pub(super) fn attach(&self, tid: Tid) {
        self.tasks.lock().insert(tid);
    }

    /// Removes a task. Returns true if it was the last one.
    pub(super) fn detach(&self, tid: Tid) -> bool {
        let mut tasks = self.tasks.lock();
        tasks.remove(&tid);
        tasks.is_empty()
    }

    /// Releases the address space and closes every resource. Runs at most once; later calls return false.
    pub(super) fn teardown(&self) -> bool {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            debug!("teardown(): process already torn down (pid={})", self.pid);
            return false;
        }
        let address_space: Option<Box<dyn AddressSpace>> = self.address_space.lock().take();
        if let Some(address_space) = address_space {
            address_space.release();
        }
        let resources: Option<Box<dyn ResourceTable>> = self.resources.lock().take();
        if let Some(resources) = resources {
            resources.close();
        }
        let simple_ipc: Option<(Sender<u8>, Receiver<u8>)> = self.simple_ipc.lock().take();
        drop(simple_ipc);
        trace!("teardown(): pid={}, name={:?}", self.pid, self.name);
        true
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Pid> for u64 {
    fn from(value: Pid) -> Self {
        value.0
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("tasks", &self.num_tasks())
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::{
        AddressSpace,
        Pid,
        Process,
        ProcessImage,
        ResourceTable,
    };
    use crate::runtime::scheduler::task::Tid;
    use ::anyhow::Result;
    use ::std::{
        num::NonZeroUsize,
        sync::{
            atomic::{
                AtomicUsize,
                Ordering,
            },
            Arc,
        },
    };

    struct Counted(Arc<AtomicUsize>);

    impl AddressSpace for Counted {
        fn release(self: Box<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ResourceTable for Counted {
        fn close(self: Box<Self>) {
            self.0.fetch_add(10, Ordering::SeqCst);
        }
    }

    #[test]
    fn teardown_runs_once() -> Result<()> {
        let released: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
        let image: ProcessImage = ProcessImage::new("init")
            .with_address_space(Box::new(Counted(released.clone())))
            .with_resources(Box::new(Counted(released.clone())));
        let capacity: NonZeroUsize = NonZeroUsize::new(8).ok_or(anyhow::anyhow!("zero capacity"))?;
        let process: Process = Process::new(Pid::next(), image, false, capacity);

        let tid: Tid = Tid::next();
        process.attach(tid);
        crate::ensure_eq!(process.tasks(), vec![tid]);
        crate::ensure_eq!(process.detach(tid), true);

        crate::ensure_eq!(process.teardown(), true);
        crate::ensure_eq!(process.teardown(), false);
        crate::ensure_eq!(released.load(Ordering::SeqCst), 11);
        crate::ensure_eq!(process.ipc_sender().is_none(), true);
        Ok(())
    }
}
