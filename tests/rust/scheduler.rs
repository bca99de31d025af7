// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Drives full schedulers with manual ticks.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::futures::future::pending;
use ::hyperion::{
    ensure_eq,
    ipc::{
        self,
        mpmc,
        pipe,
        Receiver,
        Sender,
    },
    runtime::scheduler::current_tid,
    sleep,
    yield_now,
    AddressSpace,
    Cleanup,
    Closed,
    Config,
    Exit,
    ExitReason,
    JoinHandle,
    Pid,
    ProcessImage,
    ResourceTable,
    Scheduler,
    TaskState,
    Ticks,
    Tid,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::{
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Arc,
        Mutex,
    },
    thread,
};

//==============================================================================
// Helpers
//==============================================================================

fn boot(config: &str) -> Result<Scheduler> {
    Ok(Scheduler::new(&Config::parse(config)?)?)
}

/// Advances the clock one tick at a time up to `until`, draining every core after each tick.
fn run_to(scheduler: &Scheduler, until: u64) {
    while scheduler.now() < Ticks::new(until) {
        scheduler.tick();
        scheduler.run_until_idle();
    }
}

struct Counted(Arc<AtomicUsize>);

impl AddressSpace for Counted {
    fn release(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl ResourceTable for Counted {
    fn close(self: Box<Self>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

//==============================================================================
// Tests
//==============================================================================

#[test]
fn tids_are_unique_and_increasing() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let mut previous: Option<Tid> = None;
    for _ in 0..32 {
        let tid: Tid = scheduler.spawn("noop", async {}, Cleanup::Detach)?;
        ensure_eq!(previous < Some(tid), true);
        previous = Some(tid);
    }
    scheduler.run_until_idle();
    ensure_eq!(scheduler.num_tasks(), 0);
    Ok(())
}

#[test]
fn sleep_wakes_at_deadline() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    scheduler.advance_to(Ticks::new(10));

    let woke_at: Arc<Mutex<Option<Ticks>>> = Arc::new(Mutex::new(None));
    let woke_at_: Arc<Mutex<Option<Ticks>>> = woke_at.clone();
    let timer = scheduler.timer().clone();
    let tid: Tid = scheduler.spawn(
        "sleeper",
        async move {
            sleep(5).await;
            *woke_at_.lock().unwrap() = Some(timer.now());
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(scheduler.lookup(tid).map(|info| info.state), Some(TaskState::Sleeping));

    run_to(&scheduler, 14);
    ensure_eq!(*woke_at.lock().unwrap(), None);
    run_to(&scheduler, 15);
    ensure_eq!(*woke_at.lock().unwrap(), Some(Ticks::new(15)));
    ensure_eq!(scheduler.timer().pending(), 0);
    Ok(())
}

#[test]
fn freeing_a_sleeper_cancels_its_timer() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let woken: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let woken_: Arc<AtomicUsize> = woken.clone();
    let tid: Tid = scheduler.spawn(
        "sleeper",
        async move {
            sleep(100).await;
            woken_.fetch_add(1, Ordering::SeqCst);
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(scheduler.timer().pending(), 1);

    scheduler.free(tid)?;
    ensure_eq!(scheduler.timer().pending(), 0);
    ensure_eq!(scheduler.lookup(tid), None);
    ensure_eq!(scheduler.advance_to(Ticks::new(200)), 0);
    scheduler.run_until_idle();
    ensure_eq!(woken.load(Ordering::SeqCst), 0);
    Ok(())
}

#[test]
fn equal_deadlines_wake_in_spawn_order() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let mut rng: SmallRng = SmallRng::seed_from_u64(0x5eed);
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let mut deadlines: Vec<(u64, usize)> = Vec::new();
    for id in 0..24 {
        let ticks: u64 = rng.gen_range(1..6);
        deadlines.push((ticks, id));
        let order_: Arc<Mutex<Vec<usize>>> = order.clone();
        scheduler.spawn(
            "sleeper",
            async move {
                sleep(ticks).await;
                order_.lock().unwrap().push(id);
            },
            Cleanup::Detach,
        )?;
    }
    scheduler.run_until_idle();
    run_to(&scheduler, 6);

    deadlines.sort();
    let expected: Vec<usize> = deadlines.into_iter().map(|(_, id)| id).collect();
    ensure_eq!(*order.lock().unwrap(), expected);
    Ok(())
}

#[test]
fn notify_reports_killed_task() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let (tx, rx): (mpmc::Sender<Exit>, mpmc::Receiver<Exit>) = mpmc::unbounded();
    let tid: Tid = scheduler.spawn("victim", pending::<()>(), Cleanup::Notify(tx))?;
    scheduler.run_until_idle();
    scheduler.free(tid)?;

    let exit: Exit = rx.try_recv()?;
    ensure_eq!(exit.tid, tid);
    ensure_eq!(exit.reason, ExitReason::Killed);
    // The only sender died with the task.
    ensure_eq!(rx.try_recv(), Err(ipc::TryRecvError::Closed));
    Ok(())
}

#[test]
fn orphans_are_handed_to_the_reaper() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let reaper: Tid = scheduler.spawn("reaper", pending::<()>(), Cleanup::Detach)?;
    scheduler.set_reaper(reaper);

    let child: Arc<Mutex<Option<Tid>>> = Arc::new(Mutex::new(None));
    let child_: Arc<Mutex<Option<Tid>>> = child.clone();
    let scheduler_: Scheduler = scheduler.clone();
    let parent: Tid = scheduler.spawn(
        "parent",
        async move {
            let tid: Option<Tid> = scheduler_.spawn("child", pending::<()>(), Cleanup::Detach).ok();
            *child_.lock().unwrap() = tid;
            pending::<()>().await;
        },
        Cleanup::Orphan,
    )?;
    scheduler.run_until_idle();

    let child: Tid = child.lock().unwrap().ok_or(anyhow::anyhow!("child was not spawned"))?;
    ensure_eq!(scheduler.lookup(child).and_then(|info| info.parent), Some(parent));
    scheduler.free(parent)?;
    ensure_eq!(scheduler.lookup(child).and_then(|info| info.parent), Some(reaper));
    Ok(())
}

#[test]
fn process_is_torn_down_once_after_last_task() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let released: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let image: ProcessImage = ProcessImage::new("worker")
        .with_address_space(Box::new(Counted(released.clone())))
        .with_resources(Box::new(Counted(released.clone())));

    let scheduler_: Scheduler = scheduler.clone();
    let (pid, _): (Pid, Tid) = scheduler.spawn_process(
        image,
        async move {
            // A second task in the same process outlives the first one.
            let _ = scheduler_.spawn(
                "helper",
                async {
                    for _ in 0..3 {
                        yield_now().await;
                    }
                },
                Cleanup::Detach,
            );
        },
        Cleanup::Detach,
    )?;
    ensure_eq!(scheduler.process(pid).map(|process| process.num_tasks()), Some(1));

    scheduler.run_until_idle();
    ensure_eq!(released.load(Ordering::SeqCst), 2);
    ensure_eq!(scheduler.process(pid).is_none(), true);
    ensure_eq!(scheduler.num_processes(), 1);
    Ok(())
}

#[test]
fn kill_frees_every_task_of_a_process() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let scheduler_: Scheduler = scheduler.clone();
    let (pid, _): (Pid, Tid) = scheduler.spawn_process(
        ProcessImage::new("daemon"),
        async move {
            for _ in 0..2 {
                let _ = scheduler_.spawn("worker", pending::<()>(), Cleanup::Detach);
            }
            pending::<()>().await;
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    let process = scheduler.process(pid).ok_or(anyhow::anyhow!("process is gone"))?;
    ensure_eq!(process.num_tasks(), 3);

    ensure_eq!(scheduler.kill(pid)?, 3);
    ensure_eq!(process.should_terminate(), true);
    ensure_eq!(process.is_torn_down(), true);
    ensure_eq!(scheduler.num_tasks(), 0);
    ensure_eq!(scheduler.kill(pid).map_err(|e| e.errno), Err(libc::ESRCH));
    Ok(())
}

#[test]
fn join_handle_reports_output_or_closed() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let done: JoinHandle<u32> = scheduler.spawn_with_handle("answer", async { 42 }, Cleanup::Detach)?;
    let stuck: JoinHandle<u32> = scheduler.spawn_with_handle("stuck", pending::<u32>(), Cleanup::Detach)?;
    scheduler.run_until_idle();
    scheduler.free(stuck.tid())?;

    ensure_eq!(::futures::executor::block_on(done), Ok(42));
    ensure_eq!(::futures::executor::block_on(stuck), Err(Closed));
    Ok(())
}

#[test]
fn task_can_free_itself() -> Result<()> {
    let scheduler: Scheduler = boot("")?;
    let scheduler_: Scheduler = scheduler.clone();
    let reached: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let reached_: Arc<AtomicUsize> = reached.clone();
    scheduler.spawn(
        "suicidal",
        async move {
            if let Some(tid) = current_tid() {
                let _ = scheduler_.free(tid);
            }
            yield_now().await;
            reached_.fetch_add(1, Ordering::SeqCst);
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(reached.load(Ordering::SeqCst), 0);
    ensure_eq!(scheduler.num_tasks(), 0);
    Ok(())
}

#[test]
fn processes_exchange_bytes() -> Result<()> {
    let scheduler: Scheduler = boot("ipc:\n  pipe_capacity: 8\n")?;
    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let received_: Arc<Mutex<Vec<u8>>> = received.clone();
    let (server, _): (Pid, Tid) = scheduler.spawn_process(
        ProcessImage::new("server"),
        async move {
            let mut buf: [u8; 4] = [0; 4];
            while received_.lock().unwrap().len() < 11 {
                match ipc::recv(&mut buf).await {
                    Ok(n) => received_.lock().unwrap().extend_from_slice(&buf[..n]),
                    Err(_) => break,
                }
            }
        },
        Cleanup::Detach,
    )?;

    let scheduler_: Scheduler = scheduler.clone();
    let sent: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let sent_: Arc<AtomicUsize> = sent.clone();
    scheduler.spawn(
        "client",
        async move {
            if let Ok(n) = ipc::send(&scheduler_, server, b"hello world").await {
                sent_.store(n, Ordering::SeqCst);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();

    ensure_eq!(sent.load(Ordering::SeqCst), 11);
    ensure_eq!(received.lock().unwrap().as_slice(), b"hello world".as_slice());
    ensure_eq!(scheduler.process(server).is_none(), true);
    Ok(())
}

#[test]
fn cores_run_on_their_own_threads() -> Result<()> {
    let scheduler: Scheduler = boot("scheduler:\n  cores: 2\n")?;
    let (tx, rx): (Sender<u8>, Receiver<u8>) = pipe();

    scheduler.spawn_on(
        0,
        "producer",
        async move {
            for round in 0..16u8 {
                if tx.send(round).await.is_err() {
                    break;
                }
                sleep(1).await;
            }
        },
        Cleanup::Detach,
    )?;
    let total: JoinHandle<u32> = {
        let scheduler_: Scheduler = scheduler.clone();
        scheduler.spawn_with_handle(
            "spawner",
            async move {
                // Runs on core 0 and hands the consumer to core 1.
                let (done_tx, done_rx) = ::futures::channel::oneshot::channel::<u32>();
                let _ = scheduler_.spawn_on(
                    1,
                    "consumer",
                    async move {
                        let mut total: u32 = 0;
                        while let Ok(byte) = rx.recv().await {
                            total += u32::from(byte);
                        }
                        let _ = done_tx.send(total);
                    },
                    Cleanup::Detach,
                );
                done_rx.await.unwrap_or(0)
            },
            Cleanup::Detach,
        )?
    };

    let cores: Vec<thread::JoinHandle<()>> = (0..scheduler.cores())
        .filter_map(|core| scheduler.executor(core))
        .map(|executor| thread::spawn(move || executor.run()))
        .collect();
    let ticker: thread::JoinHandle<()> = {
        let scheduler_: Scheduler = scheduler.clone();
        thread::spawn(move || {
            while !scheduler_.is_shutdown() {
                scheduler_.tick();
                thread::sleep(::std::time::Duration::from_millis(1));
            }
        })
    };

    let result: Result<u32, Closed> = ::futures::executor::block_on(total);
    scheduler.shutdown();
    for core in cores {
        core.join().map_err(|_| anyhow::anyhow!("executor panicked"))?;
    }
    ticker.join().map_err(|_| anyhow::anyhow!("ticker panicked"))?;

    ensure_eq!(result, Ok((0..16u32).sum()));
    Ok(())
}
