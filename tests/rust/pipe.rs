// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Pipes shared between scheduled tasks.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::futures::future::pending;
use ::hyperion::{
    ensure_eq,
    ipc::{
        channel,
        pipe_with,
        Receiver,
        Sender,
    },
    Cleanup,
    Closed,
    Config,
    Scheduler,
    TaskState,
    Tid,
    TryRecvError,
};
use ::rand::{
    rngs::SmallRng,
    Rng,
    SeedableRng,
};
use ::std::sync::{
    atomic::{
        AtomicUsize,
        Ordering,
    },
    Arc,
    Mutex,
};

//==============================================================================
// Helpers
//==============================================================================

fn boot() -> Result<Scheduler> {
    Ok(Scheduler::new(&Config::default())?)
}

fn state_of(scheduler: &Scheduler, tid: Tid) -> Option<TaskState> {
    scheduler.lookup(tid).map(|info| info.state)
}

//==============================================================================
// Tests
//==============================================================================

#[test]
fn full_pipe_suspends_sender() -> Result<()> {
    const CAPACITY: usize = 4;
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<usize>, Receiver<usize>) = channel(CAPACITY)?;
    let sent: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let sent_: Arc<AtomicUsize> = sent.clone();

    let producer: Tid = scheduler.spawn(
        "producer",
        async move {
            for i in 0..=CAPACITY {
                if tx.send(i).await.is_err() {
                    return;
                }
                sent_.fetch_add(1, Ordering::SeqCst);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(sent.load(Ordering::SeqCst), CAPACITY);
    ensure_eq!(rx.len(), CAPACITY);
    ensure_eq!(state_of(&scheduler, producer), Some(TaskState::Sleeping));

    // Freeing one slot lets the producer finish.
    ensure_eq!(rx.try_recv(), Ok(0));
    scheduler.run_until_idle();
    ensure_eq!(sent.load(Ordering::SeqCst), CAPACITY + 1);
    ensure_eq!(state_of(&scheduler, producer), None);
    ensure_eq!(rx.is_closed(), true);
    Ok(())
}

#[test]
fn receiver_drains_then_sees_closed() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<u32>, Receiver<u32>) = channel(8)?;
    let received: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let received_: Arc<Mutex<Vec<u32>>> = received.clone();
    let closed: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let closed_: Arc<AtomicUsize> = closed.clone();

    let consumer: Tid = scheduler.spawn(
        "consumer",
        async move {
            loop {
                match rx.recv().await {
                    Ok(item) => received_.lock().unwrap().push(item),
                    Err(Closed) => {
                        closed_.fetch_add(1, Ordering::SeqCst);
                        return;
                    },
                }
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(state_of(&scheduler, consumer), Some(TaskState::Sleeping));

    tx.try_send(1)?;
    tx.try_send(2)?;
    drop(tx);
    scheduler.run_until_idle();

    ensure_eq!(*received.lock().unwrap(), vec![1, 2]);
    ensure_eq!(closed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn single_slot_delivers_once() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<&'static str>, Receiver<&'static str>) = channel(1)?;
    let received: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let received_: Arc<Mutex<Vec<&'static str>>> = received.clone();

    scheduler.spawn(
        "sender",
        async move {
            let _ = tx.send("x").await;
            // Keep the send side open.
            pending::<()>().await;
        },
        Cleanup::Detach,
    )?;
    let receiver: Tid = scheduler.spawn(
        "receiver",
        async move {
            while let Ok(item) = rx.recv().await {
                received_.lock().unwrap().push(item);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();

    ensure_eq!(*received.lock().unwrap(), vec!["x"]);
    ensure_eq!(state_of(&scheduler, receiver), Some(TaskState::Sleeping));
    Ok(())
}

#[test]
fn freed_receiver_is_never_woken() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<u8>, Receiver<u8>) = channel(4)?;
    let winner: Arc<Mutex<Option<&'static str>>> = Arc::new(Mutex::new(None));

    let mut tids: Vec<Tid> = Vec::new();
    for name in ["first", "second"] {
        let rx: Receiver<u8> = rx.clone();
        let winner_: Arc<Mutex<Option<&'static str>>> = winner.clone();
        tids.push(scheduler.spawn(
            name,
            async move {
                if rx.recv().await.is_ok() {
                    *winner_.lock().unwrap() = Some(name);
                }
            },
            Cleanup::Detach,
        )?);
    }
    scheduler.run_until_idle();

    // The first receiver queued first, so it would have been woken first.
    scheduler.free(tids[0])?;
    tx.try_send(7)?;
    scheduler.run_until_idle();

    ensure_eq!(*winner.lock().unwrap(), Some("second"));
    ensure_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    Ok(())
}

#[test]
fn send_all_stops_when_receiver_leaves() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<u8>, Receiver<u8>) = pipe_with(4)?;
    let sent: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(usize::MAX));
    let sent_: Arc<AtomicUsize> = sent.clone();

    scheduler.spawn(
        "writer",
        async move {
            let data: [u8; 10] = [0xab; 10];
            sent_.store(tx.send_all(&data).await, Ordering::SeqCst);
        },
        Cleanup::Detach,
    )?;
    scheduler.spawn(
        "reader",
        async move {
            let mut buf: [u8; 4] = [0; 4];
            // Reads one chunk, then hangs up.
            let _ = rx.recv_slice(&mut buf).await;
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();

    ensure_eq!(sent.load(Ordering::SeqCst), 4);
    Ok(())
}

#[test]
fn writer_observes_hang_up() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<u8>, Receiver<u8>) = pipe_with(4)?;
    let observed: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let observed_: Arc<AtomicUsize> = observed.clone();

    let writer: Tid = scheduler.spawn(
        "writer",
        async move {
            tx.wait_closed().await;
            if tx.send(1).await == Err(Closed) {
                observed_.fetch_add(1, Ordering::SeqCst);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(state_of(&scheduler, writer), Some(TaskState::Sleeping));

    drop(rx);
    scheduler.run_until_idle();
    ensure_eq!(observed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn reader_observes_last_writer_leaving() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let (tx, rx): (Sender<u8>, Receiver<u8>) = pipe_with(4)?;
    let tx2: Sender<u8> = tx.clone();
    let observed: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(0));
    let observed_: Arc<AtomicUsize> = observed.clone();

    let reader: Tid = scheduler.spawn(
        "reader",
        async move {
            rx.wait_closed().await;
            if rx.recv().await == Err(Closed) {
                observed_.fetch_add(1, Ordering::SeqCst);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();
    ensure_eq!(state_of(&scheduler, reader), Some(TaskState::Sleeping));

    // One writer is still around.
    drop(tx);
    scheduler.run_until_idle();
    ensure_eq!(state_of(&scheduler, reader), Some(TaskState::Sleeping));
    ensure_eq!(observed.load(Ordering::SeqCst), 0);

    drop(tx2);
    scheduler.run_until_idle();
    ensure_eq!(state_of(&scheduler, reader), None);
    ensure_eq!(observed.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn byte_stream_survives_small_pipe() -> Result<()> {
    let scheduler: Scheduler = boot()?;
    let mut rng: SmallRng = SmallRng::seed_from_u64(0xb17e);
    let payload: Vec<u8> = (0..1024).map(|_| rng.gen()).collect();
    let chunks: Vec<usize> = (0..64).map(|_| rng.gen_range(1..24)).collect();
    let (tx, rx): (Sender<u8>, Receiver<u8>) = pipe_with(7)?;

    let expected: Vec<u8> = payload.clone();
    scheduler.spawn(
        "writer",
        async move {
            let mut offset: usize = 0;
            for chunk in chunks.iter().cycle() {
                if offset == payload.len() {
                    break;
                }
                let end: usize = (offset + chunk).min(payload.len());
                offset += tx.send_all(&payload[offset..end]).await;
                ::hyperion::yield_now().await;
            }
        },
        Cleanup::Detach,
    )?;

    let received: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let received_: Arc<Mutex<Vec<u8>>> = received.clone();
    scheduler.spawn(
        "reader",
        async move {
            let mut buf: [u8; 5] = [0; 5];
            while let Ok(n) = rx.recv_slice(&mut buf).await {
                received_.lock().unwrap().extend_from_slice(&buf[..n]);
            }
        },
        Cleanup::Detach,
    )?;
    scheduler.run_until_idle();

    ensure_eq!(*received.lock().unwrap(), expected);
    ensure_eq!(scheduler.num_tasks(), 0);
    Ok(())
}
