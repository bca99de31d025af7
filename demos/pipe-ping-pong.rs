// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::clap::{
    Arg,
    ArgMatches,
    Command,
};
use ::hyperion::{
    ipc::{
        pipe_with,
        Receiver,
        Sender,
    },
    runtime::logging,
    sleep,
    Cleanup,
    Closed,
    Config,
    JoinHandle,
    Scheduler,
};
use ::log::{
    info,
    warn,
};
use ::std::{
    thread,
    time::Duration,
};

//==============================================================================
// Program Arguments
//==============================================================================

/// Program Arguments
#[derive(Debug)]
pub struct ProgramArguments {
    /// Path to the configuration file.
    config: Option<String>,
    /// Number of rounds to execute.
    rounds: u8,
    /// Capacity of each pipe, in bytes.
    capacity: usize,
}

/// Associate functions for Program Arguments
impl ProgramArguments {
    /// Default number of rounds.
    const DEFAULT_ROUNDS: u8 = 32;
    /// Default pipe capacity.
    const DEFAULT_CAPACITY: usize = 16;

    /// Parses the program arguments from the command line interface.
    pub fn new(app_name: &'static str, app_author: &'static str, app_about: &'static str) -> Result<Self> {
        let matches: ArgMatches = Command::new(app_name)
            .author(app_author)
            .about(app_about)
            .arg(
                Arg::new("config")
                    .long("config")
                    .value_parser(clap::value_parser!(String))
                    .required(false)
                    .value_name("PATH")
                    .help("Sets the configuration file"),
            )
            .arg(
                Arg::new("rounds")
                    .long("rounds")
                    .value_parser(clap::value_parser!(u8))
                    .required(false)
                    .value_name("N")
                    .help("Sets the number of rounds"),
            )
            .arg(
                Arg::new("capacity")
                    .long("capacity")
                    .value_parser(clap::value_parser!(usize))
                    .required(false)
                    .value_name("BYTES")
                    .help("Sets the capacity of each pipe"),
            )
            .get_matches();

        let args: ProgramArguments = ProgramArguments {
            config: matches.get_one::<String>("config").cloned(),
            rounds: matches.get_one::<u8>("rounds").copied().unwrap_or(Self::DEFAULT_ROUNDS),
            capacity: matches
                .get_one::<usize>("capacity")
                .copied()
                .unwrap_or(Self::DEFAULT_CAPACITY),
        };
        if args.capacity == 0 {
            anyhow::bail!("pipe capacity must be greater than zero");
        }

        Ok(args)
    }
}

//==============================================================================
// Peers
//==============================================================================

/// Reads exactly `buf.len()` bytes.
async fn read_exact(rx: &Receiver<u8>, buf: &mut [u8]) -> Result<(), Closed> {
    let mut nreceived: usize = 0;
    while nreceived < buf.len() {
        nreceived += rx.recv_slice(&mut buf[nreceived..]).await?;
    }
    Ok(())
}

/// Sends a buffer filled with the round number and waits for it to come back. Returns the number of rounds completed.
async fn ping(tx: Sender<u8>, rx: Receiver<u8>, rounds: u8) -> u8 {
    for round in 0..rounds {
        let sent: Vec<u8> = vec![round; usize::from(round) + 1];
        let mut received: Vec<u8> = vec![0; sent.len()];
        // Echoes come back while the buffer is still going out, so both directions must make progress.
        let (nsent, echoed): (usize, Result<(), Closed>) =
            ::futures::join!(tx.send_all(&sent), read_exact(&rx, &mut received));
        if nsent != sent.len() || echoed.is_err() {
            warn!("ping(): peer hung up in round {}", round);
            return round;
        }
        if received != sent {
            warn!("ping(): corrupted echo in round {}", round);
            return round;
        }
        info!("ping {:?}", round);
        // Pace the exchange on the tick source.
        sleep(1).await;
    }
    rounds
}

/// Echoes whatever comes in until the other side hangs up.
async fn pong(tx: Sender<u8>, rx: Receiver<u8>) {
    let mut buf: [u8; 64] = [0; 64];
    while let Ok(n) = rx.recv_slice(&mut buf).await {
        if tx.send_all(&buf[..n]).await != n {
            break;
        }
    }
    info!("pong(): peer hung up");
}

//==============================================================================
// main()
//==============================================================================

pub fn main() -> Result<()> {
    let args: ProgramArguments = ProgramArguments::new(
        "pipe-ping-pong",
        "Hyperion Developers",
        "Bounces buffers between two tasks over a pair of pipes.",
    )?;
    let config: Config = match &args.config {
        Some(path) => Config::new(path)?,
        None => Config::default(),
    };
    logging::initialize(&config.log_level()?);

    let scheduler: Scheduler = Scheduler::new(&config)?;
    let (ping_tx, pong_rx): (Sender<u8>, Receiver<u8>) = pipe_with(args.capacity)?;
    let (pong_tx, ping_rx): (Sender<u8>, Receiver<u8>) = pipe_with(args.capacity)?;

    scheduler.spawn_on(scheduler.cores() - 1, "pong", pong(pong_tx, pong_rx), Cleanup::Detach)?;
    let handle: JoinHandle<u8> =
        scheduler.spawn_with_handle("ping", ping(ping_tx, ping_rx, args.rounds), Cleanup::Detach)?;

    let cores: Vec<thread::JoinHandle<()>> = (0..scheduler.cores())
        .filter_map(|core| scheduler.executor(core))
        .map(|executor| thread::spawn(move || executor.run()))
        .collect();
    let ticker: thread::JoinHandle<()> = {
        let scheduler: Scheduler = scheduler.clone();
        thread::spawn(move || {
            while !scheduler.is_shutdown() {
                scheduler.tick();
                thread::sleep(Duration::from_millis(1));
            }
        })
    };

    let completed: Result<u8, Closed> = ::futures::executor::block_on(handle);
    scheduler.shutdown();
    for core in cores {
        if core.join().is_err() {
            anyhow::bail!("executor thread panicked");
        }
    }
    if ticker.join().is_err() {
        anyhow::bail!("tick thread panicked");
    }

    match completed {
        Ok(rounds) if rounds == args.rounds => {
            println!("completed {} rounds", rounds);
            Ok(())
        },
        Ok(rounds) => anyhow::bail!("stopped after {} of {} rounds", rounds, args.rounds),
        Err(e) => anyhow::bail!("ping task died: {}", e),
    }
}
