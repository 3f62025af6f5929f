//! CLI entry point for minos.
//!
//! This binary provides the `minos` command with demo subcommands that run
//! small simulated programs and print their interleavings. Set
//! `RUST_LOG=trace` to also see every context switch and timer interrupt.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use minos_machine::{Lock, Machine, MachineConfig};
use minos_threads::{Alarm, Condition, Rendezvous};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// minos — a teaching-OS concurrency simulation.
#[derive(Parser)]
#[command(
    name = "minos",
    version,
    about = "minos — a teaching-OS concurrency simulation",
    long_about = "Runs small simulated kernel programs on a cooperative \
                  single-processor machine and prints their interleavings."
)]
struct Cli {
    /// Path to a TOML machine configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ticks between timer interrupts (overrides the config file).
    #[arg(long, global = true)]
    timer_interval: Option<u64>,

    /// Ticks charged per context switch (overrides the config file).
    #[arg(long, global = true)]
    switch_ticks: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Four threads sleeping for different durations on one alarm.
    Alarm,

    /// Condition variable rounds: sleep/signal, then broadcast.
    Condition,

    /// Five speakers and five listeners exchanging words.
    Rendezvous,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    init_tracing("info");

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(
        timer_interval = config.timer_interval,
        switch_ticks = config.switch_ticks,
        "machine configured"
    );
    let machine = Machine::new(config);

    match cli.command {
        Commands::Alarm => demo_alarm(&machine),
        Commands::Condition => demo_condition(&machine),
        Commands::Rendezvous => demo_rendezvous(&machine),
    }
}

fn load_config(cli: &Cli) -> Result<MachineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("failed to parse config file {}", path.display()))?
        }
        None => MachineConfig::default(),
    };
    if let Some(interval) = cli.timer_interval {
        config.timer_interval = interval;
    }
    if let Some(ticks) = cli.switch_ticks {
        config.switch_ticks = ticks;
    }
    Ok(config)
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Subcommand: alarm
// ---------------------------------------------------------------------------

fn demo_alarm(machine: &Machine) -> Result<()> {
    let alarm = Alarm::new(machine).context("failed to install the alarm")?;

    println!("=== alarm demo ===");
    machine.run(|| -> Result<()> {
        let mut handles = Vec::new();
        for (i, duration) in [500u64, 200, 1000, 100].into_iter().enumerate() {
            let a = Arc::clone(&alarm);
            let m = machine.clone();
            handles.push(machine.spawn(format!("sleeper-{i}"), move || {
                let start = m.ticks();
                a.wait_until(duration);
                let end = m.ticks();
                println!(
                    "sleeper-{i}: asked for {duration} ticks, slept from {start} to {end} ({} ticks)",
                    end - start
                );
            })?);
        }
        for th in &handles {
            machine.join(th);
        }
        Ok(())
    })??;
    println!("final tick count: {}", machine.ticks());
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: condition
// ---------------------------------------------------------------------------

fn demo_condition(machine: &Machine) -> Result<()> {
    let lock = Arc::new(Lock::new(machine));
    let cond = Arc::new(Condition::new(Arc::clone(&lock)));

    println!("=== condition demo ===");
    machine.run(|| -> Result<()> {
        // Round 1: one sleeper, one signal.
        let l = Arc::clone(&lock);
        let c = Arc::clone(&cond);
        let sleeper = machine.spawn("sleeper", move || {
            l.acquire();
            println!("sleeper: going to sleep");
            c.sleep();
            println!("sleeper: woke up");
            l.release();
        })?;

        let l = Arc::clone(&lock);
        let c = Arc::clone(&cond);
        let waker = machine.spawn("waker", move || {
            l.acquire();
            println!("waker: signaling");
            c.signal();
            l.release();
        })?;
        machine.join(&sleeper);
        machine.join(&waker);

        // Round 2: several sleepers, one broadcast.
        let mut sleepers = Vec::new();
        for i in 0..3 {
            let l = Arc::clone(&lock);
            let c = Arc::clone(&cond);
            sleepers.push(machine.spawn(format!("sleeper-{i}"), move || {
                l.acquire();
                println!("sleeper-{i}: going to sleep");
                c.sleep();
                println!("sleeper-{i}: woke up");
                l.release();
            })?);
        }
        for _ in 0..8 {
            machine.yield_now();
        }
        lock.acquire();
        println!("main: broadcasting");
        cond.broadcast();
        lock.release();
        for th in &sleepers {
            machine.join(th);
        }
        Ok(())
    })??;
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: rendezvous
// ---------------------------------------------------------------------------

fn demo_rendezvous(machine: &Machine) -> Result<()> {
    let channel = Arc::new(Rendezvous::new(machine));
    let heard = Arc::new(Mutex::new(Vec::new()));

    println!("=== rendezvous demo ===");
    machine.run(|| -> Result<()> {
        let speak = |word: i32| {
            let ch = Arc::clone(&channel);
            machine.spawn(format!("speak-{word}"), move || {
                ch.speak(word);
                println!("speak-{word}: delivered");
            })
        };
        let listen = |i: usize| {
            let ch = Arc::clone(&channel);
            let h = Arc::clone(&heard);
            machine.spawn(format!("listen-{i}"), move || {
                let word = ch.listen();
                println!("listen-{i}: heard {word}");
                h.lock().unwrap().push(word);
            })
        };

        // Interleaved arrivals: speakers and listeners queue in any order.
        let handles = vec![
            speak(1)?,
            speak(2)?,
            listen(1)?,
            speak(3)?,
            listen(2)?,
            listen(3)?,
            listen(4)?,
            listen(5)?,
            speak(4)?,
            speak(5)?,
        ];
        for th in &handles {
            machine.join(th);
        }
        Ok(())
    })??;

    let mut words = heard.lock().unwrap().clone();
    words.sort_unstable();
    println!("words heard: {words:?}");
    Ok(())
}
