//! Command-line runner for the lofistream rolling audio buffer.
//!
//! Thin orchestration over the `lofistream` library:
//! - `status` prints backlog depth, health and rotation state
//! - `producer` keeps the buffer filled via an external generator command
//! - `consumer` streams the backlog to stdout (raw s16le frames) or, with
//!   the `playback` feature, to the local audio device
//!
//! The producer and consumer are meant to run as two independent processes
//! over the same buffer directory; they coordinate purely through the
//! persisted ledger and its advisory lock.

mod args;
mod generator;

use args::{CliArgs, Command};
use generator::CommandGenerator;
use lofistream::{
    AudioSink, BufferManager, ConsumerLoop, ProducerLoop, RawStdoutSink, Result, StreamConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Stop flag shared with the signal handler. Interrupt and terminate both
/// mean "finish the current critical section, then exit".
static STOP: OnceLock<Arc<AtomicBool>> = OnceLock::new();

#[cfg(unix)]
extern "C" fn handle_signal(_signal: libc::c_int) {
    if let Some(flag) = STOP.get() {
        flag.store(true, Ordering::Relaxed);
    }
}

fn install_stop_handler(flag: Arc<AtomicBool>) {
    let _ = STOP.set(flag);
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGINT, handle_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handle_signal as libc::sighandler_t);
    }
}

fn main() {
    // Audio frames may go to stdout, so all logging goes to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = CliArgs::parse();
    if args.show_help || args.command.is_none() {
        CliArgs::print_help();
        if args.show_help {
            return;
        }
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run(args: CliArgs) -> Result<()> {
    let mut config = match &args.config_path {
        Some(path) => StreamConfig::load(path)?,
        None => StreamConfig::default(),
    };
    if let Some(dir) = &args.buffer_dir {
        config = config.with_buffer_dir(dir);
    }

    match args.command {
        Some(Command::Status) => run_status(config, args.json),
        Some(Command::Producer) => run_producer(config, &args),
        Some(Command::Consumer) => run_consumer_command(config, &args),
        None => unreachable!("main checked for a subcommand"),
    }
}

fn run_status(config: StreamConfig, json: bool) -> Result<()> {
    let buffer = BufferManager::open(config)?;
    let status = buffer.status()?;

    if json {
        let rendered = serde_json::to_string_pretty(&status)
            .map_err(|e| lofistream::BufferError::Other(e.to_string()))?;
        println!("{rendered}");
    } else {
        println!("=== Buffer Status ===");
        println!("Health:          {}", status.health);
        println!("Chunks:          {} total, {} unconsumed", status.total, status.unconsumed);
        println!("Hours remaining: {:.1}", status.hours_remaining);
        println!("Backpressure:    {}s", status.backpressure_delay_secs);
        println!("Next prompt:     {}", status.rotation_cursor);
        println!("Buffer full:     {}", status.buffer_full);
    }
    Ok(())
}

fn run_producer(config: StreamConfig, args: &CliArgs) -> Result<()> {
    let command_line = args.generator_cmd.as_deref().ok_or_else(|| {
        lofistream::BufferError::Config(
            "producer requires --generator <cmd> (invoked as: cmd <prompt> <secs> <out.wav>)"
                .to_string(),
        )
    })?;

    let generator = CommandGenerator::new(command_line)?;
    let buffer = BufferManager::open(config)?;
    let mut producer = ProducerLoop::new(buffer, generator);
    install_stop_handler(producer.stop_flag());
    producer.run()
}

fn run_consumer_command(config: StreamConfig, args: &CliArgs) -> Result<()> {
    #[cfg(feature = "playback")]
    if args.playback {
        let sink = lofistream::PlaybackSink::new(config.sample_rate)?;
        return drive_consumer(config, sink);
    }

    #[cfg(not(feature = "playback"))]
    if args.playback {
        return Err(lofistream::BufferError::Config(
            "this build lacks the `playback` feature; rebuild with --features playback"
                .to_string(),
        ));
    }

    drive_consumer(config, RawStdoutSink::new())
}

fn drive_consumer<S: AudioSink>(config: StreamConfig, sink: S) -> Result<()> {
    let buffer = BufferManager::open(config)?;
    let mut consumer = ConsumerLoop::new(buffer, sink);
    install_stop_handler(consumer.stop_flag());
    consumer.run()
}
