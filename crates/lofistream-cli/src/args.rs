//! Command-line argument parsing for the lofistream runner.
//!
//! This module handles parsing and validation of CLI arguments including:
//! - Subcommand selection (status, producer, consumer)
//! - Configuration file and buffer directory overrides
//! - Generator command specification
//! - Help text generation

use std::env;

/// Selected subcommand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print buffer status and exit
    Status,
    /// Run the producer loop
    Producer,
    /// Run the consumer loop
    Consumer,
}

impl Command {
    /// Parse a subcommand from its string form.
    pub fn from_str(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "status" => Some(Command::Status),
            "producer" => Some(Command::Producer),
            "consumer" => Some(Command::Consumer),
            _ => None,
        }
    }
}

/// Parsed command-line arguments.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Selected subcommand
    pub command: Option<Command>,
    /// Path of a JSON configuration file
    pub config_path: Option<String>,
    /// Buffer directory override
    pub buffer_dir: Option<String>,
    /// Generator command line for the producer (`cmd <prompt> <secs> <out.wav>`)
    pub generator_cmd: Option<String>,
    /// Play to the local audio device instead of writing raw frames to stdout
    pub playback: bool,
    /// Emit status as JSON instead of text
    pub json: bool,
    /// Whether help was requested
    pub show_help: bool,
}

impl CliArgs {
    /// Parse arguments from the command line.
    pub fn parse() -> Self {
        let mut args = Self::default();
        let mut iter = env::args().skip(1);

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--help" | "-h" => {
                    args.show_help = true;
                }
                "--playback" => {
                    args.playback = true;
                }
                "--json" => {
                    args.json = true;
                }
                "--config" => match iter.next() {
                    Some(value) => args.config_path = Some(value),
                    None => {
                        eprintln!("--config requires a file path");
                        args.show_help = true;
                    }
                },
                _ if arg.starts_with("--config=") => {
                    args.config_path = Some(arg["--config=".len()..].to_string());
                }
                "--buffer-dir" => match iter.next() {
                    Some(value) => args.buffer_dir = Some(value),
                    None => {
                        eprintln!("--buffer-dir requires a directory path");
                        args.show_help = true;
                    }
                },
                _ if arg.starts_with("--buffer-dir=") => {
                    args.buffer_dir = Some(arg["--buffer-dir=".len()..].to_string());
                }
                "--generator" => match iter.next() {
                    Some(value) => args.generator_cmd = Some(value),
                    None => {
                        eprintln!("--generator requires a command line");
                        args.show_help = true;
                    }
                },
                _ if arg.starts_with("--generator=") => {
                    args.generator_cmd = Some(arg["--generator=".len()..].to_string());
                }
                _ if arg.starts_with('-') => {
                    eprintln!("Unknown flag: {}", arg);
                    args.show_help = true;
                }
                _ => match Command::from_str(&arg) {
                    Some(command) if args.command.is_none() => args.command = Some(command),
                    Some(_) => {
                        eprintln!("Multiple subcommands given");
                        args.show_help = true;
                    }
                    None => {
                        eprintln!("Unknown subcommand: {}", arg);
                        args.show_help = true;
                    }
                },
            }
        }

        args
    }

    /// Print help text to stderr.
    pub fn print_help() {
        eprintln!(
            "Usage:\n  lofistream <status|producer|consumer> [options]\n\n\
             Subcommands:\n\
             \x20 status      Show buffer backlog, health and rotation state\n\
             \x20 producer    Generate chunks and keep the buffer filled\n\
             \x20 consumer    Stream buffered chunks to the output stage\n\n\
             Options:\n\
             \x20 --config <file>      JSON configuration file (defaults apply otherwise)\n\
             \x20 --buffer-dir <dir>   Override the buffer directory\n\
             \x20 --generator <cmd>    Generator command; invoked as: cmd <prompt> <secs> <out.wav>\n\
             \x20 --playback           Consumer: play to the local audio device\n\
             \x20                      (requires the `playback` build feature)\n\
             \x20 --json               Status: emit JSON instead of text\n\
             \x20 -h, --help           Show this help\n\n\
             Examples:\n\
             \x20 lofistream status --buffer-dir ./audio_buffer\n\
             \x20 lofistream producer --generator './generate_chunk.sh'\n\
             \x20 lofistream consumer | ffmpeg -f s16le -ar 32000 -ac 1 -i - ...\n"
        );
    }
}
