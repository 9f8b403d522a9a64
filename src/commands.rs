use crate::session::PadSession;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io::BufRead;
use std::thread;
use std::time::Duration;

pub const MENU: &str = "Commands: 'c' calibrate, 'h' help, 'q' quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Calibrate,
    Help,
    Quit,
    Empty,
    Unknown,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "c" | "calibrate" => Self::Calibrate,
            "h" | "help" | "?" => Self::Help,
            "q" | "quit" | "exit" => Self::Quit,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    Line(String),
    Closed,
}

/// Forwards stdin lines. The thread is left detached since a blocked
/// stdin read cannot be interrupted.
pub fn spawn_stdin_reader() -> Receiver<Intake> {
    let (tx, rx) = crossbeam_channel::unbounded();

    let spawned = thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Intake::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        log::warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
            let _ = tx.send(Intake::Closed);
        });

    if let Err(e) = spawned {
        log::error!("Failed to start stdin thread: {}. Use Ctrl-C to quit", e);
    }
    rx
}

/// Runs operator commands until quit, end of input or a stop request
pub fn run_command_loop<F>(session: &PadSession, intake: &Receiver<Intake>, poll: Duration, help: F)
where
    F: Fn() -> String,
{
    while session.is_running() {
        let line = match intake.recv_timeout(poll) {
            Ok(Intake::Line(line)) => line,
            Ok(Intake::Closed) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("Input closed, shutting down");
                session.request_stop();
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
        };

        match Command::parse(&line) {
            Command::Calibrate => session.start_calibration(),
            Command::Help => println!("{}", help()),
            Command::Quit => {
                log::info!("Shutting down...");
                session.request_stop();
            }
            Command::Empty => {}
            Command::Unknown => println!("Unknown command '{}'. {}", line.trim(), MENU),
        }
    }
}
