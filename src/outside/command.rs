use std::{
    collections::VecDeque,
    io::Read,
    process::{Command, ExitStatus, Output, Stdio},
    thread,
    time::Duration,
};

use bitflags::bitflags;
use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, enabled, trace, Level};

use crate::job::CancellationToken;

use super::scanner::LineScanner;

pub const YT_DL: &str = "youtube-dl";
pub const YT_DLP: &str = "yt-dlp";
pub const FFMPEG: &str = "ffmpeg";
pub const FFPROBE: &str = "ffprobe";

/// How long a streaming command waits for output before checking for cancellation
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Number of output lines kept to describe a failure
const TAIL_LINES: usize = 20;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capture: u8 {
        const STDOUT = 0b0000001;
        const STDERR = 0b0000010;
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Could not run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} was canceled")]
    Canceled { program: String },
}

/// Run a command, returning its raw output handle.
///
/// IO handles will be captured only if the caller required it or if the log level is Debug.
/// In that last case, `stdout` and `stderr` will be logged.
///
/// The function returns an error only if the command failed to execute.
/// If the program runs but returns a non-0 status code, it will not trigger an error.
pub fn run_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
    capture: Capture,
) -> Result<Output, CommandError> {
    let is_debug = enabled!(Level::DEBUG);
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(get_io(is_debug || capture.contains(Capture::STDOUT)))
        .stderr(get_io(is_debug || capture.contains(Capture::STDERR)));

    debug!("Executing command: {cmd:?}");
    let res = cmd.output().map_err(|source| CommandError::Spawn {
        program: program.to_owned(),
        source,
    })?;

    if is_debug {
        debug!("status: {}", res.status);
        debug!("stdout: {} bytes long", res.stdout.len());
        trace!("stdout: {:?}", String::from_utf8_lossy(&res.stdout));
        debug!("stderr: {} bytes long", res.stderr.len());
        trace!("stderr: {:?}", String::from_utf8_lossy(&res.stderr));
    }

    Ok(res)
}

/// Run the command and return whether it exited with a success status code.
pub fn assert_success_command<F: FnOnce(&mut Command) -> &mut Command>(
    program: &str,
    f: F,
) -> Result<bool, CommandError> {
    let res = run_command(program, f, Capture::empty())?;
    Ok(res.status.success())
}

/// Result of a command whose output was streamed
#[derive(Debug)]
pub struct StreamedOutput {
    pub status: ExitStatus,
    /// The last lines the command printed
    pub tail: Vec<String>,
}

impl StreamedOutput {
    pub fn tail_text(&self) -> String {
        self.tail.join("\n")
    }
}

/// Run a command, handing every line of its captured output to `on_line`
/// as soon as it is printed.
///
/// Lines are separated by `\n` or `\r`, so progress bars redrawn in place
/// are seen at every redraw.
///
/// The output pipes are drained by reader threads. The caller thread checks
/// the cancellation token every time output arrives and at least every
/// [`POLL_INTERVAL`]. When canceled, the process is killed, since it cannot
/// see the token itself.
pub fn run_streaming<F, L>(
    program: &str,
    f: F,
    capture: Capture,
    cancel: &CancellationToken,
    mut on_line: L,
) -> Result<StreamedOutput, CommandError>
where
    F: FnOnce(&mut Command) -> &mut Command,
    L: FnMut(&str),
{
    let spawn_err = |source| CommandError::Spawn {
        program: program.to_owned(),
        source,
    };
    let get_io = |capture| {
        if capture {
            Stdio::piped()
        } else {
            Stdio::null()
        }
    };

    let mut cmd = Command::new(program);
    let cmd = f(&mut cmd)
        .stdin(Stdio::null())
        .stdout(get_io(capture.contains(Capture::STDOUT)))
        .stderr(get_io(capture.contains(Capture::STDERR)));

    debug!("Streaming command: {cmd:?}");
    let mut child = cmd.spawn().map_err(spawn_err)?;

    let mut pipes: Vec<Box<dyn Read + Send>> = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        pipes.push(Box::new(stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        pipes.push(Box::new(stderr));
    }

    let (send, receive) = unbounded();
    let mut readers = Vec::with_capacity(pipes.len());
    for (source, pipe) in pipes.into_iter().enumerate() {
        let send = send.clone();
        let reader = thread::Builder::new()
            .name(format!("{program}-pipe-{source}"))
            .spawn(move || drain_pipe(source, pipe, send));
        match reader {
            Ok(reader) => readers.push(reader),
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_err(err));
            }
        }
    }
    drop(send);

    let mut scanners = [LineScanner::new(), LineScanner::new()];
    let mut tail = VecDeque::with_capacity(TAIL_LINES);
    let mut handle_line = |line: String| {
        trace!("{program}: {line}");
        on_line(&line);
        if tail.len() == TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    };

    loop {
        match receive.recv_timeout(POLL_INTERVAL) {
            Ok((source, chunk)) => {
                for line in scanners[source].push(&chunk) {
                    handle_line(line);
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if cancel.is_canceled() {
            debug!("Cancellation requested, killing {program}");
            let _ = child.kill();
            let _ = child.wait();
            // Grandchildren may still hold the pipes, readers end once they close
            drop(readers);
            return Err(CommandError::Canceled {
                program: program.to_owned(),
            });
        }
    }

    for scanner in &mut scanners {
        if let Some(line) = scanner.finish() {
            handle_line(line);
        }
    }

    let status = child.wait().map_err(spawn_err)?;
    join_readers(readers);
    debug!("{program} exited with {status}");

    Ok(StreamedOutput {
        status,
        tail: tail.into(),
    })
}

/// Forward everything read from the pipe, tagged with its source, until it closes
fn drain_pipe(source: usize, mut pipe: Box<dyn Read + Send>, send: Sender<(usize, Vec<u8>)>) {
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if send.send((source, buf[..n].to_vec())).is_err() {
                    break;
                }
            }
        }
    }
}

fn join_readers(readers: Vec<thread::JoinHandle<()>>) {
    for reader in readers {
        let _ = reader.join();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn streams_lines_of_both_pipes() {
        let mut lines = Vec::new();
        let output = run_streaming(
            "sh",
            |cmd| cmd.args(["-c", "printf 'a\\rb\\nc'; printf 'err\\n' >&2"]),
            Capture::STDOUT | Capture::STDERR,
            &CancellationToken::new(),
            |line| lines.push(line.to_owned()),
        )
        .unwrap();

        assert!(output.status.success());
        lines.sort();
        assert_eq!(lines, ["a", "b", "c", "err"]);
    }

    #[test]
    fn cancel_kills_the_process() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        let res = run_streaming(
            "sh",
            |cmd| cmd.args(["-c", "sleep 30"]),
            Capture::STDOUT,
            &cancel,
            |_| {},
        );

        assert!(matches!(res, Err(CommandError::Canceled { .. })));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let res = run_command("vidq-no-such-program", |cmd| cmd, Capture::empty());
        assert!(matches!(res, Err(CommandError::Spawn { .. })));
    }
}
