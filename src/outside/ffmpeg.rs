use std::{
    ffi::OsStr,
    path::Path,
    process::Command,
    sync::OnceLock,
};

use regex::Regex;
use tracing::{debug, info, warn};

use super::command::{
    assert_success_command, run_command, run_streaming, Capture, CommandError, FFMPEG, FFPROBE,
};
use crate::{job::CancellationToken, result::TranscodeError};

/// Quiet everything but errors and the progress statistics
pub const FFMPEG_DEFAULT_ARGS: [&str; 6] =
    ["-hide_banner", "-nostdin", "-loglevel", "error", "-stats", "-y"];

pub trait Transcoder: Send + Sync {
    /// Duration of the media file, in seconds
    fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError>;

    /// Mux a video-only and an audio-only file into `output`, without re-encoding.
    ///
    /// `progress` receives `(elapsed_seconds, total_seconds)`.
    /// When canceled or failed, no output file is left behind.
    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;

    /// Convert an audio file to the format given by the `output` extension
    fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) and ffprobe programs
#[derive(Debug)]
pub struct Ffmpeg {
    ffmpeg: String,
    ffprobe: String,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` and `ffprobe` binaries are reachable
    pub fn new(ffmpeg: Option<&str>, ffprobe: Option<&str>) -> Result<Self, TranscodeError> {
        let ffmpeg = ffmpeg.unwrap_or(FFMPEG).to_owned();
        let ffprobe = ffprobe.unwrap_or(FFPROBE).to_owned();

        for program in [&ffmpeg, &ffprobe] {
            let available = assert_success_command(program, |cmd| cmd.arg("-version"))
                .map_err(|err| process_error(program, None, err.to_string()))?;
            if !available {
                return Err(process_error(program, None, "-version failed".to_owned()));
            }
        }

        info!("Using {ffmpeg} to merge and convert streams");
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Run ffmpeg, reporting the position it reached in the output.
    /// The output is removed if ffmpeg fails or is canceled.
    fn transcode<F>(
        &self,
        output: &Path,
        total: f64,
        f: F,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>
    where
        F: FnOnce(&mut Command) -> &mut Command,
    {
        let res = run_streaming(
            &self.ffmpeg,
            |cmd| f(cmd.args(FFMPEG_DEFAULT_ARGS)),
            Capture::STDERR,
            cancel,
            |line| {
                if let Some(elapsed) = parse_time_position(line) {
                    progress(elapsed.min(total), total);
                }
            },
        );

        match res {
            Ok(out) if out.status.success() => {
                progress(total, total);
                Ok(())
            }
            Ok(out) => {
                remove_partial(output);
                Err(process_error(&self.ffmpeg, out.status.code(), out.tail_text()))
            }
            Err(CommandError::Canceled { .. }) => {
                remove_partial(output);
                Err(TranscodeError::Canceled)
            }
            Err(err @ CommandError::Spawn { .. }) => {
                Err(process_error(&self.ffmpeg, None, err.to_string()))
            }
        }
    }
}

impl Transcoder for Ffmpeg {
    fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        let res = run_command(
            &self.ffprobe,
            |cmd| {
                cmd.args(["-v", "error"])
                    .args(["-show_entries", "format=duration"])
                    .args(["-of", "default=noprint_wrappers=1:nokey=1"])
                    .arg(path.as_os_str())
            },
            Capture::STDOUT | Capture::STDERR,
        )
        .map_err(|err| TranscodeError::Probe(err.to_string()))?;

        if !res.status.success() {
            return Err(TranscodeError::Probe(
                String::from_utf8_lossy(&res.stderr).trim().to_owned(),
            ));
        }

        let stdout = String::from_utf8_lossy(&res.stdout);
        let duration = stdout.trim();
        duration
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| TranscodeError::Probe(format!("Invalid duration '{duration}'")))
    }

    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let total = self.probe_duration(video)?;
        debug!("Merging {:.1}s of media into '{}'", total, output.display());

        self.transcode(
            output,
            total,
            |cmd| {
                cmd.args([OsStr::new("-i"), video.as_os_str()])
                    .args([OsStr::new("-i"), audio.as_os_str()])
                    .args(["-map", "0:v:0", "-map", "1:a:0"])
                    .args(["-c", "copy"])
                    .arg(output)
            },
            progress,
            cancel,
        )
    }

    fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        let total = self.probe_duration(input)?;
        debug!("Converting {:.1}s of audio into '{}'", total, output.display());

        self.transcode(
            output,
            total,
            |cmd| {
                cmd.args([OsStr::new("-i"), input.as_os_str()])
                    .arg("-vn")
                    .args(["-map_metadata", "0"])
                    .arg(output)
            },
            progress,
            cancel,
        )
    }
}

fn process_error(program: &str, code: Option<i32>, stderr: String) -> TranscodeError {
    TranscodeError::Process {
        program: program.to_owned(),
        code,
        stderr,
    }
}

fn remove_partial(path: &Path) {
    if path.exists() {
        debug!("Removing partial output '{}'", path.display());
        if let Err(err) = std::fs::remove_file(path) {
            warn!("Could not remove '{}': {err}", path.display());
        }
    }
}

/// Extract the `time=HH:MM:SS.xx` position of an ffmpeg statistics line, in seconds
pub fn parse_time_position(line: &str) -> Option<f64> {
    static TIME_RE: OnceLock<Regex> = OnceLock::new();
    let re = TIME_RE.get_or_init(|| {
        Regex::new(r"time=(?P<h>\d+):(?P<m>\d{2}):(?P<s>\d{2}(?:\.\d+)?)")
            .expect("time regex is valid")
    });

    let cap = re.captures(line)?;
    let hours: f64 = cap["h"].parse().ok()?;
    let minutes: f64 = cap["m"].parse().ok()?;
    let seconds: f64 = cap["s"].parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
