use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::command::{
    assert_success_command, run_command, run_streaming, Capture, CommandError, YT_DL, YT_DLP,
};
use crate::{
    job::CancellationToken,
    result::{FetchError, ResolutionError},
    types::{Bitrate, FetchHandle, Resolution, StreamDescriptor, StreamKind, VideoMetadata},
};

/// Interface for turning a video reference into its available streams
pub trait MetadataResolver: Send + Sync {
    /// Get the title and every stream of the referenced video
    fn resolve(&self, url: &str) -> Result<VideoMetadata, ResolutionError>;
}

/// Interface for fetching a single stream to local storage
pub trait StreamFetcher: Send + Sync {
    /// Download the stream into `dest_dir` and return the path of the file.
    ///
    /// The file is named `filename_prefix` followed by `filename`, or by a
    /// name derived from the stream when no `filename` is given.
    ///
    /// `progress` receives `(bytes_done, bytes_total)`, `bytes_total` being 0
    /// when unknown. The implementation must check `cancel` regularly,
    /// and remove the partial file when canceled.
    fn fetch(
        &self,
        stream: &StreamDescriptor,
        dest_dir: &Path,
        filename_prefix: &str,
        filename: Option<&str>,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError>;
}

/// Marker of the progress lines printed by yt-dlp during a fetch.
/// yt-dlp strips the `download:` type selector of the template, so the
/// printed lines only start with this marker.
const PROGRESS_PREFIX: &str = "vidq-progress:";

/// Interface for the [youtube-dl](https://github.com/ytdl-org/youtube-dl) program
/// and its fork [yt-dlp](https://github.com/yt-dlp/yt-dlp)
#[derive(Debug)]
pub struct Ytdl {
    program: String,
}

impl Ytdl {
    /// Verify that the given program, or else `yt-dlp` or `youtube-dl`, is reachable
    pub fn new(program: Option<&str>) -> Result<Self, ResolutionError> {
        let candidates = match program {
            Some(program) => vec![program],
            None => vec![YT_DLP, YT_DL],
        };

        for program in candidates {
            match assert_success_command(program, |cmd| cmd.arg("--version")) {
                Ok(true) => {
                    info!("Using {program} to resolve and fetch streams");
                    return Ok(Self {
                        program: program.to_owned(),
                    });
                }
                Ok(false) => warn!("{program} --version did not succeed"),
                Err(err) => debug!("{err}"),
            }
        }

        Err(ResolutionError::Transient(
            "Neither yt-dlp nor youtube-dl found".to_owned(),
        ))
    }
}

impl MetadataResolver for Ytdl {
    fn resolve(&self, url: &str) -> Result<VideoMetadata, ResolutionError> {
        let res = run_command(
            &self.program,
            |cmd| {
                cmd.arg("-q")
                    .arg("--no-warnings")
                    .arg("--no-playlist")
                    .arg("--skip-download")
                    .arg("-J")
                    .arg("--")
                    .arg(url)
            },
            Capture::STDOUT | Capture::STDERR,
        )
        .map_err(|err| ResolutionError::Transient(err.to_string()))?;

        if !res.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&res.stderr)));
        }

        parse_info(&String::from_utf8_lossy(&res.stdout), url)
    }
}

impl StreamFetcher for Ytdl {
    fn fetch(
        &self,
        stream: &StreamDescriptor,
        dest_dir: &Path,
        filename_prefix: &str,
        filename: Option<&str>,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let name = match filename {
            Some(name) => format!("{filename_prefix}{name}"),
            None => format!(
                "{filename_prefix}{}.{}",
                stream.handle.format_id, stream.container
            ),
        };
        let path = dest_dir.join(name);

        // `-o` takes an output template, where '%' is special
        let template = path.to_string_lossy().replace('%', "%%");
        let progress_template = progress_template();

        let res = run_streaming(
            &self.program,
            |cmd| {
                cmd.arg("-q")
                    .arg("--progress")
                    .arg("--newline")
                    .args(["--progress-template", &progress_template])
                    .arg("--no-part")
                    .arg("--no-continue")
                    .args(["-f", &stream.handle.format_id])
                    .args([OsStr::new("-o"), OsStr::new(&template)])
                    .arg("--")
                    .arg(&stream.handle.source_url)
            },
            Capture::STDOUT | Capture::STDERR,
            cancel,
            |line| {
                if let Some((done, total)) = parse_download_progress(line) {
                    progress(done, total.or(stream.size).unwrap_or(0));
                }
            },
        );

        match res {
            Ok(output) if output.status.success() => {
                if path.exists() {
                    Ok(path)
                } else {
                    Err(FetchError::Io(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("{} did not create '{}'", self.program, path.display()),
                    )))
                }
            }
            Ok(output) => {
                remove_partial(&path);
                Err(FetchError::Network(output.tail_text()))
            }
            Err(CommandError::Canceled { .. }) => {
                remove_partial(&path);
                Err(FetchError::Canceled)
            }
            Err(CommandError::Spawn { source, .. }) => Err(FetchError::Io(source)),
        }
    }
}

/// The `--progress-template` given to yt-dlp. The leading `download:` selects
/// the progress type and is not printed.
fn progress_template() -> String {
    format!(
        "download:{PROGRESS_PREFIX}%(progress.downloaded_bytes)s/\
         %(progress.total_bytes,progress.total_bytes_estimate)s"
    )
}

fn remove_partial(path: &Path) {
    if path.exists() {
        debug!("Removing partial download '{}'", path.display());
        if let Err(err) = std::fs::remove_file(path) {
            warn!("Could not remove '{}': {err}", path.display());
        }
    }
}

/// Map the stderr of a failed resolution to the kind of failure
fn classify_failure(stderr: &str) -> ResolutionError {
    let message = stderr
        .lines()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .unwrap_or_else(|| stderr.trim())
        .to_owned();
    let lower = message.to_lowercase();

    if lower.contains("unavailable") || lower.contains("private video") || lower.contains("removed")
    {
        ResolutionError::Unavailable(message)
    } else if lower.contains("unsupported url")
        || lower.contains("is not a valid url")
        || lower.contains("incomplete youtube id")
    {
        ResolutionError::InvalidReference(message)
    } else {
        ResolutionError::Transient(message)
    }
}

#[derive(Debug, Deserialize)]
struct YtdlInfo {
    title: String,
    #[serde(default)]
    formats: Vec<YtdlFormat>,
}

#[derive(Debug, Deserialize)]
struct YtdlFormat {
    format_id: String,
    ext: String,
    vcodec: Option<String>,
    acodec: Option<String>,
    height: Option<f64>,
    abr: Option<f64>,
    tbr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl YtdlFormat {
    /// Convert into a descriptor, or None for formats without audio nor video
    /// (e.g. storyboards)
    fn into_descriptor(self, source_url: &str) -> Option<StreamDescriptor> {
        // A missing codec means unknown, not absent
        let has_video = self.vcodec.as_deref() != Some("none");
        let has_audio = self.acodec.as_deref() != Some("none");

        let (kind, codec) = match (has_video, has_audio) {
            (true, true) => (StreamKind::Progressive, self.vcodec),
            (true, false) => (StreamKind::Video, self.vcodec),
            (false, true) => (StreamKind::Audio, self.acodec),
            (false, false) => return None,
        };

        let kbps = match kind {
            StreamKind::Audio => self.abr.or(self.tbr),
            _ => self.tbr,
        };

        Some(StreamDescriptor {
            kind,
            container: self.ext,
            codec: codec.unwrap_or_else(|| "unknown".to_owned()),
            resolution: self
                .height
                .filter(|_| kind != StreamKind::Audio)
                .map(|h| Resolution::from_height(h.round().clamp(0.0, u16::MAX as f64) as u16)),
            bitrate: kbps.map(|k| Bitrate::from_kbps(k.round().clamp(0.0, u16::MAX as f64) as u16)),
            size: self
                .filesize
                .or(self.filesize_approx)
                .map(|size| size.max(0.0) as u64),
            handle: FetchHandle {
                source_url: source_url.to_owned(),
                format_id: self.format_id,
            },
        })
    }
}

/// Parse the JSON printed by `yt-dlp -J`
fn parse_info(json: &str, url: &str) -> Result<VideoMetadata, ResolutionError> {
    let info: YtdlInfo =
        serde_json::from_str(json).map_err(|err| ResolutionError::Parse(err.to_string()))?;

    let streams: Vec<_> = info
        .formats
        .into_iter()
        .filter_map(|format| format.into_descriptor(url))
        .collect();
    debug!("'{}': {} streams", info.title, streams.len());

    Ok(VideoMetadata {
        title: info.title,
        streams,
    })
}

/// Parse a `vidq-progress:<done>/<total>` progress line.
/// The total is None when yt-dlp does not know it.
fn parse_download_progress(line: &str) -> Option<(u64, Option<u64>)> {
    let (done, total) = line
        .trim()
        .strip_prefix(PROGRESS_PREFIX)?
        .split_once('/')?;

    let parse = |s: &str| s.trim().parse::<f64>().ok().map(|v| v.max(0.0) as u64);
    Some((parse(done)?, parse(total)))
}
