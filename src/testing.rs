//! Fakes of the external collaborators, with deterministic behavior

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};

use crate::{
    config::Settings,
    job::CancellationToken,
    outside::{MetadataResolver, StreamFetcher, Transcoder},
    result::{FetchError, ResolutionError, TranscodeError},
    types::{
        Bitrate, FetchHandle, Resolution, StreamDescriptor, StreamKind, StreamType, VideoMetadata,
    },
    workers::QueueEvent,
};

/// Upper bound of every wait in the tests
pub const TIMEOUT: Duration = Duration::from_secs(10);

const SOURCE_URL: &str = "https://example.com/watch";

fn stream(
    kind: StreamKind,
    format_id: &str,
    container: &str,
    resolution: Option<u16>,
    bitrate: Option<u16>,
) -> StreamDescriptor {
    let quality = u64::from(resolution.or(bitrate).unwrap_or(1));
    StreamDescriptor {
        kind,
        container: container.to_owned(),
        codec: match kind {
            StreamKind::Audio => "mp4a.40.2",
            StreamKind::Video => "avc1.64001F",
            StreamKind::Progressive => "avc1.42001E, mp4a.40.2",
        }
        .to_owned(),
        resolution: resolution.map(Resolution::from_height),
        bitrate: bitrate.map(Bitrate::from_kbps),
        size: Some(quality * 10_000),
        handle: FetchHandle {
            source_url: SOURCE_URL.to_owned(),
            format_id: format_id.to_owned(),
        },
    }
}

pub fn video(format_id: &str, height: u16, container: &str) -> StreamDescriptor {
    stream(StreamKind::Video, format_id, container, Some(height), None)
}

pub fn audio(format_id: &str, kbps: u16, container: &str) -> StreamDescriptor {
    stream(StreamKind::Audio, format_id, container, None, Some(kbps))
}

pub fn progressive(format_id: &str, height: u16, container: &str) -> StreamDescriptor {
    stream(StreamKind::Progressive, format_id, container, Some(height), None)
}

/// Two mp4 videos, one m4a audio and two mp4 progressive streams once
/// filtered, listed out of quality order
pub fn sample_metadata(title: &str) -> VideoMetadata {
    VideoMetadata {
        title: title.to_owned(),
        streams: vec![
            progressive("p360", 360, "mp4"),
            video("v480", 480, "mp4"),
            audio("a160", 160, "webm"),
            video("v1080", 1080, "mp4"),
            progressive("p720", 720, "mp4"),
            audio("a128", 128, "m4a"),
            progressive("p1080", 1080, "webm"),
        ],
    }
}

pub fn test_settings(save_dir: &Path) -> Settings {
    Settings {
        save_dir: save_dir.to_path_buf(),
        stream_type: StreamType::Progressive,
        video_container: "mp4".to_owned(),
        audio_container: "m4a".to_owned(),
        convert_audio: None,
        ytdl_program: None,
        ffmpeg_program: None,
        ffprobe_program: None,
    }
}

/// Receive events until one matches `pred`, and return it
pub fn wait_for<F>(events: &Receiver<QueueEvent>, pred: F) -> QueueEvent
where
    F: Fn(&QueueEvent) -> bool,
{
    let deadline = Instant::now() + TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event) if pred(&event) => return event,
            Ok(_) => continue,
            Err(err) => panic!("No matching event: {err}"),
        }
    }
}

/// Sorted file names of a directory
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Resolves every URL into [`sample_metadata`], titled after the last URL segment
#[derive(Default)]
pub struct FakeResolver {
    unavailable: HashSet<String>,
    gate: Option<Receiver<()>>,
}

impl FakeResolver {
    pub fn unavailable(mut self, url: &str) -> Self {
        self.unavailable.insert(url.to_owned());
        self
    }

    /// Block every resolution until a message is received
    pub fn gated(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }
}

impl MetadataResolver for FakeResolver {
    fn resolve(&self, url: &str) -> Result<VideoMetadata, ResolutionError> {
        if let Some(gate) = &self.gate {
            gate.recv_timeout(TIMEOUT)
                .map_err(|err| ResolutionError::Transient(err.to_string()))?;
        }
        if self.unavailable.contains(url) {
            return Err(ResolutionError::Unavailable("private video".to_owned()));
        }

        let title = url.rsplit('/').next().unwrap_or(url);
        let mut metadata = sample_metadata(title);
        for stream in &mut metadata.streams {
            stream.handle.source_url = url.to_owned();
        }
        Ok(metadata)
    }
}

/// Writes `<source url>|<format id>` into the fetched file,
/// after a progress sequence with repeated and backward values
#[derive(Default)]
pub struct FakeFetcher {
    blocking: HashSet<String>,
    started: Option<Sender<String>>,
    failing: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl FakeFetcher {
    /// Fetching `format_id` hangs until canceled, announcing the file name on `started`
    pub fn blocking(mut self, format_id: &str, started: Sender<String>) -> Self {
        self.blocking.insert(format_id.to_owned());
        self.started = Some(started);
        self
    }

    pub fn failing(mut self, format_id: &str) -> Self {
        self.failing.insert(format_id.to_owned());
        self
    }

    /// Names of the files fetched so far, in call order
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }

    fn wait_for_cancel(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        fs::write(path, "partial")?;
        if let Some(started) = &self.started {
            let _ = started.send(path.to_string_lossy().into_owned());
        }

        let deadline = Instant::now() + TIMEOUT;
        while !cancel.is_canceled() {
            if Instant::now() > deadline {
                return Err(FetchError::Network("never canceled".to_owned()));
            }
            thread::sleep(Duration::from_millis(5));
        }

        fs::remove_file(path)?;
        Err(FetchError::Canceled)
    }
}

impl StreamFetcher for FakeFetcher {
    fn fetch(
        &self,
        stream: &StreamDescriptor,
        dest_dir: &Path,
        filename_prefix: &str,
        filename: Option<&str>,
        progress: &mut dyn FnMut(u64, u64),
        cancel: &CancellationToken,
    ) -> Result<PathBuf, FetchError> {
        let format_id = &stream.handle.format_id;
        let name = match filename {
            Some(name) => format!("{filename_prefix}{name}"),
            None => format!("{filename_prefix}{format_id}.{}", stream.container),
        };
        let path = dest_dir.join(&name);
        self.fetched.lock().unwrap().push(name);

        if self.failing.contains(format_id) {
            return Err(FetchError::Network("connection reset".to_owned()));
        }
        if self.blocking.contains(format_id) {
            return self.wait_for_cancel(&path, cancel);
        }

        let total = 4000;
        for done in [0, 1000, 1000, 500, 2000, 4000] {
            cancel.check(|| FetchError::Canceled)?;
            progress(done, total);
        }

        fs::write(&path, format!("{}|{format_id}\n", stream.handle.source_url))?;
        Ok(path)
    }
}

/// Merges by concatenating the inputs, converts by copying
#[derive(Default)]
pub struct FakeTranscoder {
    fail: bool,
    started: Option<Sender<()>>,
}

impl FakeTranscoder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Every run hangs until canceled, announcing itself on `started`
    pub fn blocking(started: Sender<()>) -> Self {
        Self {
            started: Some(started),
            ..Self::default()
        }
    }

    fn run(
        &self,
        inputs: &[&Path],
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        if self.fail {
            return Err(TranscodeError::Process {
                program: "ffmpeg".to_owned(),
                code: Some(1),
                stderr: "Invalid data found when processing input".to_owned(),
            });
        }

        if let Some(started) = &self.started {
            let _ = started.send(());
            let deadline = Instant::now() + TIMEOUT;
            loop {
                cancel.check(|| TranscodeError::Canceled)?;
                if Instant::now() > deadline {
                    return Err(TranscodeError::Probe("never canceled".to_owned()));
                }
                progress(1.0, 10.0);
                thread::sleep(Duration::from_millis(5));
            }
        }

        let total = self.probe_duration(inputs[0])?;
        for elapsed in [0.0, 2.5, 2.5, 1.0, 10.0] {
            cancel.check(|| TranscodeError::Canceled)?;
            progress(elapsed, total);
        }

        let io_error = |err: std::io::Error| TranscodeError::Probe(err.to_string());
        let mut content = String::new();
        for input in inputs {
            content += &fs::read_to_string(input).map_err(io_error)?;
        }
        fs::write(output, content).map_err(io_error)
    }
}

impl Transcoder for FakeTranscoder {
    fn probe_duration(&self, path: &Path) -> Result<f64, TranscodeError> {
        if path.exists() {
            Ok(10.0)
        } else {
            Err(TranscodeError::Probe(format!("'{}' not found", path.display())))
        }
    }

    fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.run(&[video, audio], output, progress, cancel)
    }

    fn convert(
        &self,
        input: &Path,
        output: &Path,
        progress: &mut dyn FnMut(f64, f64),
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError> {
        self.run(&[input], output, progress, cancel)
    }
}
