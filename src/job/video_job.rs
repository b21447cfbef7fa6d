use std::{
    fmt::Display,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crate::{
    result::{ConcurrencyError, Error, ResolutionError, Result},
    types::{StreamDescriptor, StreamKind, StreamType, VideoMetadata},
    utils::sanitize_filename,
};

/// Identifier of a job, unique for the whole process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Loading,
    LoadFailed,
    Loaded,
    Downloading,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::LoadFailed | JobState::Completed | JobState::Failed
        )
    }
}

/// The variants the user picked for a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    pub want_audio_only: bool,
    pub want_progressive: bool,
    pub selected_video: usize,
    pub selected_audio: usize,
    pub custom_filename: Option<String>,
}

impl Selection {
    pub fn for_type(stream_type: StreamType) -> Self {
        Self {
            want_audio_only: stream_type == StreamType::AudioOnly,
            want_progressive: stream_type == StreamType::Progressive,
            ..Self::default()
        }
    }

    pub fn stream_type(&self) -> StreamType {
        if self.want_audio_only {
            StreamType::AudioOnly
        } else if self.want_progressive {
            StreamType::Progressive
        } else {
            StreamType::Adaptive
        }
    }
}

/// Preferred containers used to filter the resolved streams.
/// `None` keeps every container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariantFilter {
    pub video_container: Option<String>,
    pub audio_container: Option<String>,
}

/// How a download attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(PathBuf),
    /// A user cancel also ends here, with `canceled` set
    Failed { canceled: bool, reason: String },
}

/// Resolved metadata along with the variant lists filtered out of it
#[derive(Debug, Clone)]
pub struct JobMetadata {
    pub title: String,
    pub streams: Vec<Arc<StreamDescriptor>>,
    pub video_variants: Vec<Arc<StreamDescriptor>>,
    pub audio_variants: Vec<Arc<StreamDescriptor>>,
}

/// The streams a download has to fetch, depending on the selection
#[derive(Debug, Clone)]
pub enum RequiredStreams {
    /// A muxed stream, saved as is
    Progressive(Arc<StreamDescriptor>),
    Audio(Arc<StreamDescriptor>),
    /// Video and audio fetched separately, merged afterward
    Adaptive {
        video: Arc<StreamDescriptor>,
        audio: Arc<StreamDescriptor>,
    },
}

impl RequiredStreams {
    pub fn total_size(&self) -> Option<u64> {
        match self {
            RequiredStreams::Progressive(stream) | RequiredStreams::Audio(stream) => stream.size,
            RequiredStreams::Adaptive { video, audio } => Some(video.size? + audio.size?),
        }
    }
}

/// The record of one requested download
#[derive(Debug, Clone)]
pub struct VideoJob {
    id: JobId,
    url: String,
    pub(super) display_row: usize,
    state: JobState,
    metadata: Option<JobMetadata>,
    selection: Selection,
    filter: VariantFilter,
    active_stream: Option<Arc<StreamDescriptor>>,
    progress_percent: u8,
    finished: bool,
    outcome: Option<Outcome>,
}

impl VideoJob {
    pub fn new(url: impl Into<String>, stream_type: StreamType, filter: VariantFilter) -> Self {
        Self {
            id: JobId::next(),
            url: url.into(),
            display_row: 0,
            state: JobState::Pending,
            metadata: None,
            selection: Selection::for_type(stream_type),
            filter,
            active_stream: None,
            progress_percent: 0,
            finished: false,
            outcome: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn display_row(&self) -> usize {
        self.display_row
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.title.as_str())
    }

    pub fn metadata(&self) -> Option<&JobMetadata> {
        self.metadata.as_ref()
    }

    pub fn video_variants(&self) -> &[Arc<StreamDescriptor>] {
        self.metadata
            .as_ref()
            .map_or(&[], |m| m.video_variants.as_slice())
    }

    pub fn audio_variants(&self) -> &[Arc<StreamDescriptor>] {
        self.metadata
            .as_ref()
            .map_or(&[], |m| m.audio_variants.as_slice())
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn active_stream(&self) -> Option<&Arc<StreamDescriptor>> {
        self.active_stream.as_ref()
    }

    pub fn progress(&self) -> u8 {
        self.progress_percent
    }

    /// Whether a download worker is done attempting this job, whatever the outcome
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn was_canceled(&self) -> bool {
        matches!(self.outcome, Some(Outcome::Failed { canceled: true, .. }))
    }

    /// The file name (without extension) of the final output
    pub fn output_stem(&self) -> String {
        let stem = match (&self.selection.custom_filename, self.title()) {
            (Some(custom), _) => sanitize_filename(custom),
            (None, Some(title)) => sanitize_filename(title),
            (None, None) => String::new(),
        };

        if stem.is_empty() {
            format!("video_{}", self.id)
        } else {
            stem
        }
    }

    /// The streams the current selection needs, once loaded
    pub fn required_streams(&self) -> Result<RequiredStreams> {
        let video = || {
            self.video_variants()
                .get(self.selection.selected_video)
                .cloned()
                .ok_or(Error::Index {
                    index: self.selection.selected_video,
                    len: self.video_variants().len(),
                })
        };
        let audio = || {
            self.audio_variants()
                .get(self.selection.selected_audio)
                .cloned()
                .ok_or(Error::Index {
                    index: self.selection.selected_audio,
                    len: self.audio_variants().len(),
                })
        };

        Ok(match self.selection.stream_type() {
            StreamType::AudioOnly => RequiredStreams::Audio(audio()?),
            StreamType::Progressive => RequiredStreams::Progressive(video()?),
            StreamType::Adaptive => RequiredStreams::Adaptive {
                video: video()?,
                audio: audio()?,
            },
        })
    }

    /// Total byte size of the streams to fetch, if every one of them announces it
    pub fn total_size(&self) -> Option<u64> {
        self.required_streams().ok()?.total_size()
    }

    pub fn begin_loading(&mut self) -> Result<()> {
        self.transition(JobState::Pending, JobState::Loading)
    }

    /// Store the resolved metadata and filter the variant lists.
    ///
    /// Fails, leaving the job in [`JobState::LoadFailed`], if the lists
    /// needed by the current stream type end up empty.
    pub fn finish_loading(&mut self, metadata: VideoMetadata) -> Result<()> {
        self.expect_state(JobState::Loading, JobState::Loaded)?;

        let streams: Vec<_> = metadata.streams.into_iter().map(Arc::new).collect();
        let stream_type = self.selection.stream_type();
        let (video_variants, audio_variants) = self.filter_variants(&streams, stream_type);

        if let Err(err) = check_usable(stream_type, &video_variants, &audio_variants) {
            self.state = JobState::LoadFailed;
            return Err(ResolutionError::Unavailable(err).into());
        }

        self.metadata = Some(JobMetadata {
            title: metadata.title,
            streams,
            video_variants,
            audio_variants,
        });
        self.selection.selected_video = 0;
        self.selection.selected_audio = 0;
        self.state = JobState::Loaded;
        Ok(())
    }

    pub fn fail_loading(&mut self) -> Result<()> {
        self.transition(JobState::Loading, JobState::LoadFailed)
    }

    /// Switch between progressive, adaptive and audio-only streams.
    ///
    /// The cached streams are filtered again, nothing is resolved.
    /// Changing whether the video is progressive resets the video selection
    /// to the best variant.
    pub fn set_stream_type(&mut self, stream_type: StreamType) -> Result<()> {
        self.expect_state(JobState::Loaded, JobState::Loaded)?;

        let Some(metadata) = self.metadata.as_ref() else {
            return Err(Error::InvalidSelection("job has no metadata".to_owned()));
        };
        let (video_variants, audio_variants) =
            self.filter_variants(&metadata.streams, stream_type);
        check_usable(stream_type, &video_variants, &audio_variants)
            .map_err(Error::InvalidSelection)?;

        let new_selection = Selection::for_type(stream_type);
        if new_selection.want_progressive != self.selection.want_progressive {
            self.selection.selected_video = 0;
        }
        self.selection.want_audio_only = new_selection.want_audio_only;
        self.selection.want_progressive = new_selection.want_progressive;
        if self.selection.selected_audio >= audio_variants.len() {
            self.selection.selected_audio = 0;
        }

        if let Some(metadata) = self.metadata.as_mut() {
            metadata.video_variants = video_variants;
            metadata.audio_variants = audio_variants;
        }
        Ok(())
    }

    pub fn select_video(&mut self, index: usize) -> Result<()> {
        self.expect_state(JobState::Loaded, JobState::Loaded)?;
        check_index(index, self.video_variants().len())?;
        self.selection.selected_video = index;
        Ok(())
    }

    pub fn select_audio(&mut self, index: usize) -> Result<()> {
        self.expect_state(JobState::Loaded, JobState::Loaded)?;
        check_index(index, self.audio_variants().len())?;
        self.selection.selected_audio = index;
        Ok(())
    }

    pub fn set_custom_filename(&mut self, name: Option<String>) -> Result<()> {
        self.expect_state(JobState::Loaded, JobState::Loaded)?;
        self.selection.custom_filename = name.filter(|n| !n.trim().is_empty());
        Ok(())
    }

    /// Attach a download to the job. A job is downloaded at most once.
    pub fn begin_download(&mut self) -> Result<()> {
        if self.state == JobState::Downloading {
            return Err(ConcurrencyError::AlreadyDownloading(self.id).into());
        }
        self.transition(JobState::Loaded, JobState::Downloading)?;
        self.progress_percent = 0;
        Ok(())
    }

    pub fn complete(&mut self, output: PathBuf) -> Result<()> {
        self.transition(JobState::Downloading, JobState::Completed)?;
        self.progress_percent = 100;
        self.outcome = Some(Outcome::Completed(output));
        self.end_attempt();
        Ok(())
    }

    pub fn fail(&mut self, err: &Error) -> Result<()> {
        self.transition(JobState::Downloading, JobState::Failed)?;
        self.outcome = Some(Outcome::Failed {
            canceled: err.is_canceled(),
            reason: err.to_string(),
        });
        self.end_attempt();
        Ok(())
    }

    pub fn set_active_stream(&mut self, stream: Option<Arc<StreamDescriptor>>) {
        if self.state == JobState::Downloading {
            self.active_stream = stream;
        }
    }

    /// Progress is only recorded while downloading, later writes are dropped
    pub fn set_progress(&mut self, percent: u8) {
        if self.state == JobState::Downloading {
            self.progress_percent = percent.min(100);
        }
    }

    fn end_attempt(&mut self) {
        self.active_stream = None;
        self.finished = true;
    }

    fn filter_variants(
        &self,
        streams: &[Arc<StreamDescriptor>],
        stream_type: StreamType,
    ) -> (Vec<Arc<StreamDescriptor>>, Vec<Arc<StreamDescriptor>>) {
        let video_kind = if stream_type == StreamType::Progressive {
            StreamKind::Progressive
        } else {
            StreamKind::Video
        };

        (
            filter_variants(streams, video_kind, self.filter.video_container.as_deref()),
            filter_variants(
                streams,
                StreamKind::Audio,
                self.filter.audio_container.as_deref(),
            ),
        )
    }

    fn expect_state(&self, expected: JobState, to: JobState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                id: self.id,
                from: self.state,
                to,
            })
        }
    }

    fn transition(&mut self, from: JobState, to: JobState) -> Result<()> {
        self.expect_state(from, to)?;
        self.state = to;
        Ok(())
    }
}

/// Keep the streams of the given kind and container, best quality first.
/// The sort is stable so equal qualities keep the resolver's order.
fn filter_variants(
    streams: &[Arc<StreamDescriptor>],
    kind: StreamKind,
    container: Option<&str>,
) -> Vec<Arc<StreamDescriptor>> {
    let mut variants: Vec<_> = streams
        .iter()
        .filter(|s| s.kind == kind)
        .filter(|s| container.map_or(true, |c| s.container.eq_ignore_ascii_case(c)))
        .cloned()
        .collect();

    variants.sort_by(|a, b| quality_key(b).cmp(&quality_key(a)));
    variants
}

fn quality_key(stream: &StreamDescriptor) -> (u16, u16) {
    let height = stream.resolution.map_or(0, |r| r.height());
    let kbps = stream.bitrate.map_or(0, |b| b.kbps());
    match stream.kind {
        StreamKind::Audio => (kbps, 0),
        StreamKind::Video | StreamKind::Progressive => (height, kbps),
    }
}

fn check_usable(
    stream_type: StreamType,
    video: &[Arc<StreamDescriptor>],
    audio: &[Arc<StreamDescriptor>],
) -> std::result::Result<(), String> {
    let missing = match stream_type {
        StreamType::AudioOnly if audio.is_empty() => "audio",
        StreamType::Progressive if video.is_empty() => "progressive",
        StreamType::Adaptive if video.is_empty() => "video",
        StreamType::Adaptive if audio.is_empty() => "audio",
        _ => return Ok(()),
    };
    Err(format!("no usable {missing} stream"))
}

fn check_index(index: usize, len: usize) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(Error::Index { index, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{audio, progressive, sample_metadata, video};

    fn mp4_filter() -> VariantFilter {
        VariantFilter {
            video_container: Some("mp4".to_owned()),
            audio_container: Some("m4a".to_owned()),
        }
    }

    fn loaded(stream_type: StreamType) -> VideoJob {
        let mut job = VideoJob::new("https://example.com/A", stream_type, mp4_filter());
        job.begin_loading().unwrap();
        job.finish_loading(sample_metadata("A")).unwrap();
        job
    }

    fn labels(variants: &[Arc<StreamDescriptor>]) -> Vec<String> {
        variants.iter().map(|s| s.quality_label()).collect()
    }

    #[test]
    fn variants_are_filtered_and_sorted_by_quality() {
        let job = loaded(StreamType::Adaptive);
        assert_eq!(job.state(), JobState::Loaded);
        assert_eq!(labels(job.video_variants()), ["1080p", "480p"]);
        assert_eq!(labels(job.audio_variants()), ["128kbps"]);

        let job = loaded(StreamType::Progressive);
        assert_eq!(labels(job.video_variants()), ["720p", "360p"]);
    }

    #[test]
    fn equal_qualities_keep_resolver_order() {
        let mut job = VideoJob::new("u", StreamType::Adaptive, VariantFilter::default());
        job.begin_loading().unwrap();
        job.finish_loading(VideoMetadata {
            title: "ties".to_owned(),
            streams: vec![
                video("first", 720, "mp4"),
                video("second", 720, "webm"),
                video("best", 1080, "mp4"),
                audio("a", 128, "m4a"),
            ],
        })
        .unwrap();

        let ids: Vec<_> = job
            .video_variants()
            .iter()
            .map(|s| s.handle.format_id.as_str())
            .collect();
        assert_eq!(ids, ["best", "first", "second"]);
    }

    #[test]
    fn toggling_progressive_twice_is_stable() {
        let mut job = loaded(StreamType::Progressive);
        let original = labels(job.video_variants());
        job.select_video(1).unwrap();

        job.set_stream_type(StreamType::Adaptive).unwrap();
        assert_eq!(job.selection().selected_video, 0);
        assert_eq!(labels(job.video_variants()), ["1080p", "480p"]);

        job.set_stream_type(StreamType::Progressive).unwrap();
        assert_eq!(labels(job.video_variants()), original);
        assert_eq!(job.selection().selected_video, 0);
    }

    #[test]
    fn indices_stay_in_bounds_after_any_toggles() {
        let mut job = loaded(StreamType::Adaptive);
        let sequence = [
            StreamType::Progressive,
            StreamType::AudioOnly,
            StreamType::Adaptive,
            StreamType::AudioOnly,
            StreamType::Progressive,
            StreamType::Adaptive,
        ];

        for (i, stream_type) in sequence.into_iter().enumerate() {
            let len = job.video_variants().len();
            let _ = job.select_video(i % (len + 1));
            job.set_stream_type(stream_type).unwrap();

            let selection = job.selection();
            assert!(selection.selected_audio < job.audio_variants().len());
            if !selection.want_audio_only {
                assert!(selection.selected_video < job.video_variants().len());
            }
            assert!(job.required_streams().is_ok());
        }
    }

    #[test]
    fn selection_out_of_bounds_is_rejected() {
        let mut job = loaded(StreamType::Adaptive);
        assert!(matches!(
            job.select_video(2),
            Err(Error::Index { index: 2, len: 2 })
        ));
        assert!(matches!(
            job.select_audio(1),
            Err(Error::Index { index: 1, len: 1 })
        ));
        job.select_video(1).unwrap();
        assert_eq!(job.selection().selected_video, 1);
    }

    #[test]
    fn type_change_leaving_no_stream_is_rejected() {
        let mut job = VideoJob::new("u", StreamType::Adaptive, mp4_filter());
        job.begin_loading().unwrap();
        job.finish_loading(VideoMetadata {
            title: "no progressive".to_owned(),
            streams: vec![video("v", 1080, "mp4"), audio("a", 128, "m4a")],
        })
        .unwrap();

        assert!(matches!(
            job.set_stream_type(StreamType::Progressive),
            Err(Error::InvalidSelection(_))
        ));
        assert_eq!(job.selection().stream_type(), StreamType::Adaptive);
        assert_eq!(labels(job.video_variants()), ["1080p"]);
    }

    #[test]
    fn loading_without_usable_stream_fails() {
        let mut job = VideoJob::new("u", StreamType::Progressive, mp4_filter());
        job.begin_loading().unwrap();
        let err = job
            .finish_loading(VideoMetadata {
                title: "webm only".to_owned(),
                streams: vec![progressive("p", 720, "webm")],
            })
            .unwrap_err();

        assert!(matches!(err, Error::Resolution(ResolutionError::Unavailable(_))));
        assert_eq!(job.state(), JobState::LoadFailed);
        assert!(job.metadata().is_none());
    }

    #[test]
    fn terminal_states_are_reached_once() {
        let mut job = loaded(StreamType::Adaptive);
        job.begin_download().unwrap();
        assert!(matches!(
            job.begin_download(),
            Err(Error::Concurrency(ConcurrencyError::AlreadyDownloading(_)))
        ));

        job.set_progress(42);
        job.complete(PathBuf::from("A.mp4")).unwrap();
        assert_eq!(job.progress(), 100);
        assert!(job.is_finished());

        assert!(job.fail(&Error::from(crate::result::FetchError::Canceled)).is_err());
        job.set_progress(3);
        assert_eq!(job.progress(), 100);
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(job.outcome(), Some(&Outcome::Completed(PathBuf::from("A.mp4"))));
    }

    #[test]
    fn cancel_is_a_failure_that_remembers_the_cancel() {
        let mut job = loaded(StreamType::Progressive);
        job.begin_download().unwrap();
        job.fail(&Error::from(crate::result::FetchError::Canceled))
            .unwrap();

        assert_eq!(job.state(), JobState::Failed);
        assert!(job.was_canceled());
        assert!(job.is_finished());
    }

    #[test]
    fn selection_is_frozen_outside_loaded() {
        let mut job = loaded(StreamType::Adaptive);
        job.begin_download().unwrap();
        assert!(matches!(
            job.set_stream_type(StreamType::Progressive),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(job.select_video(0).is_err());
    }

    #[test]
    fn output_stem_prefers_custom_name() {
        let mut job = loaded(StreamType::Adaptive);
        assert_eq!(job.output_stem(), "A");
        job.set_custom_filename(Some("my/clip".to_owned())).unwrap();
        assert_eq!(job.output_stem(), "my clip");
        job.set_custom_filename(Some("  ".to_owned())).unwrap();
        assert_eq!(job.output_stem(), "A");
    }

    #[test]
    fn total_size_sums_required_streams() {
        let job = loaded(StreamType::Adaptive);
        let expected =
            job.video_variants()[0].size.unwrap() + job.audio_variants()[0].size.unwrap();
        assert_eq!(job.total_size(), Some(expected));
    }
}
