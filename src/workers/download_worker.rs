use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::{
    config::Settings,
    io::{intermediate_prefix, remove_intermediate, Reservation},
    job::{
        CancellationToken, JobCell, JobId, JobStore, ProgressCoalescer, ProgressSink,
        RequiredStreams,
    },
    outside::{StreamFetcher, Transcoder},
    result::{Error, FetchError, Result, TranscodeError},
    types::StreamDescriptor,
};

use super::{QueueEvent, Worker};

/// Download the selected streams of one job, then merge or convert them.
///
/// The job must already be marked as downloading. Whatever happens, the
/// worker leaves the job in a terminal state and never panics on a
/// collaborator error.
pub struct DownloadWorker {
    cell: Arc<JobCell>,
    store: Arc<JobStore>,
    fetcher: Arc<dyn StreamFetcher>,
    transcoder: Arc<dyn Transcoder>,
    settings: Arc<Settings>,
    events: Sender<QueueEvent>,
}

impl Worker for DownloadWorker {
    fn thread_name(&self) -> String {
        format!("download-{}", self.cell.id())
    }

    fn run(self) {
        let id = self.cell.id();
        let res = self.download();

        let state = self.cell.with_job(|job| {
            let transition = match &res {
                Ok(output) => job.complete(output.clone()),
                Err(err) => job.fail(err),
            };
            if let Err(err) = transition {
                warn!("Job {id}: {err}");
            }
            job.state()
        });

        match &res {
            Ok(output) => info!("Job {id}: completed into '{}'", output.display()),
            Err(err) if err.is_canceled() => warn!("Job {id}: canceled"),
            Err(err) => error!("Job {id}: download failed: {err}"),
        }

        let _ = self.events.send(QueueEvent::Finished { job: id, state });
    }
}

impl DownloadWorker {
    pub fn new(
        cell: Arc<JobCell>,
        store: Arc<JobStore>,
        fetcher: Arc<dyn StreamFetcher>,
        transcoder: Arc<dyn Transcoder>,
        settings: Arc<Settings>,
        events: Sender<QueueEvent>,
    ) -> Self {
        Self {
            cell,
            store,
            fetcher,
            transcoder,
            settings,
            events,
        }
    }

    fn id(&self) -> JobId {
        self.cell.id()
    }

    fn cancel(&self) -> &CancellationToken {
        self.cell.cancel_token()
    }

    fn save_dir(&self) -> &Path {
        &self.settings.save_dir
    }

    /// Fetch, merge and clean up. Return the path of the final output.
    fn download(&self) -> Result<PathBuf> {
        let (required, stem) = self
            .cell
            .with_job(|job| job.required_streams().map(|r| (r, job.output_stem())))?;
        self.cancel().check(|| FetchError::Canceled)?;
        std::fs::create_dir_all(self.save_dir())?;

        if let Some(size) = required.total_size() {
            debug!("Job {}: {size} bytes to fetch", self.id());
        }

        let output = match required {
            RequiredStreams::Progressive(video) => self.fetch_final(&video, &stem)?,
            RequiredStreams::Audio(audio) => match self.settings.convert_audio {
                None => self.fetch_final(&audio, &stem)?,
                Some(target) => {
                    let reservation =
                        Reservation::new(self.save_dir(), &stem, target.with_no_dot())?;
                    let audio_path = self.fetch_intermediate("audio", &audio, &stem)?;

                    info!("Job {}: converting audio to {target}", self.id());
                    self.transcode(|progress, cancel| {
                        self.transcoder
                            .convert(&audio_path, reservation.output(), progress, cancel)
                    })?;

                    remove_intermediate(&audio_path);
                    reservation.output().to_path_buf()
                }
            },
            RequiredStreams::Adaptive { video, audio } => {
                let reservation = Reservation::new(self.save_dir(), &stem, &video.container)?;
                let video_path = self.fetch_intermediate("video", &video, &stem)?;
                let audio_path = self.fetch_intermediate("audio", &audio, &stem)?;

                // On failure the intermediates stay, for inspection
                info!("Job {}: merging video and audio", self.id());
                self.transcode(|progress, cancel| {
                    self.transcoder.merge(
                        &video_path,
                        &audio_path,
                        reservation.output(),
                        progress,
                        cancel,
                    )
                })?;

                remove_intermediate(&video_path);
                remove_intermediate(&audio_path);
                reservation.output().to_path_buf()
            }
        };

        self.store.on_complete(self.id(), &output);
        Ok(output)
    }

    /// Fetch a stream that needs no further processing straight to its output path
    fn fetch_final(&self, stream: &Arc<StreamDescriptor>, stem: &str) -> Result<PathBuf> {
        let reservation = Reservation::new(self.save_dir(), stem, &stream.container)?;
        self.fetch(stream, "", &reservation.file_name())
    }

    /// Fetch a stream to a file named after the job, to be processed later
    fn fetch_intermediate(
        &self,
        role: &str,
        stream: &Arc<StreamDescriptor>,
        stem: &str,
    ) -> Result<PathBuf> {
        let filename = format!("{stem}.{}", stream.container);
        self.fetch(stream, &intermediate_prefix(role, self.id()), &filename)
    }

    fn fetch(
        &self,
        stream: &Arc<StreamDescriptor>,
        prefix: &str,
        filename: &str,
    ) -> Result<PathBuf> {
        let id = self.id();
        self.cancel().check(|| FetchError::Canceled)?;

        info!("Job {id}: fetching {stream}");
        self.cell
            .with_job(|job| job.set_active_stream(Some(Arc::clone(stream))));
        self.store.on_progress(id, 0);

        let mut coalescer = ProgressCoalescer::new();
        let res = self.fetcher.fetch(
            stream,
            self.save_dir(),
            prefix,
            Some(filename),
            &mut |done: u64, total: u64| {
                if let Some(percent) = coalescer.update(done as f64, total as f64) {
                    self.store.on_progress(id, percent);
                }
            },
            self.cancel(),
        );

        self.cell.with_job(|job| job.set_active_stream(None));
        let path = res?;
        debug!("Job {id}: fetched '{}'", path.display());
        Ok(path)
    }

    /// Run a transcoder operation, routing its progress to the job
    fn transcode<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(
            &mut dyn FnMut(f64, f64),
            &CancellationToken,
        ) -> std::result::Result<(), TranscodeError>,
    {
        let id = self.id();
        self.cancel().check(|| TranscodeError::Canceled)?;
        self.store.on_progress(id, 0);

        let mut coalescer = ProgressCoalescer::new();
        op(
            &mut |elapsed: f64, total: f64| {
                if let Some(percent) = coalescer.update(elapsed, total) {
                    self.store.on_progress(id, percent);
                }
            },
            self.cancel(),
        )
        .map_err(Error::from)
    }
}
