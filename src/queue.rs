use std::sync::{atomic::AtomicBool, Arc};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    job::{JobCell, JobId, JobState, JobStore, VideoJob},
    outside::{MetadataResolver, StreamFetcher, Transcoder},
    result::{Error, ResolutionError, Result},
    types::StreamType,
    workers::{DownloadWorker, LoadPermit, LoadWorker, QueueEvent, Worker},
};

/// The download queue, as driven by a presentation layer.
///
/// Every operation returns quickly: resolutions and downloads run on their
/// own worker threads and report back through the store and the event channel.
pub struct Queue {
    store: Arc<JobStore>,
    settings: Arc<Settings>,
    resolver: Arc<dyn MetadataResolver>,
    fetcher: Arc<dyn StreamFetcher>,
    transcoder: Arc<dyn Transcoder>,
    loading: Arc<AtomicBool>,
    events_tx: Sender<QueueEvent>,
    events_rx: Receiver<QueueEvent>,
}

impl Queue {
    pub fn new(
        settings: Settings,
        resolver: Arc<dyn MetadataResolver>,
        fetcher: Arc<dyn StreamFetcher>,
        transcoder: Arc<dyn Transcoder>,
    ) -> Self {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        Self {
            store: Arc::new(JobStore::new()),
            settings: Arc::new(settings),
            resolver,
            fetcher,
            transcoder,
            loading: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Receive the queue events.
    ///
    /// All subscribers share a single stream: each event goes to one of them.
    /// The channel is unbounded and the queue holds a receiver itself, so
    /// events pile up until some subscriber drains them. A display layer that
    /// only polls [`Queue::snapshot`] should still drain it now and then.
    pub fn subscribe(&self) -> Receiver<QueueEvent> {
        self.events_rx.clone()
    }

    /// Add a placeholder job for `url` and start resolving it.
    ///
    /// Only one resolution runs at a time, a second call meanwhile fails
    /// with [`crate::result::ConcurrencyError::LoadBusy`].
    pub fn load(&self, url: &str) -> Result<JobId> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ResolutionError::InvalidReference("empty URL".to_owned()).into());
        }

        let permit = LoadPermit::acquire(&self.loading)?;
        let job = VideoJob::new(
            url,
            self.settings.stream_type,
            self.settings.variant_filter(),
        );
        let id = job.id();
        let row = self.store.append(job);
        let cell = self.cell(id)?;
        debug!("Job {id}: placeholder for '{url}' at row {row}");

        let worker = LoadWorker::new(
            cell.clone(),
            self.store.clone(),
            self.resolver.clone(),
            self.events_tx.clone(),
            permit,
        );
        if let Err(err) = cell.spawn_worker(|| Ok(worker.spawn()?)) {
            let _ = self.store.remove(id);
            return Err(err);
        }

        Ok(id)
    }

    pub fn set_stream_type(&self, id: JobId, stream_type: StreamType) -> Result<()> {
        self.cell(id)?
            .with_job(|job| job.set_stream_type(stream_type))
    }

    pub fn select_video(&self, id: JobId, index: usize) -> Result<()> {
        self.cell(id)?.with_job(|job| job.select_video(index))
    }

    pub fn select_audio(&self, id: JobId, index: usize) -> Result<()> {
        self.cell(id)?.with_job(|job| job.select_audio(index))
    }

    pub fn set_custom_filename(&self, id: JobId, name: Option<String>) -> Result<()> {
        self.cell(id)?.with_job(|job| job.set_custom_filename(name))
    }

    /// Start downloading a loaded job on its own worker
    pub fn start_download(&self, id: JobId) -> Result<()> {
        let cell = self.cell(id)?;
        cell.spawn_worker(|| {
            cell.with_job(VideoJob::begin_download)?;

            let worker = DownloadWorker::new(
                cell.clone(),
                self.store.clone(),
                self.fetcher.clone(),
                self.transcoder.clone(),
                self.settings.clone(),
                self.events_tx.clone(),
            );
            worker.spawn().map_err(|err| {
                let err = Error::from(err);
                let _ = cell.with_job(|job| job.fail(&err));
                err
            })
        })?;

        info!("Job {id}: download started");
        Ok(())
    }

    /// Start every loaded job, returning the ones that were started
    pub fn start_downloads(&self) -> Vec<JobId> {
        self.store
            .ids()
            .into_iter()
            .filter(|&id| self.store.find(id).map(|cell| cell.state()) == Some(JobState::Loaded))
            .filter(|&id| match self.start_download(id) {
                Ok(()) => true,
                Err(err) => {
                    warn!("Job {id}: could not start: {err}");
                    false
                }
            })
            .collect()
    }

    /// Ask the worker downloading the job to stop.
    ///
    /// Return whether a download was running. The worker stops on its own,
    /// use [`Queue::join`] to wait for it.
    pub fn cancel(&self, id: JobId) -> Result<bool> {
        let cell = self.cell(id)?;
        if cell.state() != JobState::Downloading {
            debug!("Job {id}: not downloading, nothing to cancel");
            return Ok(false);
        }

        info!("Job {id}: canceling");
        cell.cancel_token().cancel();
        Ok(true)
    }

    /// Remove a job from the queue and return its last state.
    ///
    /// A running download is canceled first, and its worker has exited
    /// by the time the job is detached.
    pub fn remove(&self, id: JobId) -> Result<VideoJob> {
        let cell = self.cell(id)?;
        cell.retire();

        let cell = self.store.remove(id)?;
        debug!("Job {id}: removed");
        Ok(cell.snapshot())
    }

    /// Remove the job shown at the given row
    pub fn remove_at(&self, index: usize) -> Result<VideoJob> {
        let id = self.store.id_at(index)?;
        self.remove(id)
    }

    /// Remove every job a download worker is done with. Return how many were removed.
    pub fn clear_completed(&self) -> usize {
        let done: Vec<_> = self
            .store
            .snapshot()
            .into_iter()
            .filter(|job| job.is_finished())
            .map(|job| job.id())
            .collect();

        done.into_iter()
            .filter(|&id| self.remove(id).is_ok())
            .count()
    }

    /// Wait for the worker of the job to exit. Return whether there was one.
    pub fn join(&self, id: JobId) -> Result<bool> {
        Ok(self.cell(id)?.join_worker())
    }

    /// Copies of every job in display order
    pub fn snapshot(&self) -> Vec<VideoJob> {
        self.store.snapshot()
    }

    fn cell(&self, id: JobId) -> Result<Arc<JobCell>> {
        self.store.find(id).ok_or(Error::UnknownJob(id))
    }
}
