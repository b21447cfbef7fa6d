use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::{
    job::{JobCell, JobStore, VideoJob},
    outside::MetadataResolver,
    result::{ConcurrencyError, Error, Result},
};

use super::{QueueEvent, Worker};

/// Proof that no other load is in flight. Released on drop.
#[derive(Debug)]
pub struct LoadPermit(Arc<AtomicBool>);

impl LoadPermit {
    /// Take the permit, or fail right away if a load is already running
    pub fn acquire(loading: &Arc<AtomicBool>) -> Result<Self> {
        loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ConcurrencyError::LoadBusy)?;
        Ok(Self(loading.clone()))
    }
}

impl Drop for LoadPermit {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resolve the URL of a placeholder job into its metadata.
///
/// On failure, the placeholder is removed from the store.
/// No resolver error goes past this worker.
pub struct LoadWorker {
    cell: Arc<JobCell>,
    store: Arc<JobStore>,
    resolver: Arc<dyn MetadataResolver>,
    events: Sender<QueueEvent>,
    permit: LoadPermit,
}

impl Worker for LoadWorker {
    fn thread_name(&self) -> String {
        format!("load-{}", self.cell.id())
    }

    fn run(self) {
        let LoadWorker {
            cell,
            store,
            resolver,
            events,
            permit,
        } = self;

        let id = cell.id();
        let url = cell.with_job(|job| job.url().to_owned());
        let res = cell.with_job(VideoJob::begin_loading).and_then(|()| {
            info!("Resolving '{url}'");
            let metadata = resolver.resolve(&url)?;
            cell.with_job(|job| job.finish_loading(metadata))
        });

        let event = match res {
            Ok(()) => {
                cell.with_job(|job| {
                    info!(
                        "Loaded '{}': {} video and {} audio variants",
                        job.title().unwrap_or_default(),
                        job.video_variants().len(),
                        job.audio_variants().len()
                    );
                });
                QueueEvent::Loaded(id)
            }
            Err(err) => Self::discard(&cell, &store, &url, err),
        };

        // Release the permit first, so that a new load can start as soon as
        // the event is seen
        drop(permit);
        let _ = events.send(event);
    }
}

impl LoadWorker {
    pub fn new(
        cell: Arc<JobCell>,
        store: Arc<JobStore>,
        resolver: Arc<dyn MetadataResolver>,
        events: Sender<QueueEvent>,
        permit: LoadPermit,
    ) -> Self {
        Self {
            cell,
            store,
            resolver,
            events,
            permit,
        }
    }

    /// Mark the job as failed and drop its placeholder row
    fn discard(cell: &JobCell, store: &JobStore, url: &str, err: Error) -> QueueEvent {
        error!("Could not load '{url}': {err}");

        // `finish_loading` already moved the job to LoadFailed when no stream was usable
        let _ = cell.with_job(VideoJob::fail_loading);
        if store.remove(cell.id()).is_err() {
            debug!("Job {} was already removed", cell.id());
        }

        QueueEvent::LoadFailed {
            url: url.to_owned(),
            reason: err.to_string(),
        }
    }
}
