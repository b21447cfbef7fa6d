use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use tracing::{debug, trace, warn};

use crate::{
    result::{Error, Result},
    utils::MutexUtils,
};

use super::{CancellationToken, JobId, JobState, ProgressSink, VideoJob};

/// One slot of the store: a job, its cancellation token and the worker driving it.
///
/// The job has its own lock, distinct from the store's structural lock.
/// It is only ever held for a single read or write, never across I/O.
/// When both are needed, the worker slot is locked before the job.
#[derive(Debug)]
pub struct JobCell {
    id: JobId,
    job: Mutex<VideoJob>,
    cancel: CancellationToken,
    worker: Mutex<WorkerSlot>,
}

#[derive(Debug, Default)]
struct WorkerSlot {
    handle: Option<JoinHandle<()>>,
    /// Set once the job is being removed, no worker starts afterward
    retired: bool,
}

impl JobCell {
    fn new(job: VideoJob) -> Self {
        Self {
            id: job.id(),
            job: Mutex::new(job),
            cancel: CancellationToken::new(),
            worker: Mutex::new(WorkerSlot::default()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Run `f` with the job locked
    pub fn with_job<R, F: FnOnce(&mut VideoJob) -> R>(&self, f: F) -> R {
        self.job.with_lock(|mut job| f(&mut *job))
    }

    pub fn snapshot(&self) -> VideoJob {
        self.with_job(|job| job.clone())
    }

    pub fn state(&self) -> JobState {
        self.with_job(|job| job.state())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Attach the worker returned by `spawn`.
    ///
    /// The worker slot stays locked while `spawn` runs, so [`JobCell::retire`]
    /// sees either no worker or the new one. Fails with
    /// [`Error::UnknownJob`] once the job is retired, without calling `spawn`.
    pub(crate) fn spawn_worker<F>(&self, spawn: F) -> Result<()>
    where
        F: FnOnce() -> Result<JoinHandle<()>>,
    {
        self.worker.with_lock(|mut slot| {
            if slot.retired {
                return Err(Error::UnknownJob(self.id));
            }

            let handle = spawn()?;
            if let Some(previous) = slot.handle.replace(handle) {
                // The previous worker (a loader) is done or about to be
                if !previous.is_finished() {
                    debug!("Job {}: previous worker still running, detaching it", self.id);
                }
            }
            Ok(())
        })
    }

    /// Wait for the worker attached to the job to exit.
    ///
    /// Return whether a worker was joined. Never joins the calling thread.
    pub(crate) fn join_worker(&self) -> bool {
        let handle = self.worker.with_lock(|mut slot| slot.handle.take());
        self.join(handle)
    }

    /// Stop the job for good before its removal.
    ///
    /// A running download is canceled and its worker joined. A loader is left
    /// running, as it drops the job itself when the resolution fails.
    /// The state is read with the worker slot locked, so no download can
    /// start in between. Return whether a worker was joined.
    pub(crate) fn retire(&self) -> bool {
        let handle = self.worker.with_lock(|mut slot| {
            slot.retired = true;
            match self.state() {
                JobState::Downloading => {
                    debug!("Job {}: canceling before removal", self.id);
                    self.cancel.cancel();
                    slot.handle.take()
                }
                JobState::Pending | JobState::Loading => None,
                _ => slot.handle.take(),
            }
        });
        self.join(handle)
    }

    fn join(&self, handle: Option<JoinHandle<()>>) -> bool {
        match handle {
            Some(handle) if handle.thread().id() == thread::current().id() => {
                debug!("Job {}: not joining the current thread", self.id);
                false
            }
            Some(handle) => {
                if handle.join().is_err() {
                    warn!("Job {}: worker panicked", self.id);
                }
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    cells: HashMap<JobId, Arc<JobCell>>,
    /// Display order of the jobs
    order: Vec<JobId>,
}

impl Slots {
    /// Set the display row of every job from `from` onward
    fn renumber(&self, from: usize) {
        for (row, id) in self.order.iter().enumerate().skip(from) {
            if let Some(cell) = self.cells.get(id) {
                cell.with_job(|job| job.display_row = row);
            }
        }
    }

    fn detach(&mut self, index: usize) -> Result<Arc<JobCell>> {
        let id = self.order.remove(index);
        self.renumber(index);
        self.cells.remove(&id).ok_or(Error::UnknownJob(id))
    }
}

/// The ordered collection of jobs shown to the user and mutated by workers.
///
/// Jobs live in an arena indexed by their stable [`JobId`], and the display
/// order is a separate projection. The structural lock guards both and is
/// held only for an insert, a removal or a lookup, so a removal cannot shift
/// the slot a worker writes to.
#[derive(Debug, Default)]
pub struct JobStore {
    slots: Mutex<Slots>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a job at the end and return its row
    pub fn append(&self, mut job: VideoJob) -> usize {
        self.slots.with_lock(|mut slots| {
            let row = slots.order.len();
            job.display_row = row;

            let id = job.id();
            slots.cells.insert(id, Arc::new(JobCell::new(job)));
            slots.order.push(id);
            trace!("Job {id} appended at row {row}");
            row
        })
    }

    /// Detach the job at the given row. Later rows move up by one.
    pub fn remove_at(&self, index: usize) -> Result<Arc<JobCell>> {
        self.slots.with_lock(|mut slots| {
            let len = slots.order.len();
            if index >= len {
                return Err(Error::Index { index, len });
            }
            slots.detach(index)
        })
    }

    /// Detach the job with the given id
    pub fn remove(&self, id: JobId) -> Result<Arc<JobCell>> {
        self.slots.with_lock(|mut slots| {
            let index = slots
                .order
                .iter()
                .position(|&other| other == id)
                .ok_or(Error::UnknownJob(id))?;
            slots.detach(index)
        })
    }

    /// A copy of the job at the given row
    pub fn get(&self, index: usize) -> Option<VideoJob> {
        self.slots.with_lock(|slots| {
            let id = slots.order.get(index)?;
            slots.cells.get(id).map(|cell| cell.snapshot())
        })
    }

    pub fn find(&self, id: JobId) -> Option<Arc<JobCell>> {
        self.slots.with_lock(|slots| slots.cells.get(&id).cloned())
    }

    /// Id of the job at the given row
    pub fn id_at(&self, index: usize) -> Result<JobId> {
        self.slots.with_lock(|slots| {
            slots.order.get(index).copied().ok_or(Error::Index {
                index,
                len: slots.order.len(),
            })
        })
    }

    /// Call `f` on every job in display order.
    ///
    /// The store cannot change during the iteration, keep `f` short.
    pub fn for_each<F: FnMut(&VideoJob)>(&self, mut f: F) {
        self.slots.with_lock(|slots| {
            for id in &slots.order {
                if let Some(cell) = slots.cells.get(id) {
                    cell.with_job(|job| f(job));
                }
            }
        })
    }

    /// Copies of every job in display order
    pub fn snapshot(&self) -> Vec<VideoJob> {
        let mut jobs = Vec::with_capacity(self.len());
        self.for_each(|job| jobs.push(job.clone()));
        jobs
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.slots.with_lock(|slots| slots.order.clone())
    }

    pub fn len(&self) -> usize {
        self.slots.with_lock(|slots| slots.order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` on the job with the given id, holding the structural lock
    /// during the write so no removal can happen in between.
    fn with_job_by_id<R, F: FnOnce(&mut VideoJob) -> R>(&self, id: JobId, f: F) -> Result<R> {
        self.slots.with_lock(|slots| {
            let cell = slots.cells.get(&id).ok_or(Error::UnknownJob(id))?;
            Ok(cell.with_job(f))
        })
    }
}

impl ProgressSink for JobStore {
    fn on_progress(&self, job: JobId, percent: u8) {
        if self
            .with_job_by_id(job, |job| job.set_progress(percent))
            .is_err()
        {
            trace!("Job {job} is gone, dropping progress {percent}%");
        }
    }

    fn on_complete(&self, job: JobId, output: &Path) {
        debug!("Job {job}: output written to '{}'", output.display());
        let _ = self.with_job_by_id(job, |job| job.set_progress(100));
    }
}
