mod download_worker;
mod load_worker;

use std::{
    io,
    thread::{self, JoinHandle},
};

pub use download_worker::DownloadWorker;
pub use load_worker::{LoadPermit, LoadWorker};

use crate::job::{JobId, JobState};

/// Coarse notifications sent by the workers, for a display layer to react on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// The job's metadata is resolved and variants can be selected
    Loaded(JobId),
    /// The placeholder job was dropped from the store
    LoadFailed { url: String, reason: String },
    /// A download worker exited, leaving the job in `state`
    Finished { job: JobId, state: JobState },
}

/// A unit of background work bound to one job
pub trait Worker: Send + Sized + 'static {
    /// Name of the thread running the worker, shown in the logs
    fn thread_name(&self) -> String;

    fn run(self);

    /// Start the worker on its own thread
    fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(self.thread_name())
            .spawn(move || self.run())
    }
}
