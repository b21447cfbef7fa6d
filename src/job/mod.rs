mod cancel;
mod progress;
mod store;
mod video_job;

pub use cancel::CancellationToken;
pub use progress::{ProgressCoalescer, ProgressSink};
pub use store::{JobCell, JobStore};
pub use video_job::{
    JobId, JobMetadata, JobState, Outcome, RequiredStreams, Selection, VariantFilter, VideoJob,
};
