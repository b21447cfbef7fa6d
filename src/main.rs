mod cli;
mod logging;

use std::{collections::HashSet, sync::Arc};

use clap::Parser;
use crossbeam_channel::Receiver;
use miette::{bail, miette, IntoDiagnostic, Result};
use tracing::{error, info, warn};

use vidq::{
    config::Settings,
    job::{JobId, Outcome},
    outside::{Ffmpeg, Ytdl},
    queue::Queue,
    result,
    types::StreamType,
    workers::QueueEvent,
};

use crate::cli::Args;

fn main() -> Result<()> {
    // Initialize the environment & CLI
    let args = Args::parse();
    logging::init_logging(args.log_level)?;

    let mut settings = Settings::load(Some(args.config.as_path()))?;
    args.override_settings(&mut settings);
    info!("Saving videos into '{}'", settings.save_dir.display());

    let (ytdl, ffmpeg) = load_external_components(&settings)?;
    let ytdl = Arc::new(ytdl);
    let queue = Queue::new(settings, ytdl.clone(), ytdl, Arc::new(ffmpeg));
    let events = queue.subscribe();

    // Resolutions run one at a time
    let mut jobs = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        if let Some(id) = load(&queue, &events, url)? {
            jobs.push(id);
        }
    }
    if jobs.is_empty() {
        bail!("No video could be loaded");
    }

    for &id in &jobs {
        if let Err(err) = select(&queue, id, &args, jobs.len() == 1) {
            warn!("Job {id}: {err}, skipping it");
            queue.remove(id)?;
        }
    }

    // Downloads all run at once
    let mut running: HashSet<_> = queue.start_downloads().into_iter().collect();
    info!("{} downloads started", running.len());
    while !running.is_empty() {
        if let QueueEvent::Finished { job, state } = events.recv().into_diagnostic()? {
            running.remove(&job);
            info!("Job {job} ended as {state:?}, {} left", running.len());
        }
    }

    report(&queue)
}

/// Look for the external programs concurrently, as each check runs a process
fn load_external_components(settings: &Settings) -> Result<(Ytdl, Ffmpeg)> {
    let ytdl_program = settings.ytdl_program.clone();
    let ffmpeg_program = settings.ffmpeg_program.clone();
    let ffprobe_program = settings.ffprobe_program.clone();

    let ytdl_thread = std::thread::spawn(move || Ytdl::new(ytdl_program.as_deref()));
    let ffmpeg_thread = std::thread::spawn(move || {
        Ffmpeg::new(ffmpeg_program.as_deref(), ffprobe_program.as_deref())
    });

    let ytdl = ytdl_thread
        .join()
        .map_err(|_| miette!("Could not join thread"))??;
    let ffmpeg = ffmpeg_thread
        .join()
        .map_err(|_| miette!("Could not join thread"))??;

    Ok((ytdl, ffmpeg))
}

/// Resolve one URL and wait for the outcome. Return the job if it loaded.
fn load(queue: &Queue, events: &Receiver<QueueEvent>, url: &str) -> Result<Option<JobId>> {
    let id = match queue.load(url) {
        Ok(id) => id,
        Err(err) => {
            error!("Could not load '{url}': {err}");
            return Ok(None);
        }
    };

    loop {
        match events.recv().into_diagnostic()? {
            QueueEvent::Loaded(loaded) if loaded == id => return Ok(Some(id)),
            QueueEvent::LoadFailed { url: failed, .. } if failed == url.trim() => return Ok(None),
            _ => {}
        }
    }
}

/// Apply the variants chosen on the command line
fn select(queue: &Queue, id: JobId, args: &Args, single: bool) -> result::Result<()> {
    let stream_type = queue.settings().stream_type;
    if stream_type != StreamType::AudioOnly {
        queue.select_video(id, args.video)?;
    }
    if stream_type != StreamType::Progressive {
        queue.select_audio(id, args.audio)?;
    }

    match (&args.name, single) {
        (Some(name), true) => queue.set_custom_filename(id, Some(name.clone()))?,
        (Some(_), false) => warn!("--name is ignored with several URLs"),
        (None, _) => {}
    }
    Ok(())
}

/// Print the outcome of every job, failing if any download failed
fn report(queue: &Queue) -> Result<()> {
    let jobs = queue.snapshot();
    let mut failed = 0;

    for job in &jobs {
        let title = job.title().unwrap_or(job.url());
        match job.outcome() {
            Some(Outcome::Completed(path)) => info!("'{title}' saved as '{}'", path.display()),
            Some(Outcome::Failed { canceled: true, .. }) => {
                failed += 1;
                warn!("'{title}' was canceled");
            }
            Some(Outcome::Failed { reason, .. }) => {
                failed += 1;
                error!("'{title}' failed: {reason}");
            }
            None => warn!("'{title}' was not downloaded"),
        }
    }

    if failed > 0 {
        bail!("{failed} of {} downloads failed", jobs.len());
    }

    info!("All downloads completed");
    Ok(())
}
