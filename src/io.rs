use std::{
    fs::OpenOptions,
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, warn};

use crate::{job::JobId, utils::MutexUtils};

/// Extension of the placeholder reserving an output path
const PLACEHOLDER_EXT: &str = "empty";

pub fn touch(path: &Path) -> io::Result<()> {
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

/// Find a path `<stem>.<ext>` in `out_dir` that is not taken yet,
/// falling back to `<stem> (<count>).<ext>`.
///
/// With `check_empty`, a path is also taken if its placeholder exists.
pub fn find_unused_prefix(
    out_dir: &Path,
    stem: &str,
    extension: &str,
    check_empty: bool,
) -> io::Result<PathBuf> {
    let mut output = out_dir.to_path_buf();

    let test_output = |output: &Path| {
        !(output.exists() || (check_empty && output.with_extension(PLACEHOLDER_EXT).exists()))
    };

    // Check filenames one by one until one does not exist

    // Format for 1st file: <stem>.<ext>
    output.push(format!("{stem}.{extension}"));
    if test_output(&output) {
        return Ok(output);
    }

    // Format for 2nd file and up: <stem> (<count>).<ext>
    for n in 2u16.. {
        output.set_file_name(format!("{stem} ({n}).{extension}"));
        if test_output(&output) {
            return Ok(output);
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("Too many files named '{stem}'"),
    ))
}

/// An output path reserved for one job.
///
/// The reservation is backed by an empty placeholder file next to the output,
/// so that concurrent jobs with the same title pick different paths.
/// The placeholder is removed when the reservation is dropped.
#[derive(Debug)]
pub struct Reservation {
    output: PathBuf,
    placeholder: PathBuf,
}

impl Reservation {
    /// Reserve `<stem>.<ext>` (or the first free variant of it) in `out_dir`.
    ///
    /// Uses internally a lock to avoid returning the same path in two concurrent
    /// calls. This however assumes that the output directory is not changing
    /// outside of this method during the call.
    pub fn new(out_dir: &Path, stem: &str, extension: &str) -> io::Result<Self> {
        static LOCK: Mutex<()> = Mutex::new(());

        LOCK.with_lock(|_lock| {
            let output = find_unused_prefix(out_dir, stem, extension, true)?;
            let placeholder = output.with_extension(PLACEHOLDER_EXT);
            touch(&placeholder)?;

            debug!("Reserved output '{}'", output.display());
            Ok(Self {
                output,
                placeholder,
            })
        })
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// The file name of the output, without its directory
    pub fn file_name(&self) -> String {
        self.output
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.placeholder) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(
                    "Could not remove placeholder '{}': {err}",
                    self.placeholder.display()
                );
            }
        }
    }
}

/// Prefix of the intermediate files of a job, unique per job and role
pub fn intermediate_prefix(role: &str, job: JobId) -> String {
    format!("{role}_{job}_")
}

/// Delete a file that is not needed anymore, logging failures
pub fn remove_intermediate(path: &Path) {
    debug!("Deleting intermediate '{}'", path.display());
    if let Err(err) = std::fs::remove_file(path) {
        warn!("Could not delete '{}': {err}", path.display());
    }
}
