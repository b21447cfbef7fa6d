use std::path::Path;

use super::JobId;

/// Where workers report progress of the job they drive.
///
/// Implementations are called concurrently from every download worker and
/// must not corrupt the store they write into.
pub trait ProgressSink: Send + Sync {
    /// The job's current step reached `percent` (0 to 100)
    fn on_progress(&self, job: JobId, percent: u8);

    /// The job produced its final output file
    fn on_complete(&self, job: JobId, output: &Path);
}

/// Turn raw `(done, total)` pairs of one stream into percentages,
/// forwarding only values that move forward.
///
/// Duplicate or out-of-order values are dropped so that the display only sees
/// a monotonic sequence.
#[derive(Debug, Default)]
pub struct ProgressCoalescer {
    last: Option<u8>,
}

impl ProgressCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the percentage to forward, if it changed
    pub fn update(&mut self, done: f64, total: f64) -> Option<u8> {
        if total.is_nan() || total <= 0.0 || done.is_nan() {
            return None;
        }

        let percent = (done / total * 100.0).clamp(0.0, 100.0) as u8;
        match self.last {
            Some(last) if percent <= last => None,
            _ => {
                self.last = Some(percent);
                Some(percent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwards_only_increasing_values() {
        let mut coalescer = ProgressCoalescer::new();
        let updates = [(0., 10.), (1., 10.), (1., 10.), (0.5, 10.), (5., 10.), (12., 10.)];
        let forwarded: Vec<u8> = updates
            .into_iter()
            .filter_map(|(done, total)| coalescer.update(done, total))
            .collect();

        assert_eq!(forwarded, vec![0, 10, 50, 100]);
    }

    #[test]
    fn unknown_total_is_ignored() {
        let mut coalescer = ProgressCoalescer::new();
        assert_eq!(coalescer.update(100.0, 0.0), None);
        assert_eq!(coalescer.update(f64::NAN, 10.0), None);
        assert_eq!(coalescer.update(1.0, 4.0), Some(25));
    }
}
