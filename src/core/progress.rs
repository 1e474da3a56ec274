//! Cooperative cancellation and progress reporting.
//!
//! A [`ProgressRange`] is passed by reference down the meshing call chain.
//! Long loops poll [`ProgressRange::is_cancelled`] at coarse checkpoints and
//! bail out leaving the mesh in a valid state. Clones share the same flag, so
//! one token can drive a whole batch of faces.
//!
//! # Example
//!
//! ```rust
//! use facemesh::core::progress::{Progress, ProgressRange};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let calls = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&calls);
//! let range = ProgressRange::new().with_progress(Progress::new(move |_, _, _| {
//!     seen.fetch_add(1, Ordering::Relaxed);
//! }));
//!
//! range.report(1, 4, "base mesh");
//! let shared = range.clone();
//! shared.cancel();
//! assert!(range.is_cancelled());
//! assert_eq!(calls.load(Ordering::Relaxed), 1);
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A progress callback that receives updates during long-running operations.
///
/// The callback receives:
/// - `current`: Current step (0-based)
/// - `total`: Total number of steps
/// - `message`: Description of the current operation
pub struct Progress {
    callback: Box<dyn Fn(usize, usize, &str) + Send + Sync>,
}

impl Progress {
    /// Create a new progress reporter with the given callback.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(usize, usize, &str) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    /// Report progress.
    #[inline]
    pub fn report(&self, current: usize, total: usize, message: &str) {
        (self.callback)(current, total, message);
    }

    /// Report progress of a sub-operation occupying step `range_current` of
    /// `range_total`, scaled by 1000.
    #[inline]
    pub fn report_sub(
        &self,
        sub_current: usize,
        sub_total: usize,
        range_current: usize,
        range_total: usize,
        message: &str,
    ) {
        if sub_total == 0 || range_total == 0 {
            return;
        }
        let sub_fraction = (sub_current.min(sub_total) * 1000) / sub_total;
        let effective = range_current * 1000 + sub_fraction;
        (self.callback)(effective, range_total * 1000, message);
    }

    /// A reporter that discards all updates.
    #[must_use]
    pub fn none() -> Self {
        Self::new(|_, _, _| {})
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::none()
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").finish_non_exhaustive()
    }
}

/// Cancellation flag plus optional progress sink, cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct ProgressRange {
    cancelled: Arc<AtomicBool>,
    progress: Option<Arc<Progress>>,
}

impl ProgressRange {
    /// A token that is never cancelled unless [`ProgressRange::cancel`] is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a progress reporter.
    #[must_use]
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Requests cancellation for every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Polls the flag. Non-blocking.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Forwards to the attached reporter, if any.
    pub fn report(&self, current: usize, total: usize, message: &str) {
        if let Some(progress) = &self.progress {
            progress.report(current, total, message);
        }
    }

    /// Forwards a sub-range update to the attached reporter, if any.
    pub fn report_sub(
        &self,
        sub_current: usize,
        sub_total: usize,
        range_current: usize,
        range_total: usize,
        message: &str,
    ) {
        if let Some(progress) = &self.progress {
            progress.report_sub(sub_current, sub_total, range_current, range_total, message);
        }
    }
}
