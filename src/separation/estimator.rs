use std::{
    sync::{atomic::Ordering, Arc, Mutex},
    time::Instant,
};

use serde_json::json;

use super::runner::CancelToken;
use crate::io::settings::{PersistentStore, PROCESSING_RATE_KEY};

pub const DEFAULT_RATE: f64 = 1.0;
/// Upper bound on reported progress until the job really finishes.
pub const PROGRESS_CAP: f64 = 0.95;
const HISTORY_WEIGHT: f64 = 0.8;

/// Predicts how long separation takes on this machine.
///
/// The rate is minutes of processing per minute of audio, smoothed with an
/// exponential moving average and persisted through the injected store.
pub struct TimeEstimator {
    store: Arc<dyn PersistentStore>,
    rate: Mutex<f64>,
}

impl TimeEstimator {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        let rate = store
            .get_f64(PROCESSING_RATE_KEY)
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or(DEFAULT_RATE);
        Self {
            store,
            rate: Mutex::new(rate),
        }
    }

    pub fn rate(&self) -> f64 {
        match self.rate.lock() {
            Ok(r) => *r,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Expected wall-clock seconds to separate `audio_duration` seconds.
    pub fn estimate_total(&self, audio_duration: f64) -> f64 {
        (audio_duration / 60.0) * self.rate() * 60.0
    }

    /// Fold one completed job into the rate. Only jobs that actually ran the
    /// engine belong here; cache hits must not be observed.
    pub fn observe(&self, actual_seconds: f64, audio_duration: f64) {
        if audio_duration <= 0.0 || !actual_seconds.is_finite() || actual_seconds < 0.0 {
            return;
        }
        let sample = (actual_seconds / 60.0) / (audio_duration / 60.0);
        let updated = {
            let mut rate = match self.rate.lock() {
                Ok(r) => r,
                Err(poisoned) => poisoned.into_inner(),
            };
            *rate = HISTORY_WEIGHT * *rate + (1.0 - HISTORY_WEIGHT) * sample;
            *rate
        };
        log::debug!("processing rate sample {sample:.3}, now {updated:.3}");
        if let Err(e) = self.store.set(PROCESSING_RATE_KEY, json!(updated)) {
            log::warn!("failed to persist processing rate: {e}");
        }
    }

    pub fn progress(elapsed: f64, estimated_total: f64) -> f64 {
        if estimated_total <= 0.0 {
            return PROGRESS_CAP;
        }
        (elapsed / estimated_total).clamp(0.0, PROGRESS_CAP)
    }

    pub fn remaining(elapsed: f64, estimated_total: f64) -> f64 {
        (estimated_total - elapsed).max(0.0)
    }
}

/// Bookkeeping for one running analysis.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub started: Instant,
    pub estimated_total: f64,
    pub status: String,
    cancel: CancelToken,
}

impl ProcessingJob {
    pub fn new(estimated_total: f64) -> Self {
        Self {
            started: Instant::now(),
            estimated_total,
            status: "Starting separation".to_string(),
            cancel: CancelToken::default(),
        }
    }

    /// Token shared with the worker running this job.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn estimated_remaining(&self) -> f64 {
        TimeEstimator::remaining(self.elapsed(), self.estimated_total)
    }

    /// Time-based progress, capped below completion.
    pub fn progress(&self) -> f64 {
        TimeEstimator::progress(self.elapsed(), self.estimated_total)
    }
}
