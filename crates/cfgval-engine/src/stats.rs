use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;

/// Validation-time counters shared by every session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub hits: u64,
    pub total_time: Duration,
    pub peak_time: Duration,
}

#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<ValidationStats>,
}

impl StatsRecorder {
    pub fn record(&self, elapsed: Duration) {
        let mut stats = self.lock();
        stats.hits += 1;
        stats.total_time += elapsed;
        if elapsed > stats.peak_time {
            stats.peak_time = elapsed;
        }
    }

    pub fn snapshot(&self) -> ValidationStats {
        *self.lock()
    }

    pub fn clear(&self) {
        *self.lock() = ValidationStats::default();
    }

    /// Start timing one call; the elapsed time is recorded when the timer drops.
    pub fn start(self: &Arc<Self>) -> StatsTimer {
        StatsTimer {
            recorder: Arc::clone(self),
            started: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ValidationStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Records exactly once, on every exit path of the timed call.
#[derive(Debug)]
pub struct StatsTimer {
    recorder: Arc<StatsRecorder>,
    started: Instant,
}

impl Drop for StatsTimer {
    fn drop(&mut self) {
        self.recorder.record(self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_records_on_drop() {
        let recorder = Arc::new(StatsRecorder::default());
        {
            let _timer = recorder.start();
        }
        let result: Result<(), ()> = (|| {
            let _timer = recorder.start();
            Err(())
        })();
        assert!(result.is_err());

        let stats = recorder.snapshot();
        assert_eq!(stats.hits, 2);
        assert!(stats.peak_time <= stats.total_time);

        recorder.clear();
        assert_eq!(recorder.snapshot(), ValidationStats::default());
    }
}
