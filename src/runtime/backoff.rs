use std::sync::Mutex;
use std::thread;
use std::time::Duration;

const BACKOFF_BASE_SECS: u64 = 10;
const BACKOFF_STEP_SECS: u64 = 10;

/// Delay before the next claim attempt after a queue error or deadlock.
/// Grows linearly with the combined consecutive error counters.
pub fn backoff_delay(critical_failures: u32, deadlocks: u32) -> Duration {
    let errors = u64::from(critical_failures) + u64::from(deadlocks);
    Duration::from_secs(BACKOFF_BASE_SECS + BACKOFF_STEP_SECS * errors)
}

/// Every deliberate suspension in the agent goes through a pacer.
pub trait Pacer {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPacer;

impl Pacer for ThreadPacer {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingPacer {
    sleeps: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Pacer for RecordingPacer {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.sleeps.lock() {
            guard.push(duration);
        }
    }
}

impl<P: Pacer + ?Sized> Pacer for std::sync::Arc<P> {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_with_combined_errors() {
        assert_eq!(backoff_delay(0, 0), Duration::from_secs(10));
        assert_eq!(backoff_delay(2, 1), Duration::from_secs(40));
        assert_eq!(backoff_delay(0, 3), Duration::from_secs(40));
        assert_eq!(backoff_delay(10, 0), Duration::from_secs(110));
    }

    #[test]
    fn recording_pacer_keeps_order() {
        let pacer = RecordingPacer::default();
        pacer.sleep(Duration::from_secs(20));
        pacer.sleep(Duration::from_millis(5));
        assert_eq!(
            pacer.sleeps(),
            vec![Duration::from_secs(20), Duration::from_millis(5)]
        );
    }
}
