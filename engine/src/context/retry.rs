//! Exponential backoff bookkeeping for tool-call retries.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;

pub struct ToolRetryManager {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    failure_counts: HashMap<String, u64>,
    total_retries: u64,
}

impl ToolRetryManager {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            failure_counts: HashMap::new(),
            total_retries: 0,
        }
    }

    /// Exponential backoff with 10% jitter, capped at `max_delay`.
    pub fn get_retry_delay(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.1 * rand::thread_rng().gen::<f64>();
        Duration::from_secs_f64(capped + jitter)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn record_failure(&mut self, tool_name: &str) -> u64 {
        let count = self.failure_counts.entry(tool_name.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_retry(&mut self) {
        self.total_retries += 1;
    }

    pub fn failure_counts(&self) -> &HashMap<String, u64> {
        &self.failure_counts
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_retry_respects_max() {
        let mgr = ToolRetryManager::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert!(mgr.should_retry(0));
        assert!(mgr.should_retry(2));
        assert!(!mgr.should_retry(3));
    }

    #[test]
    fn retry_delay_is_capped() {
        let mgr = ToolRetryManager::new(10, Duration::from_secs(1), Duration::from_secs(5));
        let delay = mgr.get_retry_delay(10);
        assert!(delay.as_secs_f64() <= 5.5);
    }

    #[test]
    fn record_failure_increments_per_tool() {
        let mut mgr = ToolRetryManager::new(3, Duration::from_millis(10), Duration::from_secs(1));
        assert_eq!(mgr.record_failure("read_file"), 1);
        assert_eq!(mgr.record_failure("read_file"), 2);
        assert_eq!(mgr.record_failure("write_file"), 1);
    }
}
