//! Request deadline bookkeeping
//!
//! One absolute deadline per request; every stage runs under
//! `min(configured stage timeout, remaining request budget)`.

use std::time::{Duration, Instant};

/// Absolute deadline for one request.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    started: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn new(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Remaining request budget; zero once exceeded.
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.started.elapsed())
    }

    pub fn exceeded(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Effective timeout for a stage.
    pub fn stage_timeout(&self, configured: Duration) -> Duration {
        configured.min(self.remaining())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_timeout_clamped_to_remaining() {
        let deadline = Deadline::new(Duration::from_millis(100));
        let stage = deadline.stage_timeout(Duration::from_secs(10));
        assert!(stage <= Duration::from_millis(100));
    }

    #[test]
    fn test_fresh_deadline_not_exceeded() {
        let deadline = Deadline::new(Duration::from_secs(45));
        assert!(!deadline.exceeded());
        assert!(deadline.remaining() > Duration::from_secs(44));
    }

    #[tokio::test]
    async fn test_exceeded_after_budget() {
        let deadline = Deadline::new(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert!(deadline.exceeded());
        assert_eq!(deadline.stage_timeout(Duration::from_secs(1)), Duration::ZERO);
    }
}
