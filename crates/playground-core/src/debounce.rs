//! Trailing-edge debouncing
//!
//! The debouncer holds the latest pushed value and a deadline that moves
//! forward on every push. It owns no task; callers race
//! [`sleep_until_deadline`] against their input inside a `select!` loop so the
//! pending value can still be flushed on shutdown.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct Debouncer<T> {
    window: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Debouncer<T> {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Replace the pending value and restart the quiet period
    pub fn push(&mut self, value: T) {
        self.pending = Some(value);
        self.deadline = Some(Instant::now() + self.window);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending value, if any, and clear the deadline
    pub fn take(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }
}

/// Sleep until `deadline`, or forever when nothing is pending
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_push_moves_deadline() {
        let mut debouncer = Debouncer::new(Duration::from_secs(2));
        assert!(debouncer.deadline().is_none());

        debouncer.push("a");
        let first = debouncer.deadline().unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        debouncer.push("ab");
        let second = debouncer.deadline().unwrap();
        assert_eq!(second - first, Duration::from_secs(1));

        sleep_until_deadline(debouncer.deadline()).await;
        assert_eq!(debouncer.take(), Some("ab"));
        assert!(!debouncer.is_pending());
        assert!(debouncer.deadline().is_none());
    }
}
