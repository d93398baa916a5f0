//! Retransmission timer.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  [`RetransmitTimer`] tracks a single
//! deadline for the oldest unacknowledged segment.  The timeout is a fixed
//! constant taken from [`crate::config::Config::ack_timeout`]; there is no RTT
//! estimation and no back-off.

use std::time::Duration;

use tokio::time::Instant;

/// A one-shot deadline that can be armed, re-armed and disarmed.
#[derive(Debug, Clone)]
pub struct RetransmitTimer {
    rto: Duration,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    /// Create a disarmed timer with the given fixed timeout.
    pub fn new(rto: Duration) -> Self {
        Self { rto, deadline: None }
    }

    /// Start (or restart) the countdown from now.
    pub fn arm(&mut self) {
        self.deadline = Some(Instant::now() + self.rto);
    }

    /// Arm only if not already running.
    pub fn arm_if_idle(&mut self) {
        if self.deadline.is_none() {
            self.arm();
        }
    }

    /// Stop the countdown.
    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    /// Time left before expiry; a disarmed timer reports a full `rto`.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(d) => d.saturating_duration_since(Instant::now()),
            None => self.rto,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_timer_reports_full_rto() {
        let t = RetransmitTimer::new(Duration::from_millis(100));
        assert_eq!(t.remaining(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_rto() {
        let mut t = RetransmitTimer::new(Duration::from_millis(100));
        t.arm();
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(t.remaining() <= Duration::from_millis(40));
        assert!(!t.remaining().is_zero());
        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(t.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn arm_if_idle_keeps_running_deadline() {
        let mut t = RetransmitTimer::new(Duration::from_millis(100));
        t.arm();
        tokio::time::advance(Duration::from_millis(70)).await;
        t.arm_if_idle();
        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(t.remaining(), Duration::ZERO);
        t.disarm();
        assert_eq!(t.remaining(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_countdown() {
        let mut t = RetransmitTimer::new(Duration::from_millis(100));
        t.arm();
        tokio::time::advance(Duration::from_millis(70)).await;
        t.arm();
        assert_eq!(t.remaining(), Duration::from_millis(100));
    }
}
