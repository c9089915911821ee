//! Per-peer contribution metrics feeding the role score.

/// Contribution gained per successful relay act.
const CONTRIBUTION_INCREMENT: f64 = 1.0;

/// Contribution lost per relay failure.
const CONTRIBUTION_PENALTY: f64 = 2.0;

/// Upper clamp for the contribution score.
pub const CONTRIBUTION_CAP: f64 = 100.0;

/// Observed metrics for a single peer.
///
/// A peer with no recorded activity scores zero on every axis.
#[derive(Debug, Clone)]
pub struct NodeMetrics {
    /// Cumulative observed uptime in seconds.
    pub uptime_secs: u64,
    /// Relayed-traffic score (KiB forwarded for others).
    pub bandwidth_score: f64,
    /// Contribution score, clamped to [0, 100].
    pub contribution_score: f64,
    /// Peer count from the last topology snapshot.
    pub peer_count: usize,
    /// Unix ms of the last recorded activity.
    pub last_activity: u64,
}

impl NodeMetrics {
    pub fn new(now: u64) -> Self {
        Self {
            uptime_secs: 0,
            bandwidth_score: 0.0,
            contribution_score: 0.0,
            peer_count: 0,
            last_activity: now,
        }
    }

    /// Record a successful relay act: contribution up (capped), uptime
    /// accrued since the previous activity.
    pub fn record_relay(&mut self, now: u64) {
        self.contribution_score = (self.contribution_score + CONTRIBUTION_INCREMENT).min(CONTRIBUTION_CAP);
        self.accrue_uptime(now);
    }

    /// Record a relay failure: contribution down (floored at zero).
    pub fn record_relay_failure(&mut self, now: u64) {
        self.contribution_score = (self.contribution_score - CONTRIBUTION_PENALTY).max(0.0);
        self.accrue_uptime(now);
    }

    /// Count bytes this peer relayed on our behalf.
    pub fn record_bytes_relayed(&mut self, bytes: u64, now: u64) {
        self.bandwidth_score += bytes as f64 / 1024.0;
        self.accrue_uptime(now);
    }

    /// Fold in a periodic topology snapshot.
    pub fn observe_snapshot(&mut self, peer_count: usize, now: u64) {
        self.peer_count = peer_count;
        self.accrue_uptime(now);
    }

    fn accrue_uptime(&mut self, now: u64) {
        let elapsed_ms = now.saturating_sub(self.last_activity);
        self.uptime_secs += elapsed_ms / 1000;
        self.last_activity = self.last_activity.max(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_are_zero() {
        let m = NodeMetrics::new(1000);
        assert_eq!(m.uptime_secs, 0);
        assert_eq!(m.bandwidth_score, 0.0);
        assert_eq!(m.contribution_score, 0.0);
    }

    #[test]
    fn contribution_caps_at_100() {
        let mut m = NodeMetrics::new(0);
        for i in 0..250 {
            m.record_relay(i * 1000);
        }
        assert_eq!(m.contribution_score, CONTRIBUTION_CAP);
    }

    #[test]
    fn failures_floor_at_zero() {
        let mut m = NodeMetrics::new(0);
        m.record_relay(1000);
        m.record_relay_failure(2000);
        m.record_relay_failure(3000);
        assert_eq!(m.contribution_score, 0.0);
    }

    #[test]
    fn uptime_accrues_between_activities() {
        let mut m = NodeMetrics::new(0);
        m.record_relay(10_000);
        m.record_relay(25_000);
        assert_eq!(m.uptime_secs, 25);
    }

    #[test]
    fn bandwidth_counts_kib() {
        let mut m = NodeMetrics::new(0);
        m.record_bytes_relayed(2048, 1000);
        assert_eq!(m.bandwidth_score, 2.0);
    }
}
