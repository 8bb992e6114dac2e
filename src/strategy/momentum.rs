//! Momentum confirmation.
//!
//! An asset becomes eligible for entry only after its price has held or
//! risen over a full observation window. Each asset moves through
//! `NEW → CONFIRMING → READY` (record removed, one-shot) or
//! `CONFIRMING → REJECTED → NEW` (baseline reset to the current price).
//! Records that sit idle longer than the max idle bound are swept.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

use crate::config::Settings;

/// Outcome label for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MomentumReason {
    FirstSight,
    Confirming,
    MomentumWeak,
    FadingPump,
    Confirmed,
}

impl fmt::Display for MomentumReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MomentumReason::FirstSight => "first_sight",
            MomentumReason::Confirming => "confirming",
            MomentumReason::MomentumWeak => "momentum_weak",
            MomentumReason::FadingPump => "fading_pump",
            MomentumReason::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumVerdict {
    pub ready: bool,
    pub reason: MomentumReason,
    /// % change since baseline when the window completed.
    pub change_pct: Option<f64>,
}

impl MomentumVerdict {
    fn not_ready(reason: MomentumReason, change_pct: Option<f64>) -> Self {
        Self { ready: false, reason, change_pct }
    }
}

#[derive(Debug, Clone)]
struct Observation {
    baseline_price: f64,
    baseline_at: DateTime<Utc>,
    snapshots: Vec<(DateTime<Utc>, f64)>,
}

impl Observation {
    fn new(price: f64, now: DateTime<Utc>) -> Self {
        Self {
            baseline_price: price,
            baseline_at: now,
            snapshots: Vec::new(),
        }
    }
}

/// Per-account momentum tracker, keyed by asset id.
#[derive(Debug)]
pub struct MomentumTracker {
    window: Duration,
    min_change_pct: f64,
    max_idle: Duration,
    detect_fading: bool,
    records: HashMap<String, Observation>,
}

impl MomentumTracker {
    pub fn new(window: Duration, min_change_pct: f64, max_idle: Duration, detect_fading: bool) -> Self {
        Self {
            window,
            min_change_pct,
            max_idle,
            detect_fading,
            records: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            Duration::milliseconds((settings.momentum_window_secs * 1000.0) as i64),
            settings.momentum_min_change_pct,
            Duration::seconds(settings.momentum_max_idle_secs as i64),
            settings.detect_fading,
        )
    }

    /// Record a price sighting and report whether the asset is ready.
    pub fn observe(&mut self, asset_id: &str, price: f64, now: DateTime<Utc>) -> MomentumVerdict {
        let Some(record) = self.records.get_mut(asset_id) else {
            self.records.insert(asset_id.to_string(), Observation::new(price, now));
            return MomentumVerdict::not_ready(MomentumReason::FirstSight, None);
        };

        let elapsed = now - record.baseline_at;
        if elapsed < self.window {
            record.snapshots.push((now, price));
            return MomentumVerdict::not_ready(MomentumReason::Confirming, None);
        }

        let change_pct = if record.baseline_price > 0.0 {
            (price - record.baseline_price) / record.baseline_price * 100.0
        } else {
            0.0
        };

        if change_pct < self.min_change_pct {
            debug!(asset_id, change_pct, "Momentum too weak, resetting baseline");
            *record = Observation::new(price, now);
            return MomentumVerdict::not_ready(MomentumReason::MomentumWeak, Some(change_pct));
        }

        if self.detect_fading && is_fading(record, price, now, self.window) {
            debug!(asset_id, change_pct, "Pump fading, resetting baseline");
            *record = Observation::new(price, now);
            return MomentumVerdict::not_ready(MomentumReason::FadingPump, Some(change_pct));
        }

        self.records.remove(asset_id);
        MomentumVerdict {
            ready: true,
            reason: MomentumReason::Confirmed,
            change_pct: Some(change_pct),
        }
    }

    /// Drop records whose baseline is older than the idle bound.
    /// Returns the number removed.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        let max_idle = self.max_idle;
        self.records.retain(|_, r| now - r.baseline_at <= max_idle);
        before - self.records.len()
    }

    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    pub fn is_tracking(&self, asset_id: &str) -> bool {
        self.records.contains_key(asset_id)
    }
}

/// The first half of the window gained but the second half is giving it
/// back: the midpoint price is above baseline and the latest price is
/// below the midpoint.
fn is_fading(record: &Observation, price: f64, now: DateTime<Utc>, window: Duration) -> bool {
    let midpoint = record.baseline_at + window / 2;
    let Some(&(_, mid_price)) = record
        .snapshots
        .iter()
        .filter(|(t, _)| *t <= midpoint)
        .last()
    else {
        return false;
    };
    let second_half: Vec<f64> = record
        .snapshots
        .iter()
        .filter(|(t, _)| *t > midpoint)
        .map(|(_, p)| *p)
        .chain(std::iter::once(price))
        .collect();
    if second_half.len() < 2 || now <= midpoint {
        return false;
    }
    let first_half_gained = mid_price > record.baseline_price;
    let declining = second_half.windows(2).all(|w| w[1] <= w[0]) && price < mid_price;
    first_half_gained && declining
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window_secs: i64, min_change: f64) -> MomentumTracker {
        MomentumTracker::new(
            Duration::seconds(window_secs),
            min_change,
            Duration::seconds(900),
            true,
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_first_sight_never_ready() {
        let mut t = tracker(0, 0.0);
        let v = t.observe("a", 1.0, t0());
        assert!(!v.ready);
        assert_eq!(v.reason, MomentumReason::FirstSight);
        assert!(t.is_tracking("a"));
    }

    #[test]
    fn test_rising_price_ready_exactly_at_window() {
        let mut t = tracker(60, 0.0);
        let start = t0();
        t.observe("a", 1.00, start);
        for (i, secs) in [15, 30, 45, 59].iter().enumerate() {
            let v = t.observe("a", 1.0 + 0.01 * (i as f64 + 1.0), start + Duration::seconds(*secs));
            assert!(!v.ready, "ready too early at {secs}s");
            assert_eq!(v.reason, MomentumReason::Confirming);
        }
        let v = t.observe("a", 1.06, start + Duration::seconds(60));
        assert!(v.ready);
        assert_eq!(v.reason, MomentumReason::Confirmed);
        assert!((v.change_pct.unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_ready_is_one_shot() {
        let mut t = tracker(10, 0.0);
        t.observe("a", 1.0, t0());
        assert!(t.observe("a", 1.1, t0() + Duration::seconds(10)).ready);
        assert!(!t.is_tracking("a"));
        let again = t.observe("a", 1.2, t0() + Duration::seconds(11));
        assert_eq!(again.reason, MomentumReason::FirstSight);
    }

    #[test]
    fn test_weak_momentum_resets_baseline() {
        let mut t = tracker(10, 2.0);
        t.observe("a", 1.00, t0());
        let v = t.observe("a", 1.01, t0() + Duration::seconds(10));
        assert!(!v.ready);
        assert_eq!(v.reason, MomentumReason::MomentumWeak);

        // New baseline is 1.01 at t+10; a further 1% is still weak
        let v = t.observe("a", 1.02, t0() + Duration::seconds(20));
        assert_eq!(v.reason, MomentumReason::MomentumWeak);

        // 1.02 → 1.05 is ~2.9%
        let v = t.observe("a", 1.05, t0() + Duration::seconds(30));
        assert!(v.ready);
    }

    #[test]
    fn test_flat_allowed_with_zero_minimum() {
        let mut t = tracker(10, 0.0);
        t.observe("a", 1.0, t0());
        assert!(t.observe("a", 1.0, t0() + Duration::seconds(10)).ready);
    }

    #[test]
    fn test_falling_rejected_with_zero_minimum() {
        let mut t = tracker(10, 0.0);
        t.observe("a", 1.0, t0());
        let v = t.observe("a", 0.99, t0() + Duration::seconds(10));
        assert_eq!(v.reason, MomentumReason::MomentumWeak);
    }

    #[test]
    fn test_fading_pump_rejected() {
        let mut t = tracker(60, 0.0);
        let start = t0();
        t.observe("a", 1.00, start);
        t.observe("a", 1.20, start + Duration::seconds(15));
        t.observe("a", 1.30, start + Duration::seconds(30));
        t.observe("a", 1.20, start + Duration::seconds(45));
        let v = t.observe("a", 1.10, start + Duration::seconds(60));
        assert!(!v.ready);
        assert_eq!(v.reason, MomentumReason::FadingPump);
    }

    #[test]
    fn test_fading_detection_can_be_disabled() {
        let mut t = MomentumTracker::new(Duration::seconds(60), 0.0, Duration::seconds(900), false);
        let start = t0();
        t.observe("a", 1.00, start);
        t.observe("a", 1.30, start + Duration::seconds(30));
        t.observe("a", 1.20, start + Duration::seconds(45));
        assert!(t.observe("a", 1.10, start + Duration::seconds(60)).ready);
    }

    #[test]
    fn test_sweep_removes_idle_records() {
        let mut t = tracker(60, 0.0);
        t.observe("old", 1.0, t0());
        t.observe("new", 1.0, t0() + Duration::seconds(800));
        assert_eq!(t.sweep(t0() + Duration::seconds(1000)), 1);
        assert!(!t.is_tracking("old"));
        assert!(t.is_tracking("new"));
        assert_eq!(t.tracked(), 1);
    }

    #[test]
    fn test_long_window_survives_sweep_with_clamped_settings() {
        let settings = Settings::from_input(&crate::config::SettingsInput {
            momentum_window_secs: Some(1200.0),
            momentum_max_idle_secs: Some(600.0),
            entry_interval_secs: Some(30.0),
            ..Default::default()
        });
        let mut t = MomentumTracker::from_settings(&settings);
        let start = t0();

        // One entry tick every 30s: sweep, then observe a rising price
        let mut confirmed_at = None;
        for step in 0..=80i64 {
            let now = start + Duration::seconds(step * 30);
            t.sweep(now);
            if t.observe("a", 1.0 + 0.001 * step as f64, now).ready {
                confirmed_at = Some(step * 30);
                break;
            }
        }
        assert_eq!(confirmed_at, Some(1200));
    }

    #[test]
    fn test_assets_tracked_independently() {
        let mut t = tracker(10, 0.0);
        t.observe("a", 1.0, t0());
        t.observe("b", 5.0, t0() + Duration::seconds(5));
        assert!(t.observe("a", 1.1, t0() + Duration::seconds(10)).ready);
        assert_eq!(
            t.observe("b", 5.1, t0() + Duration::seconds(10)).reason,
            MomentumReason::Confirming
        );
    }
}
