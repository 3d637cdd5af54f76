//! Tests for the tracking engine

use super::*;
use crate::domain::types::{Activity, GeoPoint};
use chrono::{Duration, TimeZone};

const WORKER: &str = "worker-1";

fn site() -> GeoPoint {
    GeoPoint { lat: 10.7769, lon: 106.7009 }
}

/// Point roughly `meters` due north of the site
fn north(meters: f64) -> GeoPoint {
    GeoPoint { lat: site().lat + meters / 110_614.0, lon: site().lon }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap()
}

fn secs(s: i64) -> Duration {
    Duration::seconds(s)
}

fn obs(entity: &str, at: GeoPoint, sampled_at: DateTime<Utc>) -> RawObservation {
    RawObservation::new(entity, at.lat, at.lon, sampled_at)
}

fn create_test_engine() -> TrackingEngine {
    TrackingEngine::new(TrackerSettings::default()).unwrap()
}

/// Drives one entity through consecutive 30 s cycles, each sample fresh
struct Walk {
    engine: TrackingEngine,
    now: DateTime<Utc>,
}

impl Walk {
    fn new() -> Self {
        Self { engine: create_test_engine(), now: t0() }
    }

    /// Report `meters` north of the site and return this entity's snapshot
    fn step(&mut self, meters: f64) -> TrackerSnapshot {
        let report = self.engine.process_cycle(&[obs(WORKER, north(meters), self.now)], self.now);
        self.now += secs(30);
        report.unwrap().snapshot(WORKER).cloned().unwrap()
    }
}

#[test]
fn test_first_observation_anchors() {
    let mut walk = Walk::new();
    let snap = walk.step(0.0);

    assert_eq!(snap.safety_state, SafetyState::Anchored);
    assert_eq!(snap.anchor, Some(north(0.0)));
    assert_eq!(snap.filtered_distance_m, 0.0);
    assert_eq!(snap.forecast_distance_m, 0.0);
    assert!(snap.trend_history.is_empty());
    assert!(snap.observed);
}

#[test]
fn test_scenario_stationary_worker_stays_safe() {
    let mut walk = Walk::new();
    walk.step(0.0);

    for _ in 0..3 {
        let snap = walk.step(0.0);
        assert_eq!(snap.safety_state, SafetyState::Safe);
        assert!(snap.filtered_distance_m < 3.0);
        assert_eq!(snap.activity, Some(Activity::Stationary));
    }
    assert_eq!(walk.step(0.0).trend_history.len(), 4);
}

#[test]
fn test_jitter_below_snap_threshold_is_ignored() {
    let mut walk = Walk::new();
    walk.step(0.0);
    for meters in [3.0, 4.5, 2.0, 4.0] {
        let snap = walk.step(meters);
        assert_eq!(snap.safety_state, SafetyState::Safe);
        assert_eq!(snap.filtered_distance_m, 0.0);
        assert_eq!(snap.forecast_distance_m, 0.0);
    }
}

#[test]
fn test_scenario_sudden_departure_breaches() {
    let mut walk = Walk::new();
    walk.step(0.0);
    for _ in 0..3 {
        assert_eq!(walk.step(0.0).safety_state, SafetyState::Safe);
    }

    let first = walk.step(150.0);
    assert!(first.filtered_distance_m > 50.0);
    assert!(first.forecast_distance_m > first.filtered_distance_m);

    let mut states = vec![first.safety_state];
    for _ in 0..3 {
        states.push(walk.step(150.0).safety_state);
    }
    assert!(states[..3].contains(&SafetyState::Breach), "states: {:?}", states);
    assert_eq!(states.last(), Some(&SafetyState::Breach));
}

#[test]
fn test_scenario_rising_trend_forecasts_breach_first() {
    let mut walk = Walk::new();
    walk.step(0.0);

    assert_eq!(walk.step(0.0).safety_state, SafetyState::Safe);
    assert_eq!(walk.step(0.0).safety_state, SafetyState::Safe);

    let at_40 = walk.step(40.0);
    assert_eq!(at_40.safety_state, SafetyState::Safe);
    assert!((at_40.filtered_distance_m - 29.9).abs() < 1.0);

    let at_80 = walk.step(80.0);
    assert_eq!(at_80.safety_state, SafetyState::ForecastBreach);
    assert!(at_80.filtered_distance_m < 100.0);
    assert!(at_80.forecast_distance_m > 100.0);

    let at_120 = walk.step(120.0);
    assert_eq!(at_120.safety_state, SafetyState::Breach);
}

#[test]
fn test_scenario_silent_entity_goes_stale() {
    let mut engine = create_test_engine();
    engine.process_cycle(&[obs(WORKER, site(), t0())], t0()).unwrap();

    let report = engine.process_cycle(&[], t0() + secs(4 * 60)).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Anchored);
    assert!(!snap.observed);

    let report = engine.process_cycle(&[], t0() + secs(6 * 60)).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Stale);
    assert_eq!(snap.filtered_distance_m, 0.0);
    assert!((snap.age_minutes.unwrap() - 6.0).abs() < 1e-9);
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, SafetyState::Stale);

    // Stays resident and stale
    let report = engine.process_cycle(&[], t0() + secs(60 * 60)).unwrap();
    assert_eq!(report.snapshot(WORKER).unwrap().safety_state, SafetyState::Stale);
    assert!(report.transitions.is_empty());
    assert_eq!(engine.registry().len(), 1);
}

#[test]
fn test_stale_overrides_breach() {
    let mut walk = Walk::new();
    walk.step(0.0);
    walk.step(0.0);
    for _ in 0..3 {
        walk.step(300.0);
    }
    let report = walk.engine.process_cycle(&[], walk.now).unwrap();
    assert_eq!(report.snapshot(WORKER).unwrap().safety_state, SafetyState::Breach);

    let later = walk.now + secs(10 * 60);
    let report = walk.engine.process_cycle(&[], later).unwrap();
    assert_eq!(report.snapshot(WORKER).unwrap().safety_state, SafetyState::Stale);
}

#[test]
fn test_stale_sample_does_not_feed_filter() {
    let mut walk = Walk::new();
    walk.step(0.0);
    walk.step(0.0);
    let before = walk.engine.registry().get(&EntityId::new(WORKER)).unwrap();
    let (x_before, trend_before) = {
        let record = before.lock();
        (record.estimator().unwrap().distance(), record.trend().len())
    };

    // Far away but sampled 20 minutes ago
    let old = walk.now - secs(20 * 60);
    let report = walk.engine.process_cycle(&[obs(WORKER, north(500.0), old)], walk.now).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Stale);
    assert_eq!(snap.position, Some(north(500.0)));

    let record = before.lock();
    assert_eq!(record.estimator().unwrap().distance(), x_before);
    assert_eq!(record.trend().len(), trend_before);
}

#[test]
fn test_stale_first_sample_does_not_anchor() {
    let mut engine = create_test_engine();
    let now = t0() + secs(30 * 60);
    let report = engine.process_cycle(&[obs(WORKER, site(), t0())], now).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Stale);
    assert!(snap.anchor.is_none());

    // A fresh sample later anchors normally
    let report = engine.process_cycle(&[obs(WORKER, north(50.0), now)], now).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Anchored);
    assert_eq!(snap.anchor, Some(north(50.0)));
}

#[test]
fn test_anchor_never_changes() {
    let mut walk = Walk::new();
    walk.step(0.0);
    for meters in [10.0, 250.0, 40.0, 1000.0, 0.0] {
        assert_eq!(walk.step(meters).anchor, Some(site()));
    }

    let handle = walk.engine.registry().get(&EntityId::new(WORKER)).unwrap();
    let mut record = handle.lock();
    let err = walk.engine.anchors.set_anchor(&mut record, north(10.0)).unwrap_err();
    assert!(matches!(err, TrackerError::AnchorAlreadySet { .. }));
    assert_eq!(record.anchor(), Some(site()));
}

#[test]
fn test_activity_hint() {
    let mut walk = Walk::new();
    walk.step(0.0);
    assert_eq!(walk.step(0.0).activity, Some(Activity::Stationary));

    let moved = walk.step(20.0);
    assert_eq!(moved.safety_state, SafetyState::Safe);
    assert_eq!(moved.activity, Some(Activity::Moving));

    let still = walk.step(20.0);
    assert_eq!(still.activity, Some(Activity::Stationary));
}

#[test]
fn test_no_activity_outside_safe() {
    let mut walk = Walk::new();
    walk.step(0.0);
    assert_eq!(walk.step(0.0).activity, Some(Activity::Stationary));
    let far = walk.step(400.0);
    assert_eq!(far.safety_state, SafetyState::Breach);
    assert_eq!(far.activity, None);
}

#[test]
fn test_malformed_observation_rejected() {
    let mut engine = create_test_engine();
    let mut missing = obs("no-fix", site(), t0());
    missing.latitude = None;
    let out_of_range = RawObservation::new("bad-lat", 95.0, 106.0, t0());

    let report = engine
        .process_cycle(&[missing, out_of_range, obs(WORKER, site(), t0())], t0())
        .unwrap();

    assert_eq!(report.rejected, 2);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.snapshots.len(), 1);
    assert!(engine.registry().get(&EntityId::new("no-fix")).is_none());
    assert!(engine.registry().get(&EntityId::new("bad-lat")).is_none());
}

#[test]
fn test_malformed_observation_leaves_record_unchanged() {
    let mut walk = Walk::new();
    walk.step(0.0);
    walk.step(0.0);

    let mut broken = obs(WORKER, north(500.0), walk.now);
    broken.longitude = None;
    let report = walk.engine.process_cycle(&[broken], walk.now).unwrap();
    let snap = report.snapshot(WORKER).unwrap();

    assert_eq!(report.rejected, 1);
    assert!(!snap.observed);
    assert_eq!(snap.safety_state, SafetyState::Safe);
    assert_eq!(snap.position, Some(site()));
    assert_eq!(snap.trend_history.len(), 1);
}

#[test]
fn test_ignored_entities_are_skipped() {
    let settings = TrackerSettings {
        ignored_entities: vec!["owner".to_string()],
        ..TrackerSettings::default()
    };
    let mut engine = TrackingEngine::new(settings).unwrap();
    let report = engine
        .process_cycle(&[obs("owner", site(), t0()), obs(WORKER, site(), t0())], t0())
        .unwrap();

    assert_eq!(report.ignored, 1);
    assert_eq!(report.accepted, 1);
    assert!(report.snapshot("owner").is_none());
    assert_eq!(engine.registry().len(), 1);
}

#[test]
fn test_empty_batch() {
    let mut engine = create_test_engine();
    let report = engine.process_cycle(&[], t0()).unwrap();
    assert!(report.snapshots.is_empty());
    assert!(report.transitions.is_empty());
    assert_eq!(report.cycle, 1);
    assert_eq!(engine.cycles(), 1);
}

#[test]
fn test_partial_batch_reports_every_resident_entity() {
    let mut engine = create_test_engine();
    engine
        .process_cycle(&[obs("An", site(), t0()), obs("Binh", site(), t0())], t0())
        .unwrap();

    let now = t0() + secs(30);
    let report = engine.process_cycle(&[obs("Binh", site(), now)], now).unwrap();

    let ids: Vec<&str> = report.snapshots.iter().map(|s| s.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["An", "Binh"]);
    assert!(!report.snapshot("An").unwrap().observed);
    assert_eq!(report.snapshot("An").unwrap().safety_state, SafetyState::Anchored);
    assert_eq!(report.snapshot("Binh").unwrap().safety_state, SafetyState::Safe);
}

#[test]
fn test_anchored_lasts_until_next_observation() {
    let mut engine = create_test_engine();
    engine.process_cycle(&[obs(WORKER, site(), t0())], t0()).unwrap();

    // Silent cycles report the unmeasured anchor, nothing else
    for k in 1..=2 {
        let report = engine.process_cycle(&[], t0() + secs(30 * k)).unwrap();
        let snap = report.snapshot(WORKER).unwrap();
        assert_eq!(snap.safety_state, SafetyState::Anchored);
        assert!(!snap.observed);
        assert_eq!(snap.filtered_distance_m, 0.0);
        assert!(snap.trend_history.is_empty());
        assert!(report.transitions.is_empty());
    }

    let now = t0() + secs(90);
    let report = engine.process_cycle(&[obs(WORKER, site(), now)], now).unwrap();
    let snap = report.snapshot(WORKER).unwrap();
    assert_eq!(snap.safety_state, SafetyState::Safe);
    assert_eq!(snap.trend_history.len(), 1);
    assert_eq!(report.transitions[0].from, SafetyState::Anchored);
}

#[test]
fn test_duplicate_observations_keep_newest() {
    let mut engine = create_test_engine();
    let batch = [
        obs(WORKER, north(300.0), t0() + secs(20)),
        obs(WORKER, site(), t0()),
        obs(WORKER, north(50.0), t0() + secs(10)),
    ];
    let report = engine.process_cycle(&batch, t0() + secs(20)).unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.snapshot(WORKER).unwrap().anchor, Some(north(300.0)));
}

#[test]
fn test_transitions_are_reported_once() {
    let mut walk = Walk::new();
    let mut transitions = Vec::new();
    for meters in [0.0, 0.0, 0.0, 400.0, 400.0] {
        let report = walk.engine.process_cycle(&[obs(WORKER, north(meters), walk.now)], walk.now);
        walk.now += secs(30);
        transitions.extend(report.unwrap().transitions);
    }

    let path: Vec<(SafetyState, SafetyState)> = transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        path,
        vec![
            (SafetyState::Initializing, SafetyState::Anchored),
            (SafetyState::Anchored, SafetyState::Safe),
            (SafetyState::Safe, SafetyState::Breach),
        ]
    );
    assert!(transitions[2].filtered_distance_m > 100.0);
}

#[test]
fn test_trend_history_is_bounded() {
    let settings = TrackerSettings { trend_capacity: 3, ..TrackerSettings::default() };
    let mut engine = TrackingEngine::new(settings).unwrap();
    let mut now = t0();
    let mut last = None;
    for _ in 0..10 {
        let report = engine.process_cycle(&[obs(WORKER, north(60.0), now)], now).unwrap();
        last = report.snapshot(WORKER).cloned();
        now += secs(30);
    }
    assert_eq!(last.unwrap().trend_history.len(), 3);
}

#[test]
fn test_distances_never_negative() {
    let mut walk = Walk::new();
    walk.step(0.0);
    for meters in [80.0, 80.0, 0.0, 0.0, 0.0, 0.0, 60.0, 0.0, 0.0] {
        let snap = walk.step(meters);
        assert!(snap.filtered_distance_m >= 0.0);
        assert!(snap.forecast_distance_m >= 0.0);
        assert!(snap.trend_history.iter().all(|d| *d >= 0.0));
    }
}

#[test]
fn test_metrics_recorded() {
    let metrics = Arc::new(Metrics::new());
    let mut engine =
        TrackingEngine::with_metrics(TrackerSettings::default(), metrics.clone()).unwrap();

    let mut broken = obs("no-fix", site(), t0());
    broken.latitude = None;
    engine.process_cycle(&[obs(WORKER, site(), t0()), broken], t0()).unwrap();
    let now = t0() + secs(30);
    engine.process_cycle(&[obs(WORKER, north(500.0), now)], now).unwrap();

    assert_eq!(metrics.cycles_total(), 2);
    assert_eq!(metrics.observations_accepted(), 2);
    assert_eq!(metrics.observations_rejected(), 1);
    assert_eq!(metrics.anchors_set(), 1);
    assert_eq!(metrics.breaches_total(), 1);
    assert_eq!(metrics.entities_in(SafetyState::Breach), 1);
}

#[test]
fn test_reset_drops_records() {
    let mut engine = create_test_engine();
    engine.process_cycle(&[obs(WORKER, site(), t0())], t0()).unwrap();
    engine.reset();
    assert!(engine.registry().is_empty());
    assert_eq!(engine.cycles(), 0);

    // Re-anchors from scratch
    let report = engine.process_cycle(&[obs(WORKER, north(70.0), t0())], t0()).unwrap();
    assert_eq!(report.snapshot(WORKER).unwrap().anchor, Some(north(70.0)));
}

#[test]
fn test_invalid_settings_rejected() {
    let mut settings = TrackerSettings::default();
    settings.filter.measurement_noise = 0.0;
    assert!(matches!(
        TrackingEngine::new(settings),
        Err(TrackerError::InvalidMeasurementNoise(_))
    ));
}
