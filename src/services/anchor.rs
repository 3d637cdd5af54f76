//! Anchor establishment
//!
//! The anchor is the reference point every later distance is measured from.
//! It is frozen together with a fresh estimator at x = 0, v = 0 (an entity
//! is at distance zero from itself) and never replaced.

use crate::domain::error::TrackerError;
use crate::domain::types::GeoPoint;
use crate::services::kalman::{KalmanEstimator, KalmanParams};
use crate::services::record::TrackerRecord;
use tracing::info;

/// Sole writer of `TrackerRecord::anchor`
#[derive(Debug, Clone)]
pub struct AnchorManager {
    params: KalmanParams,
}

impl AnchorManager {
    pub fn new(params: KalmanParams) -> Result<Self, TrackerError> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Freeze the newest raw position as anchor if none exists yet.
    ///
    /// Returns false when the record is already anchored or has no position.
    pub fn set_anchor_if_needed(&self, record: &mut TrackerRecord) -> bool {
        if record.anchor.is_some() {
            return false;
        }
        let Some(position) = record.latest_position() else {
            return false;
        };
        self.freeze(record, position);
        true
    }

    /// Explicit one-shot assignment; a second call is a contract violation
    pub fn set_anchor(
        &self,
        record: &mut TrackerRecord,
        position: GeoPoint,
    ) -> Result<(), TrackerError> {
        if let Some(anchor) = record.anchor {
            return Err(TrackerError::AnchorAlreadySet { entity: record.entity_id.clone(), anchor });
        }
        self.freeze(record, position);
        Ok(())
    }

    fn freeze(&self, record: &mut TrackerRecord, position: GeoPoint) {
        record.anchor = Some(position);
        record.estimator = Some(KalmanEstimator::from_validated(self.params));
        record.last_reported_position = Some(position);
        record.ready = true;
        info!(entity = %record.entity_id, anchor = %position, "anchor_set");
    }

    pub fn params(&self) -> &KalmanParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::EntityId;
    use chrono::{TimeZone, Utc};

    fn record_with(position: Option<GeoPoint>) -> TrackerRecord {
        let mut record = TrackerRecord::new(EntityId::new("Cuong"), 1, 30);
        if let Some(p) = position {
            record.add_reading(p, Utc.with_ymd_and_hms(2026, 10, 16, 8, 0, 0).unwrap());
        }
        record
    }

    fn site() -> GeoPoint {
        GeoPoint { lat: 10.7769, lon: 106.7009 }
    }

    #[test]
    fn test_sets_anchor_once() {
        let manager = AnchorManager::new(KalmanParams::default()).unwrap();
        let mut record = record_with(Some(site()));

        assert!(manager.set_anchor_if_needed(&mut record));
        assert_eq!(record.anchor(), Some(site()));
        assert!(record.is_ready());
        let kf = record.estimator().unwrap();
        assert_eq!(kf.distance(), 0.0);
        assert_eq!(kf.velocity(), 0.0);

        // A later position never replaces the anchor
        record.add_reading(GeoPoint { lat: 10.78, lon: 106.71 }, Utc::now());
        assert!(!manager.set_anchor_if_needed(&mut record));
        assert_eq!(record.anchor(), Some(site()));
    }

    #[test]
    fn test_no_position_no_anchor() {
        let manager = AnchorManager::new(KalmanParams::default()).unwrap();
        let mut record = record_with(None);
        assert!(!manager.set_anchor_if_needed(&mut record));
        assert!(record.anchor().is_none());
        assert!(!record.is_ready());
    }

    #[test]
    fn test_double_assignment_fails_loudly() {
        let manager = AnchorManager::new(KalmanParams::default()).unwrap();
        let mut record = record_with(Some(site()));
        manager.set_anchor(&mut record, site()).unwrap();

        let err = manager.set_anchor(&mut record, GeoPoint { lat: 0.0, lon: 0.0 }).unwrap_err();
        assert_eq!(
            err,
            TrackerError::AnchorAlreadySet { entity: EntityId::new("Cuong"), anchor: site() }
        );
        assert_eq!(record.anchor(), Some(site()));
    }

    #[test]
    fn test_rejects_invalid_params() {
        let params = KalmanParams { measurement_noise: -5.0, ..KalmanParams::default() };
        assert!(AnchorManager::new(params).is_err());
    }
}
