//! Shared types for the geofence monitor

use crate::domain::error::TrackerError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Newtype wrapper for tracked entity identifiers (device owner names)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

/// Latitude/longitude pair in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    /// Build a point, rejecting non-finite or out-of-range coordinates
    pub fn new(lat: f64, lon: f64) -> Result<Self, TrackerError> {
        if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
            return Err(TrackerError::malformed(format!("latitude {lat} out of range")));
        }
        if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
            return Err(TrackerError::malformed(format!("longitude {lon} out of range")));
        }
        Ok(Self { lat, lon })
    }
}

impl std::fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6},{:.6}", self.lat, self.lon)
    }
}

/// Sample timestamp as delivered by the location provider
///
/// Providers send RFC 3339 strings, naive ISO strings (implicitly UTC)
/// or epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    /// Resolve to a UTC instant; naive strings are taken as UTC
    pub fn to_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::None => None,
            TimestampValue::EpochMs(ms) => {
                i64::try_from(*ms).ok().and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            }
            TimestampValue::IsoString(s) => parse_timestamp_str(s),
        }
    }
}

impl From<DateTime<Utc>> for TimestampValue {
    fn from(ts: DateTime<Utc>) -> Self {
        TimestampValue::IsoString(ts.to_rfc3339())
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            // Negative epochs are treated as missing
            Ok(u64::try_from(value).map(TimestampValue::EpochMs).unwrap_or_default())
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Observation as received from the location provider, before validation
///
/// Entities without a current fix arrive with null coordinates.
#[derive(Debug, Clone, Deserialize)]
pub struct RawObservation {
    pub entity_id: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: TimestampValue,
}

impl RawObservation {
    pub fn new(
        entity_id: impl Into<String>,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            latitude: Some(latitude),
            longitude: Some(longitude),
            timestamp: timestamp.into(),
        }
    }

    /// Validate coordinates and timestamp into a usable observation
    pub fn validate(&self) -> Result<PositionObservation, TrackerError> {
        if self.entity_id.trim().is_empty() {
            return Err(TrackerError::malformed("empty entity id"));
        }
        let (Some(lat), Some(lon)) = (self.latitude, self.longitude) else {
            return Err(TrackerError::malformed("missing coordinates"));
        };
        let position = GeoPoint::new(lat, lon)?;
        let sampled_at = self
            .timestamp
            .to_utc()
            .ok_or_else(|| TrackerError::malformed("missing or unparseable timestamp"))?;

        Ok(PositionObservation { entity_id: EntityId::new(self.entity_id.clone()), position, sampled_at })
    }
}

/// Validated position observation for one entity in one cycle
#[derive(Debug, Clone, PartialEq)]
pub struct PositionObservation {
    pub entity_id: EntityId,
    pub position: GeoPoint,
    pub sampled_at: DateTime<Utc>,
}

impl PositionObservation {
    /// Sample age in minutes relative to `now` (negative ages clamp to zero)
    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        age_minutes(self.sampled_at, now)
    }
}

/// Minutes elapsed between a sample and `now`, clamped at zero for clock skew
pub fn age_minutes(sampled_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let elapsed_ms = (now - sampled_at).num_milliseconds().max(0);
    elapsed_ms as f64 / 60_000.0
}

/// Per-entity safety classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    /// Seen but no usable fix yet
    Initializing,
    /// Anchor frozen, no filter measurement yet. Lasts one observed cycle:
    /// the next fresh sample yields a filtered state. An entity that goes
    /// silent right after anchoring keeps reporting `Anchored` (distance 0)
    /// until its last sample ages past the stale threshold.
    Anchored,
    Safe,
    /// Inside the radius but the one-tick forecast is outside
    ForecastBreach,
    Breach,
    /// Newest sample older than the stale threshold; overrides everything
    Stale,
}

impl SafetyState {
    pub const ALL: [SafetyState; 6] = [
        SafetyState::Initializing,
        SafetyState::Anchored,
        SafetyState::Safe,
        SafetyState::ForecastBreach,
        SafetyState::Breach,
        SafetyState::Stale,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyState::Initializing => "initializing",
            SafetyState::Anchored => "anchored",
            SafetyState::Safe => "safe",
            SafetyState::ForecastBreach => "forecast_breach",
            SafetyState::Breach => "breach",
            SafetyState::Stale => "stale",
        }
    }

    /// States that downstream alerting reacts to
    pub fn is_alert(&self) -> bool {
        matches!(self, SafetyState::ForecastBreach | SafetyState::Breach | SafetyState::Stale)
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for SafetyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Movement hint reported alongside a `Safe` classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Stationary,
    Moving,
}

/// Per-entity result of one processing cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub entity_id: EntityId,
    pub safety_state: SafetyState,
    pub filtered_distance_m: f64,
    pub forecast_distance_m: f64,
    pub trend_history: Vec<f64>,
    pub anchor: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<Activity>,
    /// Whether the entity had an observation in this cycle
    pub observed: bool,
}
