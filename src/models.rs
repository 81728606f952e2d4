use chrono::{DateTime, Duration, Utc};
use serde::{Serialize, Serializer};

use crate::error::TrailError;

/// A single timestamped device position reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionFix {
    pub subject_id: String,
    pub serial_number: Option<String>,
    /// Tie-breaker for fixes sharing a timestamp.
    pub position_id: i64,
    pub recorded_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Fix-source tag reported by the tracker, e.g. `GPS` or `LBS`.
    pub source: String,
    pub satellites: Option<u32>,
    pub lbs_accuracy: Option<f64>,
}

impl PositionFix {
    /// `(0, 0)` is what the tracker reports when it has no fix.
    pub fn is_zero_fix(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }

    pub fn same_place(&self, other: &PositionFix) -> bool {
        self.latitude == other.latitude && self.longitude == other.longitude
    }

    pub fn same_reading(&self, other: &PositionFix) -> bool {
        self.source == other.source && self.same_place(other)
    }
}

/// Orders fixes by `(recorded_at, position_id)`.
pub fn sort_fixes(fixes: &mut [PositionFix]) {
    fixes.sort_by(|a, b| {
        a.recorded_at
            .cmp(&b.recorded_at)
            .then(a.position_id.cmp(&b.position_id))
    });
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    StrapTamper,
    BodyTamper,
    ExclusionZoneViolation,
    InclusionZoneViolation,
    TrackerInCharger,
    HomeCurfewViolation,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::StrapTamper,
        Category::BodyTamper,
        Category::ExclusionZoneViolation,
        Category::InclusionZoneViolation,
        Category::TrackerInCharger,
        Category::HomeCurfewViolation,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::StrapTamper => "Strap Tamper",
            Category::BodyTamper => "Body Tamper",
            Category::ExclusionZoneViolation => "Exclusion Zone Violation",
            Category::InclusionZoneViolation => "Inclusion Zone Violation",
            Category::TrackerInCharger => "Tracker in Charger",
            Category::HomeCurfewViolation => "Home Curfew Violation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAction {
    pub at: DateTime<Utc>,
    pub sequence_no: Option<i64>,
    pub user_id: Option<String>,
    pub status: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventWarning {
    pub number: Option<i64>,
    pub at: DateTime<Utc>,
    pub printed: Option<bool>,
    pub sent: Option<bool>,
    pub response_time_met: Option<bool>,
    pub user: Option<String>,
    pub user_id: Option<String>,
}

/// A device event row with its optional joined action and warning records.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEvent {
    pub subject_id: String,
    pub event_id: i64,
    pub serial_number: Option<String>,
    pub code: String,
    pub description: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub action: Option<EventAction>,
    pub warning: Option<EventWarning>,
}

/// One start or stop observation for a category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusMarker {
    pub at: DateTime<Utc>,
    pub is_start: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<EventAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<EventWarning>,
}

impl StatusMarker {
    pub fn new(at: DateTime<Utc>, is_start: bool) -> Self {
        Self {
            at,
            is_start,
            action: None,
            warning: None,
        }
    }
}

/// A bounded or open-ended interval during which a condition was asserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Episode {
    pub category: Category,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub action: Option<EventAction>,
    pub warning: Option<EventWarning>,
}

impl Episode {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// A retained fix with the kinematics derived from its retained neighbours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedPoint {
    pub fix: PositionFix,
    /// Metres from the previous retained point.
    pub distance_from_previous: f64,
    /// Metres to the next retained point.
    pub distance_to_next: f64,
    /// Initial bearing in degrees `[0, 360)`; `None` at the last point.
    pub bearing_to_next: Option<f64>,
    /// Miles per hour.
    pub speed_from_previous: f64,
    #[serde(serialize_with = "as_seconds")]
    pub elapsed_since_previous: Duration,
    #[serde(serialize_with = "as_seconds")]
    pub elapsed_since_first: Duration,
    pub cumulative_distance_since_first: f64,
}

fn as_seconds<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_i64(value.num_seconds())
}

/// Half-open `[start, end)` interval a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TrailError> {
        if start > end {
            return Err(TrailError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Address {
    pub line1: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postcode: Option<String>,
    pub home_phone: Option<String>,
    pub work_phone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Programme {
    pub kind: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubjectDetails {
    pub subject_id: String,
    pub first_name: Option<String>,
    pub middle_name: Option<String>,
    pub last_name: Option<String>,
    pub gender: Option<String>,
    pub address: Address,
    pub programme: Programme,
}

impl SubjectDetails {
    pub fn full_name(&self) -> String {
        [&self.first_name, &self.middle_name, &self.last_name]
            .iter()
            .filter_map(|part| part.as_deref())
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneVersion {
    pub zone_id: i64,
    pub name: String,
    pub rule: Option<String>,
    pub kind: Option<String>,
    pub grace_time: Option<i64>,
    pub blp: Option<String>,
    pub version_no: i64,
    pub version_start: DateTime<Utc>,
    pub version_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeFrame {
    pub zone_id: i64,
    pub version_start: DateTime<Utc>,
    pub version_end: Option<DateTime<Utc>>,
    pub frame_start: Option<String>,
    pub frame_end: Option<String>,
}

/// Everything read for one subject in a single pass over the store.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubjectExtract {
    pub subject_id: String,
    pub serial_number: Option<String>,
    pub details: Option<SubjectDetails>,
    pub fixes: Vec<PositionFix>,
    pub events: Vec<RawEvent>,
    pub zones: Vec<ZoneVersion>,
    pub time_frames: Vec<TimeFrame>,
}

impl SubjectExtract {
    /// Rejects a batch carrying rows for more than one subject.
    pub fn validate(&self) -> Result<(), TrailError> {
        for fix in &self.fixes {
            ensure_subject("points", &self.subject_id, &fix.subject_id)?;
        }
        for event in &self.events {
            ensure_subject("events", &self.subject_id, &event.subject_id)?;
        }
        Ok(())
    }
}

pub fn ensure_subject(table: &'static str, expected: &str, found: &str) -> Result<(), TrailError> {
    if expected != found {
        return Err(TrailError::MixedSubjects {
            table,
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}
