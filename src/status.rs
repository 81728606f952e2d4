use chrono::{DateTime, Utc};

use crate::events::StatusLog;
use crate::models::{Category, StatusMarker};

/// True only when a start marker carries exactly the timestamp `at`.
///
/// This is a point lookup, not an interval query: a time strictly between a
/// start and its stop samples as inactive.
pub fn is_active_at(at: DateTime<Utc>, markers: &[StatusMarker]) -> bool {
    markers
        .iter()
        .any(|marker| marker.is_start && marker.at == at)
}

/// Samples every category at `at`, in `Category::ALL` order.
pub fn sample_all(at: DateTime<Utc>, log: &StatusLog) -> [(Category, bool); 6] {
    Category::ALL.map(|category| (category, is_active_at(at, log.markers(category))))
}
