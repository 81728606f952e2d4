//! Turns the flat device event stream into per-category status markers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::TrailError;
use crate::models::{ensure_subject, Category, Episode, RawEvent, ReportWindow, StatusMarker};

/// Maps a device event code to its category and whether it starts the condition.
pub fn classify(code: &str) -> Option<(Category, bool)> {
    let classified = match code.trim() {
        "P59" => (Category::StrapTamper, true),
        "P60" => (Category::StrapTamper, false),
        // body tamper only ever reports a start
        "P50" => (Category::BodyTamper, true),
        "P67" => (Category::InclusionZoneViolation, true),
        "P68" => (Category::InclusionZoneViolation, false),
        "P69" => (Category::ExclusionZoneViolation, true),
        "P70" => (Category::ExclusionZoneViolation, false),
        "P61" => (Category::TrackerInCharger, true),
        "P62" => (Category::TrackerInCharger, false),
        "P53" => (Category::HomeCurfewViolation, true),
        "P54" => (Category::HomeCurfewViolation, false),
        _ => return None,
    };
    Some(classified)
}

/// Chronological start/stop markers for every category.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusLog {
    markers: BTreeMap<Category, Vec<StatusMarker>>,
}

impl Default for StatusLog {
    fn default() -> Self {
        Self {
            markers: Category::ALL
                .iter()
                .map(|category| (*category, Vec::new()))
                .collect(),
        }
    }
}

impl StatusLog {
    pub fn push(&mut self, category: Category, marker: StatusMarker) {
        self.markers.entry(category).or_default().push(marker);
    }

    pub fn markers(&self, category: Category) -> &[StatusMarker] {
        self.markers
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Stable sort of every list by timestamp.
    pub fn sort(&mut self) {
        for markers in self.markers.values_mut() {
            markers.sort_by_key(|marker| marker.at);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.values().all(Vec::is_empty)
    }

    pub fn episodes(&self, category: Category) -> Vec<Episode> {
        episodes(category, self.markers(category))
    }

    /// Copy holding only the markers that fall inside `window`.
    pub fn within(&self, window: &ReportWindow) -> StatusLog {
        StatusLog {
            markers: self
                .markers
                .iter()
                .map(|(category, markers)| {
                    let kept = markers
                        .iter()
                        .filter(|marker| window.contains(marker.at))
                        .cloned()
                        .collect();
                    (*category, kept)
                })
                .collect(),
        }
    }
}

/// Builds the status log for `subject_id`, failing on rows for any other subject.
pub fn pair_events(subject_id: &str, events: &[RawEvent]) -> Result<StatusLog, TrailError> {
    let mut ordered: Vec<&RawEvent> = events.iter().collect();
    ordered.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then(a.event_id.cmp(&b.event_id))
    });

    let mut log = StatusLog::default();
    let mut ignored = 0usize;

    for event in ordered {
        ensure_subject("events", subject_id, &event.subject_id)?;

        let Some((category, is_start)) = classify(&event.code) else {
            ignored += 1;
            continue;
        };

        log.push(
            category,
            StatusMarker {
                at: event.occurred_at,
                is_start,
                action: event.action.clone(),
                warning: event.warning.clone(),
            },
        );
    }

    log.sort();
    debug!(events = events.len(), ignored, "paired device events");
    Ok(log)
}

/// Pairs each start with the next stop.
///
/// A start while an episode is already open does not open a second one, a stop
/// with nothing open is dropped, and a trailing start stays open.
pub fn episodes(category: Category, markers: &[StatusMarker]) -> Vec<Episode> {
    let mut closed = Vec::new();
    let mut open: Option<Episode> = None;

    for marker in markers {
        match (open.is_some(), marker.is_start) {
            (false, true) => {
                open = Some(Episode {
                    category,
                    start: marker.at,
                    end: None,
                    action: marker.action.clone(),
                    warning: marker.warning.clone(),
                });
            }
            (true, false) => {
                if let Some(mut episode) = open.take() {
                    episode.end = Some(marker.at);
                    closed.push(episode);
                }
            }
            (true, true) | (false, false) => {}
        }
    }

    closed.extend(open);
    closed
}

/// First and last marker times plus the full list of status changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub evidence: Vec<StatusChange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatusChange {
    pub at: DateTime<Utc>,
    pub active: bool,
}

pub fn observe(markers: &[StatusMarker]) -> Option<Observation> {
    let first = markers.first()?;
    let last = markers.last()?;
    Some(Observation {
        first: first.at,
        last: last.at,
        evidence: markers
            .iter()
            .map(|marker| StatusChange {
                at: marker.at,
                active: marker.is_start,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::at;

    fn event(event_id: i64, code: &str, occurred_at: DateTime<Utc>) -> RawEvent {
        RawEvent {
            subject_id: "00/123456X".to_string(),
            event_id,
            serial_number: Some("TRK-1".to_string()),
            code: code.to_string(),
            description: None,
            occurred_at,
            uploaded_at: None,
            action: None,
            warning: None,
        }
    }

    #[test]
    fn strap_tamper_start_and_stop_make_one_closed_episode() {
        let events = vec![event(1, "P59", at(6, 10, 0)), event(2, "P60", at(6, 20, 0))];
        let log = pair_events("00/123456X", &events).unwrap();

        let episodes = log.episodes(Category::StrapTamper);
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].start, at(6, 10, 0));
        assert_eq!(episodes[0].end, Some(at(6, 20, 0)));
    }

    #[test]
    fn lone_inclusion_start_stays_open() {
        let log = pair_events("00/123456X", &[event(1, "P67", at(6, 10, 0))]).unwrap();
        let episodes = log.episodes(Category::InclusionZoneViolation);
        assert_eq!(episodes.len(), 1);
        assert!(episodes[0].is_open());
    }

    #[test]
    fn unmatched_stops_and_repeated_starts_are_absorbed() {
        let markers = vec![
            StatusMarker::new(at(6, 0, 0), false),
            StatusMarker::new(at(6, 5, 0), true),
            StatusMarker::new(at(6, 6, 0), true),
            StatusMarker::new(at(6, 10, 0), false),
            StatusMarker::new(at(6, 11, 0), false),
            StatusMarker::new(at(6, 20, 0), true),
            StatusMarker::new(at(6, 30, 0), false),
        ];
        let episodes = episodes(Category::TrackerInCharger, &markers);

        assert_eq!(episodes.len(), 2);
        assert_eq!(episodes[0].start, at(6, 5, 0));
        assert_eq!(episodes[0].end, Some(at(6, 10, 0)));
        assert_eq!(episodes[1].start, at(6, 20, 0));
        for pair in episodes.windows(2) {
            assert!(pair[0].start < pair[1].start);
            assert!(pair[0].end.is_some_and(|end| end <= pair[1].start));
        }
    }

    #[test]
    fn unknown_codes_are_ignored_and_empty_categories_are_empty() {
        let events = vec![event(1, "X01", at(6, 0, 0)), event(2, "P50", at(6, 1, 0))];
        let log = pair_events("00/123456X", &events).unwrap();

        assert_eq!(log.markers(Category::BodyTamper).len(), 1);
        assert!(log.markers(Category::HomeCurfewViolation).is_empty());
        assert!(log.episodes(Category::HomeCurfewViolation).is_empty());
    }

    #[test]
    fn markers_are_sorted_with_stable_ties() {
        let events = vec![
            event(3, "P54", at(6, 30, 0)),
            event(1, "P53", at(6, 10, 0)),
            event(2, "P54", at(6, 10, 0)),
        ];
        let log = pair_events("00/123456X", &events).unwrap();
        let markers = log.markers(Category::HomeCurfewViolation);

        let starts: Vec<bool> = markers.iter().map(|m| m.is_start).collect();
        assert_eq!(starts, vec![true, false, false]);
        assert_eq!(markers[2].at, at(6, 30, 0));
    }

    #[test]
    fn foreign_subject_rows_are_fatal() {
        let mut stray = event(2, "P60", at(6, 20, 0));
        stray.subject_id = "00/999999Z".to_string();
        let err = pair_events("00/123456X", &[event(1, "P59", at(6, 10, 0)), stray]).unwrap_err();
        assert!(matches!(err, TrailError::MixedSubjects { table: "events", .. }));
    }

    #[test]
    fn within_clips_markers_to_the_window() {
        let events = vec![
            event(1, "P61", at(5, 50, 0)),
            event(2, "P62", at(6, 10, 0)),
            event(3, "P61", at(7, 30, 0)),
        ];
        let log = pair_events("00/123456X", &events).unwrap();
        let window = ReportWindow::new(at(6, 0, 0), at(7, 30, 0)).unwrap();

        let clipped = log.within(&window);
        let markers = clipped.markers(Category::TrackerInCharger);
        assert_eq!(markers.len(), 1);
        assert!(!markers[0].is_start);
        assert!(clipped.episodes(Category::TrackerInCharger).is_empty());
        assert_eq!(log.markers(Category::TrackerInCharger).len(), 3);
    }

    #[test]
    fn observation_spans_first_to_last_marker() {
        assert!(observe(&[]).is_none());

        let markers = vec![
            StatusMarker::new(at(6, 10, 0), true),
            StatusMarker::new(at(6, 20, 0), false),
        ];
        let observation = observe(&markers).unwrap();
        assert_eq!(observation.first, at(6, 10, 0));
        assert_eq!(observation.last, at(6, 20, 0));
        assert_eq!(observation.evidence.len(), 2);
        assert!(!observation.evidence[1].active);
    }
}
