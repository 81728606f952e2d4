use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{RawEvent, ReportWindow, TimeFrame, ZoneVersion};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSummary {
    pub id: i64,
    pub name: String,
    pub limitation: Option<String>,
    pub kind: Option<String>,
    pub grace_time: Option<i64>,
    /// A time frame (curfew schedule) is attached to the zone.
    pub curfew: bool,
    pub blp: Option<String>,
}

fn overlaps(zone: &ZoneVersion, window: &ReportWindow) -> bool {
    let starts_after = zone.version_start > window.end;
    let ends_before = zone.version_end.is_some_and(|end| end < window.start);
    !(starts_after || ends_before)
}

/// One entry per zone name among the versions in force during the window.
///
/// Versions are visited in `version_start` order; a later version only replaces
/// the current one when its version number is not higher.
pub fn zone_list(
    zones: &[ZoneVersion],
    time_frames: &[TimeFrame],
    window: &ReportWindow,
) -> Vec<ZoneSummary> {
    let mut ordered: Vec<&ZoneVersion> = zones.iter().collect();
    ordered.sort_by_key(|zone| zone.version_start);

    let mut by_name: BTreeMap<&str, &ZoneVersion> = BTreeMap::new();
    for zone in ordered {
        if !overlaps(zone, window) {
            continue;
        }
        if let Some(current) = by_name.get(zone.name.as_str()) {
            if zone.version_no > current.version_no {
                continue;
            }
        }
        by_name.insert(zone.name.as_str(), zone);
    }

    by_name
        .into_values()
        .map(|zone| ZoneSummary {
            id: zone.zone_id,
            name: zone.name.clone(),
            limitation: zone.rule.clone(),
            kind: zone.kind.clone(),
            grace_time: zone.grace_time,
            curfew: time_frames.iter().any(|frame| frame.zone_id == zone.zone_id),
            blp: zone.blp.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSummary {
    pub id: i64,
    pub at: DateTime<Utc>,
    pub code: String,
    pub message: Option<String>,
    pub status: Option<String>,
}

/// Events strictly inside the window, one per event id, in id order.
///
/// A later row for the same id (e.g. a second joined warning) replaces the earlier.
pub fn event_list(events: &[RawEvent], window: &ReportWindow) -> Vec<EventSummary> {
    let mut by_id: BTreeMap<i64, &RawEvent> = BTreeMap::new();
    for event in events {
        if event.occurred_at <= window.start || event.occurred_at >= window.end {
            continue;
        }
        by_id.insert(event.event_id, event);
    }

    by_id
        .into_values()
        .map(|event| EventSummary {
            id: event.event_id,
            at: event.occurred_at,
            code: event.code.clone(),
            message: event.description.clone(),
            status: event.action.as_ref().and_then(|action| action.status.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::at;
    use crate::models::EventAction;

    fn window() -> ReportWindow {
        ReportWindow::new(at(6, 0, 0), at(7, 30, 0)).unwrap()
    }

    fn zone(
        zone_id: i64,
        name: &str,
        version_no: i64,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
    ) -> ZoneVersion {
        ZoneVersion {
            zone_id,
            name: name.to_string(),
            rule: Some("inclusion".to_string()),
            kind: None,
            grace_time: Some(5),
            blp: None,
            version_no,
            version_start: start,
            version_end: end,
        }
    }

    fn event(event_id: i64, occurred_at: DateTime<Utc>, status: Option<&str>) -> RawEvent {
        RawEvent {
            subject_id: "00/123456X".to_string(),
            event_id,
            serial_number: None,
            code: "P59".to_string(),
            description: Some("Strap tamper".to_string()),
            occurred_at,
            uploaded_at: None,
            action: status.map(|status| EventAction {
                at: occurred_at,
                sequence_no: None,
                user_id: None,
                status: Some(status.to_string()),
                comment: None,
            }),
            warning: None,
        }
    }

    #[test]
    fn keeps_one_version_per_zone_in_force() {
        let zones = vec![
            zone(1, "Home", 1, at(1, 0, 0), None),
            zone(2, "Home", 2, at(2, 0, 0), None),
            zone(3, "Shop", 1, at(1, 0, 0), Some(at(5, 0, 0))),
            zone(4, "Work", 1, at(8, 0, 0), None),
        ];
        let frames = vec![TimeFrame {
            zone_id: 1,
            version_start: at(1, 0, 0),
            version_end: None,
            frame_start: Some("Monday 7:00PM".to_string()),
            frame_end: Some("Tuesday 7:00AM".to_string()),
        }];

        let list = zone_list(&zones, &frames, &window());
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, 1);
        assert!(list[0].curfew);
    }

    #[test]
    fn events_are_strictly_inside_and_deduplicated() {
        let events = vec![
            event(5, at(6, 0, 0), None),
            event(9, at(6, 30, 0), Some("open")),
            event(2, at(6, 40, 0), None),
            event(9, at(6, 30, 0), Some("closed")),
            event(7, at(7, 30, 0), None),
        ];

        let list = event_list(&events, &window());
        let ids: Vec<i64> = list.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 9]);
        assert_eq!(list[1].status.as_deref(), Some("closed"));
    }
}
