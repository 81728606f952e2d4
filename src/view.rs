//! The report model every renderer reads, and the pipeline that builds it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::config::ReportConfig;
use crate::error::TrailError;
use crate::events::{observe, Observation, StatusLog};
use crate::kinematics::annotate;
use crate::map_tile::StaticMapRequest;
use crate::models::{
    AnnotatedPoint, Category, Episode, ReportWindow, SubjectDetails, SubjectExtract,
};
use crate::route::{self, BoundingBox, MapBoundaries, RouteEncoding};
use crate::trail::retain_fixes;
use crate::zones::{event_list, zone_list, EventSummary, ZoneSummary};

#[derive(Debug, Clone, Serialize)]
pub struct ReportView {
    pub subject_id: String,
    pub serial_number: Option<String>,
    pub details: Option<SubjectDetails>,
    pub window: ReportWindow,
    pub generated_at: DateTime<Utc>,
    pub trail_start: Option<DateTime<Utc>>,
    pub trail_end: Option<DateTime<Utc>>,
    pub trail: Vec<AnnotatedPoint>,
    /// Categories with no markers in the window are absent.
    pub observations: BTreeMap<Category, Observation>,
    pub episodes: Vec<Episode>,
    pub map_boundaries: Option<MapBoundaries>,
    pub route: Option<RouteEncoding>,
    pub map_url: Option<String>,
    pub zones: Vec<ZoneSummary>,
    pub events: Vec<EventSummary>,
}

/// Everything the view is merged from.
pub struct ViewParts {
    pub subject_id: String,
    pub serial_number: Option<String>,
    pub details: Option<SubjectDetails>,
    pub window: ReportWindow,
    pub generated_at: DateTime<Utc>,
    pub trail: Vec<AnnotatedPoint>,
    pub status: StatusLog,
    pub bounds: Option<BoundingBox>,
    pub route: Option<RouteEncoding>,
    pub map_url: Option<String>,
    pub zones: Vec<ZoneSummary>,
    pub events: Vec<EventSummary>,
}

/// Pure merge; nothing is recomputed here.
pub fn assemble(parts: ViewParts) -> ReportView {
    let observations = Category::ALL
        .iter()
        .filter_map(|category| {
            observe(parts.status.markers(*category)).map(|observation| (*category, observation))
        })
        .collect();

    let episodes = Category::ALL
        .iter()
        .flat_map(|category| parts.status.episodes(*category))
        .collect();

    ReportView {
        subject_id: parts.subject_id,
        serial_number: parts.serial_number,
        details: parts.details,
        window: parts.window,
        generated_at: parts.generated_at,
        trail_start: parts.trail.first().map(|point| point.fix.recorded_at),
        trail_end: parts.trail.last().map(|point| point.fix.recorded_at),
        trail: parts.trail,
        observations,
        episodes,
        map_boundaries: parts.bounds.map(MapBoundaries::from),
        route: parts.route,
        map_url: parts.map_url,
        zones: parts.zones,
        events: parts.events,
    }
}

/// Runs the whole pipeline for one subject and window.
///
/// With a `map` request the route is sized against the full request URL;
/// without one, against the bare encoding length.
pub fn build_view(
    extract: &SubjectExtract,
    status: &StatusLog,
    window: &ReportWindow,
    config: &ReportConfig,
    map: Option<&StaticMapRequest>,
    generated_at: DateTime<Utc>,
) -> Result<ReportView, TrailError> {
    extract.validate()?;

    let retained = retain_fixes(&extract.fixes, window, &config.dedup);
    let trail = annotate(&retained, &config.annotator);
    let bounds = BoundingBox::of(&retained);

    let route = bounds.map(|bounds| {
        let coordinates = route::coordinates(&retained);
        let scale = bounds.scale(config.map.canvas_px);
        match map {
            Some(request) => route::reduce_route_with(
                &coordinates,
                scale,
                config.map.max_attempts,
                |encoded| request.fits(encoded),
            ),
            None => route::reduce_route(
                &coordinates,
                scale,
                config.map.max_url_len,
                config.map.max_attempts,
            ),
        }
    });

    let map_url = match (map, &route) {
        (Some(request), Some(route)) => Some(request.url_for(&route.encoded).to_string()),
        _ => None,
    };

    let retained_count = retained.len();
    let view = assemble(ViewParts {
        subject_id: extract.subject_id.clone(),
        serial_number: extract.serial_number.clone(),
        details: extract.details.clone(),
        window: *window,
        generated_at,
        trail,
        status: status.within(window),
        bounds,
        route,
        map_url,
        zones: zone_list(&extract.zones, &extract.time_frames, window),
        events: event_list(&extract.events, window),
    });

    info!(
        subject = %extract.subject_id,
        raw_fixes = extract.fixes.len(),
        retained = retained_count,
        logged = view.trail.len(),
        open_episodes = view.episodes.iter().filter(|e| e.is_open()).count(),
        "built report view"
    );
    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapConfig;
    use crate::models::fixtures::{at, fix};
    use crate::models::StatusMarker;

    fn extract() -> SubjectExtract {
        let fixes = (0..40)
            .map(|i| fix(i, at(6, i as u32, 0), 51.5 + i as f64 * 0.001, -0.1))
            .collect();
        SubjectExtract {
            subject_id: "00/123456X".to_string(),
            serial_number: Some("TRK-1".to_string()),
            fixes,
            ..Default::default()
        }
    }

    fn window() -> ReportWindow {
        ReportWindow::new(at(6, 0, 0), at(7, 30, 0)).unwrap()
    }

    #[test]
    fn assembles_trail_route_and_observations() {
        let mut status = StatusLog::default();
        status.push(Category::StrapTamper, StatusMarker::new(at(6, 10, 0), true));
        status.push(Category::StrapTamper, StatusMarker::new(at(6, 20, 0), false));

        let view = build_view(
            &extract(),
            &status,
            &window(),
            &ReportConfig::default(),
            None,
            at(12, 0, 0),
        )
        .unwrap();

        assert_eq!(view.trail.len(), 12);
        assert_eq!(view.trail_start, Some(at(6, 0, 0)));
        assert_eq!(view.trail_end, Some(at(6, 11, 0)));

        let strap = &view.observations[&Category::StrapTamper];
        assert_eq!(strap.first, at(6, 10, 0));
        assert_eq!(strap.last, at(6, 20, 0));
        assert!(!view.observations.contains_key(&Category::BodyTamper));
        assert_eq!(view.episodes.len(), 1);

        let route = view.route.as_ref().unwrap();
        assert_eq!(route.points, 40);
        assert!(!route.degraded);
        assert!(view.map_boundaries.is_some());
        assert!(view.map_url.is_none());
    }

    #[test]
    fn map_request_sizes_the_route_against_the_url() {
        let request = StaticMapRequest::new(&MapConfig::default()).unwrap();
        let view = build_view(
            &extract(),
            &StatusLog::default(),
            &window(),
            &ReportConfig::default(),
            Some(&request),
            at(12, 0, 0),
        )
        .unwrap();

        let url = view.map_url.unwrap();
        assert!(url.len() <= 8192);
        assert!(view.observations.is_empty());
    }

    #[test]
    fn empty_window_yields_an_empty_view() {
        let empty = ReportWindow::new(at(9, 0, 0), at(10, 0, 0)).unwrap();
        let view = build_view(
            &extract(),
            &StatusLog::default(),
            &empty,
            &ReportConfig::default(),
            None,
            at(12, 0, 0),
        )
        .unwrap();

        assert!(view.trail.is_empty());
        assert!(view.route.is_none());
        assert!(view.map_boundaries.is_none());
        assert!(view.trail_start.is_none());
    }

    #[test]
    fn mixed_subjects_abort_the_build() {
        let mut extract = extract();
        extract.fixes[3].subject_id = "00/999999Z".to_string();
        let err = build_view(
            &extract,
            &StatusLog::default(),
            &window(),
            &ReportConfig::default(),
            None,
            at(12, 0, 0),
        )
        .unwrap_err();
        assert!(matches!(err, TrailError::MixedSubjects { .. }));
    }
}
