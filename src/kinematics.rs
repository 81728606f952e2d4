//! Per-point distance, bearing, speed and elapsed time along a retained trail.
//!
//! Coordinates are rounded to five decimal places (the precision of the route
//! encoding) before any measurement, and distances are whole metres.

use chrono::Duration;
use geo::{point, HaversineBearing, HaversineDistance, Point};
use tracing::debug;

use crate::config::AnnotatorConfig;
use crate::models::{AnnotatedPoint, PositionFix};

const METRES_PER_MILE: f64 = 1609.344;

fn round5(value: f64) -> f64 {
    (value * 1e5).round() / 1e5
}

fn to_point(fix: &PositionFix) -> Point<f64> {
    point!(x: round5(fix.longitude), y: round5(fix.latitude))
}

/// Great-circle distance in whole metres between `(lat, lon)` pairs.
pub fn coordinate_distance_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    let from = point!(x: round5(a.1), y: round5(a.0));
    let to = point!(x: round5(b.1), y: round5(b.0));
    from.haversine_distance(&to).round()
}

/// Great-circle distance in whole metres.
pub fn distance_m(a: &PositionFix, b: &PositionFix) -> f64 {
    to_point(a).haversine_distance(&to_point(b)).round()
}

/// Initial bearing from `a` to `b` in degrees, normalised to `[0, 360)`.
pub fn bearing_deg(a: &PositionFix, b: &PositionFix) -> f64 {
    to_point(a)
        .haversine_bearing(to_point(b))
        .rem_euclid(360.0)
}

/// Speed implied by moving from `a` to `b`; 0 when no time has passed.
pub fn implied_speed_mph(a: &PositionFix, b: &PositionFix) -> f64 {
    let seconds = (b.recorded_at - a.recorded_at).num_milliseconds() as f64 / 1000.0;
    if seconds <= 0.0 {
        return 0.0;
    }
    distance_m(a, b) / seconds * 3600.0 / METRES_PER_MILE
}

/// Coarse, direction-less rendering of a duration ("a few seconds", "3 hours").
///
/// Every unit is rounded from the whole duration and each bucket is decided on
/// its own unit, so 89m40s reads "an hour" and 35h40m reads "a day".
pub fn humanize(duration: Duration) -> String {
    let seconds = (duration.num_milliseconds().abs() as f64 / 1000.0).round();
    let minutes = (seconds / 60.0).round();
    let hours = (seconds / 3600.0).round();
    let days = (seconds / 86_400.0).round();
    let months = (seconds / (86_400.0 * 30.436_875)).round();
    let years = (seconds / (86_400.0 * 365.25)).round();

    if seconds < 45.0 {
        "a few seconds".to_string()
    } else if minutes <= 1.0 {
        "a minute".to_string()
    } else if minutes < 45.0 {
        format!("{minutes} minutes")
    } else if hours <= 1.0 {
        "an hour".to_string()
    } else if hours < 22.0 {
        format!("{hours} hours")
    } else if days <= 1.0 {
        "a day".to_string()
    } else if days < 26.0 {
        format!("{days} days")
    } else if months <= 1.0 {
        "a month".to_string()
    } else if months < 11.0 {
        format!("{months} months")
    } else if years <= 1.0 {
        "a year".to_string()
    } else {
        format!("{years} years")
    }
}

/// Drops glitch hops, trims the tail, then annotates what is left.
///
/// Every derived field is computed from the final retained neighbours, so no
/// dropped point ever influences an output row.
pub fn annotate(fixes: &[PositionFix], config: &AnnotatorConfig) -> Vec<AnnotatedPoint> {
    let mut kept: Vec<&PositionFix> = Vec::with_capacity(fixes.len());

    for fix in fixes {
        if let Some(last) = kept.last() {
            let hop = distance_m(last, fix);
            if hop > config.glitch_distance_cap_m {
                debug!(
                    position_id = fix.position_id,
                    hop_m = hop,
                    "dropping glitch hop from movement log"
                );
                continue;
            }
        }
        kept.push(fix);
    }

    let trimmed = kept.len().saturating_sub(config.trailing_trim_points);
    kept.truncate(trimmed);

    let Some(first) = kept.first().copied() else {
        return Vec::new();
    };

    kept.iter()
        .enumerate()
        .map(|(i, fix)| {
            let previous = i.checked_sub(1).map(|p| kept[p]);
            let next = kept.get(i + 1).copied();

            AnnotatedPoint {
                fix: (*fix).clone(),
                distance_from_previous: previous.map_or(0.0, |p| distance_m(p, fix)),
                distance_to_next: next.map_or(0.0, |n| distance_m(fix, n)),
                bearing_to_next: next.map(|n| bearing_deg(fix, n)),
                speed_from_previous: previous.map_or(0.0, |p| implied_speed_mph(p, fix)),
                elapsed_since_previous: previous
                    .map_or_else(Duration::zero, |p| fix.recorded_at - p.recorded_at),
                elapsed_since_first: fix.recorded_at - first.recorded_at,
                cumulative_distance_since_first: distance_m(first, fix),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{at, fix};

    fn untrimmed() -> AnnotatorConfig {
        AnnotatorConfig {
            trailing_trim_points: 0,
            ..AnnotatorConfig::default()
        }
    }

    #[test]
    fn tenth_of_a_degree_of_latitude_is_about_eleven_km() {
        let a = fix(1, at(6, 0, 0), 51.5, -0.1);
        let b = fix(2, at(6, 45, 0), 51.6, -0.1);
        let d = distance_m(&a, &b);
        assert!((d - 11_119.0).abs() < 50.0, "got {d}");
        assert_eq!(d, d.round());
    }

    #[test]
    fn bearings_are_normalised() {
        let origin = fix(1, at(6, 0, 0), 51.5, -0.1);
        let north = fix(2, at(6, 1, 0), 51.6, -0.1);
        let west = fix(3, at(6, 1, 0), 51.5, -0.2);
        assert!(bearing_deg(&origin, &north).abs() < 0.01);
        let w = bearing_deg(&origin, &west);
        assert!((w - 270.0).abs() < 0.5, "got {w}");
    }

    #[test]
    fn speed_is_zero_without_elapsed_time() {
        let a = fix(1, at(6, 0, 0), 51.5, -0.1);
        let b = fix(2, at(6, 0, 0), 51.6, -0.1);
        assert_eq!(implied_speed_mph(&a, &b), 0.0);

        let c = fix(3, at(7, 0, 0), 51.6, -0.1);
        let mph = implied_speed_mph(&a, &c);
        assert!((mph - 6.9).abs() < 0.1, "got {mph}");
    }

    #[test]
    fn humanize_follows_coarse_buckets() {
        assert_eq!(humanize(Duration::seconds(10)), "a few seconds");
        assert_eq!(humanize(Duration::seconds(60)), "a minute");
        assert_eq!(humanize(Duration::minutes(12)), "12 minutes");
        assert_eq!(humanize(Duration::minutes(60)), "an hour");
        assert_eq!(humanize(Duration::hours(3)), "3 hours");
        assert_eq!(humanize(Duration::hours(-3)), "3 hours");
        assert_eq!(humanize(Duration::hours(30)), "a day");
        assert_eq!(humanize(Duration::days(5)), "5 days");
        assert_eq!(humanize(Duration::days(40)), "a month");
        assert_eq!(humanize(Duration::days(400)), "a year");
    }

    #[test]
    fn humanize_decides_each_bucket_on_its_own_unit() {
        let just_under_ninety_minutes = Duration::minutes(89) + Duration::seconds(40);
        assert_eq!(humanize(just_under_ninety_minutes), "an hour");

        let just_under_a_day_and_a_half = Duration::hours(35) + Duration::minutes(40);
        assert_eq!(humanize(just_under_a_day_and_a_half), "a day");

        assert_eq!(humanize(Duration::seconds(89)), "a minute");
        assert_eq!(humanize(Duration::seconds(90)), "2 minutes");
        assert_eq!(humanize(Duration::minutes(44)), "44 minutes");
        assert_eq!(humanize(Duration::minutes(45)), "an hour");
        assert_eq!(humanize(Duration::minutes(90)), "2 hours");
        assert_eq!(humanize(Duration::hours(22)), "a day");
        assert_eq!(humanize(Duration::hours(36)), "2 days");
    }

    fn three_fix_window() -> Vec<PositionFix> {
        vec![
            fix(1, at(6, 0, 0), 51.5, -0.1),
            fix(2, at(6, 0, 0), 51.5, -0.1),
            fix(3, at(6, 45, 0), 51.6, -0.1),
        ]
    }

    #[test]
    fn annotates_the_three_fix_window_without_a_glitch_cap() {
        let uncapped = AnnotatorConfig {
            glitch_distance_cap_m: f64::INFINITY,
            trailing_trim_points: 0,
        };
        let points = annotate(&three_fix_window(), &uncapped);
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].distance_from_previous, 0.0);
        assert_eq!(points[1].distance_from_previous, 0.0);
        assert!((points[2].distance_from_previous - 11_119.0).abs() < 50.0);

        assert_eq!(points[1].speed_from_previous, 0.0);
        assert!(points[2].bearing_to_next.is_none());
        assert_eq!(points[2].elapsed_since_previous, Duration::minutes(45));
        assert_eq!(points[2].elapsed_since_first, Duration::minutes(45));
        assert_eq!(
            points[2].cumulative_distance_since_first,
            points[2].distance_from_previous
        );
    }

    #[test]
    fn default_glitch_cap_drops_an_eleven_km_hop() {
        let points = annotate(&three_fix_window(), &untrimmed());
        let ids: Vec<i64> = points.iter().map(|p| p.fix.position_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(points[1].bearing_to_next.is_none());
    }

    #[test]
    fn glitch_hops_are_measured_from_the_last_kept_point() {
        let fixes = vec![
            fix(1, at(6, 0, 0), 51.5, -0.1),
            fix(2, at(6, 10, 0), 52.5, -0.1),
            fix(3, at(6, 20, 0), 51.501, -0.1),
        ];

        let points = annotate(&fixes, &untrimmed());
        let ids: Vec<i64> = points.iter().map(|p| p.fix.position_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(points[1].distance_from_previous < 200.0);
        assert_eq!(points[1].elapsed_since_previous, Duration::minutes(20));
        assert!(points[0].bearing_to_next.is_some());
    }

    #[test]
    fn tail_trim_happens_before_annotation() {
        let fixes: Vec<_> = (0..31)
            .map(|i| fix(i, at(6, i as u32, 0), 51.5 + i as f64 * 0.001, -0.1))
            .collect();

        let points = annotate(&fixes, &AnnotatorConfig::default());
        assert_eq!(points.len(), 3);
        assert!(points[2].bearing_to_next.is_none());
        assert_eq!(points[2].distance_to_next, 0.0);
    }

    #[test]
    fn short_trails_trim_to_nothing() {
        let fixes = vec![fix(1, at(6, 0, 0), 51.5, -0.1)];
        assert!(annotate(&fixes, &AnnotatorConfig::default()).is_empty());
        assert!(annotate(&[], &untrimmed()).is_empty());
    }
}
