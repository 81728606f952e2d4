use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::kinematics::humanize;
use crate::models::Category;
use crate::view::ReportView;

const STATEMENT_TIME_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

fn stamp(at: DateTime<Utc>) -> String {
    at.format(STATEMENT_TIME_FORMAT).to_string()
}

fn or_dash(value: Option<&str>) -> &str {
    value.filter(|v| !v.trim().is_empty()).unwrap_or("-")
}

/// Renders the evidential statement for one subject and window.
///
/// `map_image` is linked when the image was saved; otherwise the bare map URL
/// is printed if the view carries one.
pub fn build_statement(view: &ReportView, map_image: Option<&Path>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Electronic Monitoring Statement");
    let _ = writeln!(
        output,
        "Subject {} ({}), {} to {}",
        view.subject_id,
        or_dash(view.serial_number.as_deref()),
        stamp(view.window.start),
        stamp(view.window.end)
    );
    let _ = writeln!(output, "Generated {}", stamp(view.generated_at));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject");
    match &view.details {
        Some(details) => {
            let name = details.full_name();
            let _ = writeln!(output, "- Name: {}", or_dash(Some(name.as_str())));
            let _ = writeln!(output, "- Gender: {}", or_dash(details.gender.as_deref()));
            let address = [
                details.address.line1.as_deref(),
                details.address.city.as_deref(),
                details.address.postcode.as_deref(),
                details.address.country.as_deref(),
            ]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(", ");
            let _ = writeln!(output, "- Address: {}", or_dash(Some(address.as_str())));
            let _ = writeln!(
                output,
                "- Phone: home {}, work {}",
                or_dash(details.address.home_phone.as_deref()),
                or_dash(details.address.work_phone.as_deref())
            );
            let programme = &details.programme;
            let _ = writeln!(
                output,
                "- Programme: {} from {} to {}",
                or_dash(programme.kind.as_deref()),
                programme.start.map(stamp).unwrap_or_else(|| "-".to_string()),
                programme.end.map(stamp).unwrap_or_else(|| "-".to_string())
            );
        }
        None => {
            let _ = writeln!(output, "No subject details on record.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Observations");
    if view.observations.is_empty() {
        let _ = writeln!(output, "No device alerts recorded for this window.");
    } else {
        for category in Category::ALL {
            let Some(observation) = view.observations.get(&category) else {
                continue;
            };
            let _ = writeln!(
                output,
                "- {}: first {}, last {} ({} changes)",
                category.label(),
                stamp(observation.first),
                stamp(observation.last),
                observation.evidence.len()
            );
        }
    }

    if !view.episodes.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Episodes");
        for episode in &view.episodes {
            let end = match episode.end {
                Some(end) => format!(
                    "{} ({})",
                    stamp(end),
                    humanize(end - episode.start)
                ),
                None => "still open".to_string(),
            };
            let _ = writeln!(
                output,
                "- {} from {} to {}",
                episode.category.label(),
                stamp(episode.start),
                end
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Zones");
    if view.zones.is_empty() {
        let _ = writeln!(output, "No zones in force during this window.");
    } else {
        for zone in &view.zones {
            let grace = zone
                .grace_time
                .map(|minutes| format!("{minutes} min grace"))
                .unwrap_or_else(|| "no grace".to_string());
            let _ = writeln!(
                output,
                "- {} ({}, {}, {}){}",
                zone.name,
                or_dash(zone.limitation.as_deref()),
                or_dash(zone.kind.as_deref()),
                grace,
                if zone.curfew { " with curfew" } else { "" }
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Events");
    if view.events.is_empty() {
        let _ = writeln!(output, "No events recorded for this window.");
    } else {
        for event in &view.events {
            let _ = writeln!(
                output,
                "- #{} {} {}: {} [{}]",
                event.id,
                stamp(event.at),
                event.code,
                or_dash(event.message.as_deref()),
                or_dash(event.status.as_deref())
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Movement Log");
    match (view.trail_start, view.trail_end) {
        (Some(start), Some(end)) => {
            let _ = writeln!(
                output,
                "{} positions from {} to {} ({}).",
                view.trail.len(),
                stamp(start),
                stamp(end),
                humanize(end - start)
            );
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "| Time | Latitude | Longitude | Distance (m) | Speed (mph) | Bearing \
                 | Since previous |"
            );
            let _ = writeln!(output, "|---|---|---|---|---|---|---|");
            for point in &view.trail {
                let bearing = point
                    .bearing_to_next
                    .map(|b| format!("{b:.0}"))
                    .unwrap_or_else(|| "-".to_string());
                let _ = writeln!(
                    output,
                    "| {} | {:.5} | {:.5} | {:.0} | {:.1} | {} | {} |",
                    stamp(point.fix.recorded_at),
                    point.fix.latitude,
                    point.fix.longitude,
                    point.distance_from_previous,
                    point.speed_from_previous,
                    bearing,
                    humanize(point.elapsed_since_previous)
                );
            }
        }
        _ => {
            let _ = writeln!(output, "No positions recorded for this window.");
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Map");
    match (map_image, view.map_url.as_deref(), &view.route) {
        (Some(path), _, _) => {
            let _ = writeln!(output, "![Route map]({})", path.display());
        }
        (None, Some(url), _) => {
            let _ = writeln!(output, "<{url}>");
        }
        (None, None, Some(route)) => {
            let _ = writeln!(output, "Encoded route: `{}`", route.encoded);
        }
        (None, None, None) => {
            let _ = writeln!(output, "No route to map.");
        }
    }
    if view.route.as_ref().is_some_and(|route| route.degraded) {
        let _ = writeln!(output, "Route detail was reduced to fit the map request.");
    }

    output
}
