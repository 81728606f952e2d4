//! Flat CSV trail log: one row per retained fix, `(0, 0)` rows included.

use std::io::Write;
use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::config::ReportConfig;
use crate::error::TrailError;
use crate::events::StatusLog;
use crate::kinematics::{distance_m, humanize, implied_speed_mph};
use crate::models::{PositionFix, ReportWindow, SubjectExtract};
use crate::status::sample_all;
use crate::trail::retain_fixes;

const LOG_TIME_FORMAT: &str = "%d/%m/%Y_%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrailLogRow {
    #[serde(rename = "Offender ID")]
    pub subject_id: String,
    #[serde(rename = "Date & Time")]
    pub recorded_at: String,
    #[serde(rename = "Latitude")]
    pub latitude: Option<f64>,
    #[serde(rename = "Longitude")]
    pub longitude: Option<f64>,
    #[serde(rename = "Altitude")]
    pub altitude: Option<f64>,
    #[serde(rename = "*Speed*")]
    pub speed: &'static str,
    #[serde(rename = "*Distance*")]
    pub distance_m: f64,
    /// Time until the next row; blank on the last one.
    #[serde(rename = "*Duration*")]
    pub duration: Option<String>,
    #[serde(rename = "Number of Satellites")]
    pub satellites: Option<u32>,
    #[serde(rename = "Strap Tamper")]
    pub strap_tamper: u8,
    #[serde(rename = "Body Tamper")]
    pub body_tamper: u8,
    #[serde(rename = "Exclusion Zone Violation")]
    pub exclusion_zone_violation: u8,
    #[serde(rename = "Inclusion Zone Violation")]
    pub inclusion_zone_violation: u8,
    #[serde(rename = "Tracker in Charger")]
    pub tracker_in_charger: u8,
    #[serde(rename = "Home Curfew Violation")]
    pub home_curfew_violation: u8,
    #[serde(rename = "Generated By")]
    pub generated_by: String,
    #[serde(rename = "LBS Accuracy")]
    pub lbs_accuracy: Option<f64>,
}

/// Buckets a speed into the bands the log prints. Anything at or over the
/// plausibility ceiling reads as `"0"`.
pub fn speed_band(mph: f64) -> &'static str {
    const BANDS: [(f64, &str); 11] = [
        (0.1, "0"),
        (10.0, "< 10"),
        (20.0, "10 - 20"),
        (30.0, "20 - 30"),
        (40.0, "30 - 40"),
        (50.0, "40 - 50"),
        (60.0, "50 - 60"),
        (70.0, "60 - 70"),
        (100.0, "70 - 100"),
        (120.0, "100 - 120"),
        (300.0, "120+"),
    ];

    BANDS
        .iter()
        .find(|(ceiling, _)| mph < *ceiling)
        .map(|(_, band)| *band)
        .unwrap_or("0")
}

// Zero fixes carry no position, so nothing is measured to or from them.
fn leg(previous: Option<&PositionFix>, fix: &PositionFix) -> (f64, f64) {
    match previous {
        Some(previous) if !previous.is_zero_fix() && !fix.is_zero_fix() => {
            (distance_m(previous, fix), implied_speed_mph(previous, fix))
        }
        _ => (0.0, 0.0),
    }
}

pub fn trail_log_rows(
    extract: &SubjectExtract,
    status: &StatusLog,
    window: &ReportWindow,
    config: &ReportConfig,
) -> Result<Vec<TrailLogRow>, TrailError> {
    extract.validate()?;

    let retained = retain_fixes(&extract.fixes, window, &config.trail_log_dedup());

    let rows = retained
        .iter()
        .enumerate()
        .map(|(i, fix)| {
            let previous = i.checked_sub(1).map(|p| &retained[p]);
            let next = retained.get(i + 1);
            let (distance, speed) = leg(previous, fix);
            let flags = sample_all(fix.recorded_at, status);
            let flag = |index: usize| u8::from(flags[index].1);
            let zero = fix.is_zero_fix();

            TrailLogRow {
                subject_id: fix.subject_id.clone(),
                recorded_at: fix.recorded_at.format(LOG_TIME_FORMAT).to_string(),
                latitude: (!zero).then_some(fix.latitude),
                longitude: (!zero).then_some(fix.longitude),
                altitude: fix.altitude,
                speed: speed_band(speed),
                distance_m: distance,
                duration: next.map(|next| humanize(next.recorded_at - fix.recorded_at)),
                satellites: fix.satellites,
                strap_tamper: flag(0),
                body_tamper: flag(1),
                exclusion_zone_violation: flag(2),
                inclusion_zone_violation: flag(3),
                tracker_in_charger: flag(4),
                home_curfew_violation: flag(5),
                generated_by: fix.source.clone(),
                lbs_accuracy: fix.lbs_accuracy,
            }
        })
        .collect();

    Ok(rows)
}

pub fn write_trail_log<W: Write>(rows: &[TrailLogRow], sink: W) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(sink);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn save_trail_log(rows: &[TrailLogRow], path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    write_trail_log(rows, file)?;
    info!(path = %path.display(), rows = rows.len(), "wrote trail log");
    Ok(())
}
