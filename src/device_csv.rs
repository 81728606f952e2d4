//! Reads the tracker's own CSV export.
//!
//! Columns are positional; the header row is skipped whatever it says. Status
//! columns hold 0/1 per row and are turned into markers on every change.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::info;

use crate::error::TrailError;
use crate::events::StatusLog;
use crate::models::{sort_fixes, Category, PositionFix, StatusMarker, SubjectExtract};

const DEVICE_TIME_FORMAT: &str = "%d/%m/%Y_%H:%M:%S";

#[derive(Debug, Deserialize)]
struct DeviceRow {
    serial_number: String,
    datetime: String,
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    _speed: IgnoredAny,
    satellites: Option<u32>,
    _tx_present: IgnoredAny,
    strap_tamper: Option<u8>,
    body_tamper: Option<u8>,
    exclusion_zone_violation: Option<u8>,
    inclusion_zone_violation: Option<u8>,
    tracker_in_charger: Option<u8>,
    home_curfew_violation: Option<u8>,
    generated_by: Option<String>,
    #[serde(default)]
    lbs_accuracy: Option<f64>,
    // tag identifier, battery, case and power are not captured
    #[serde(default)]
    _tag_identifier: IgnoredAny,
    #[serde(default)]
    _tracker_battery: IgnoredAny,
    #[serde(default)]
    _tracker_case: IgnoredAny,
    #[serde(default)]
    _tracker_power: IgnoredAny,
}

impl DeviceRow {
    fn statuses(&self) -> [(Category, bool); 6] {
        let on = |value: Option<u8>| value.unwrap_or(0) != 0;
        [
            (Category::StrapTamper, on(self.strap_tamper)),
            (Category::BodyTamper, on(self.body_tamper)),
            (Category::ExclusionZoneViolation, on(self.exclusion_zone_violation)),
            (Category::InclusionZoneViolation, on(self.inclusion_zone_violation)),
            (Category::TrackerInCharger, on(self.tracker_in_charger)),
            (Category::HomeCurfewViolation, on(self.home_curfew_violation)),
        ]
    }
}

pub fn parse_device_time(value: &str) -> Result<chrono::DateTime<Utc>, TrailError> {
    NaiveDateTime::parse_from_str(value.trim(), DEVICE_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| TrailError::InvalidTimestamp {
            field: "datetime",
            value: value.to_string(),
        })
}

/// Fixes plus the status markers recovered from the status columns.
#[derive(Debug, Clone)]
pub struct DeviceExport {
    pub extract: SubjectExtract,
    pub status: StatusLog,
}

pub fn read_device_csv<R: Read>(source: R, subject_id: &str) -> anyhow::Result<DeviceExport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);

    let mut serial_number: Option<String> = None;
    let mut fixes = Vec::new();
    let mut status = StatusLog::default();
    let mut last_status: [Option<bool>; 6] = [None; 6];

    for (index, result) in reader.records().enumerate() {
        let record = result?;
        let row: DeviceRow = record
            .deserialize(None)
            .with_context(|| format!("malformed device export row {}", index + 2))?;

        let expected = serial_number.get_or_insert_with(|| row.serial_number.clone());
        if *expected != row.serial_number {
            return Err(TrailError::MixedSerialNumbers {
                expected: expected.clone(),
                found: row.serial_number.clone(),
            }
            .into());
        }

        let recorded_at = parse_device_time(&row.datetime)?;

        for (slot, (category, active)) in row.statuses().into_iter().enumerate() {
            let changed = match last_status[slot] {
                None => active,
                Some(previous) => previous != active,
            };
            if changed {
                status.push(category, StatusMarker::new(recorded_at, active));
                last_status[slot] = Some(active);
            }
        }

        fixes.push(PositionFix {
            subject_id: subject_id.to_string(),
            serial_number: Some(row.serial_number),
            position_id: index as i64,
            recorded_at,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude: row.altitude,
            source: row.generated_by.unwrap_or_default(),
            satellites: row.satellites,
            lbs_accuracy: row.lbs_accuracy,
        });
    }

    sort_fixes(&mut fixes);
    status.sort();

    Ok(DeviceExport {
        extract: SubjectExtract {
            subject_id: subject_id.to_string(),
            serial_number,
            fixes,
            ..Default::default()
        },
        status,
    })
}

pub fn load_device_csv(path: &Path, subject_id: &str) -> anyhow::Result<DeviceExport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open device export {}", path.display()))?;
    let export = read_device_csv(file, subject_id)?;
    info!(
        path = %path.display(),
        fixes = export.extract.fixes.len(),
        "read device export"
    );
    Ok(export)
}
