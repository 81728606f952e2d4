use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::TrailError;
use crate::models::{
    sort_fixes, Address, EventAction, EventWarning, PositionFix, Programme, RawEvent,
    SubjectDetails, SubjectExtract, TimeFrame, ZoneVersion,
};

/// Timestamp layout of the monitoring extract, e.g. `Jul 14 2017 6:00AM`.
const EXTRACT_TIME_FORMAT: &str = "%b %d %Y %I:%M%p";

/// Parses an extract timestamp as UTC, accepting RFC 3339 as well.
pub fn parse_extract_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, TrailError> {
    let trimmed = value.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, EXTRACT_TIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| TrailError::InvalidTimestamp {
            field,
            value: value.to_string(),
        })
}

fn parse_optional_time(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, TrailError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => parse_extract_time(field, v).map(Some),
        None => Ok(None),
    }
}

fn require<T>(table: &'static str, field: &'static str, value: Option<T>) -> Result<T, TrailError> {
    value.ok_or(TrailError::MissingField { table, field })
}

#[derive(Debug, sqlx::FromRow)]
struct PointRow {
    offender_id: String,
    position_id: i64,
    point_time: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    point_type: Option<String>,
}

impl TryFrom<PointRow> for PositionFix {
    type Error = TrailError;

    fn try_from(row: PointRow) -> Result<Self, Self::Error> {
        let point_time = require("points", "point_time", row.point_time)?;
        Ok(PositionFix {
            subject_id: row.offender_id,
            serial_number: None,
            position_id: row.position_id,
            recorded_at: parse_extract_time("point_time", &point_time)?,
            latitude: require("points", "lat", row.lat)?,
            longitude: require("points", "lon", row.lon)?,
            altitude: None,
            source: row.point_type.unwrap_or_default(),
            satellites: None,
            lbs_accuracy: None,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    offender_id: String,
    event_id: i64,
    receiver_sn: Option<String>,
    event_code: Option<String>,
    description: Option<String>,
    event_time: Option<String>,
    upload_time: Option<String>,
    action_time: Option<String>,
    action_seq_no: Option<i64>,
    action_user: Option<String>,
    action_status: Option<String>,
    action_comment: Option<String>,
    warning_number: Option<i64>,
    warning_date: Option<String>,
    is_warning_printed: Option<bool>,
    is_warning_sent: Option<bool>,
    response_time_met: Option<bool>,
    user_name: Option<String>,
    user_id: Option<String>,
}

impl TryFrom<EventRow> for RawEvent {
    type Error = TrailError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_time = require("events", "event_time", row.event_time)?;

        let action = parse_optional_time("action_time", row.action_time.as_deref())?.map(|at| {
            EventAction {
                at,
                sequence_no: row.action_seq_no,
                user_id: row.action_user,
                status: row.action_status,
                comment: row.action_comment,
            }
        });

        let warning =
            parse_optional_time("warning_date", row.warning_date.as_deref())?.map(|at| {
                EventWarning {
                    number: row.warning_number,
                    at,
                    printed: row.is_warning_printed,
                    sent: row.is_warning_sent,
                    response_time_met: row.response_time_met,
                    user: row.user_name,
                    user_id: row.user_id,
                }
            });

        Ok(RawEvent {
            subject_id: row.offender_id,
            event_id: row.event_id,
            serial_number: row.receiver_sn,
            code: require("events", "event_code", row.event_code)?,
            description: row.description,
            occurred_at: parse_extract_time("event_time", &event_time)?,
            uploaded_at: parse_optional_time("upload_time", row.upload_time.as_deref())?,
            action,
            warning,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DetailsRow {
    offender_id: String,
    first_name: Option<String>,
    middle_name: Option<String>,
    last_name: Option<String>,
    gender: Option<String>,
    address: Option<String>,
    city_name: Option<String>,
    country_id: Option<String>,
    zip_code: Option<String>,
    home_phone: Option<String>,
    work_phone: Option<String>,
    program_type: Option<String>,
    program_start: Option<String>,
    program_end: Option<String>,
}

impl TryFrom<DetailsRow> for SubjectDetails {
    type Error = TrailError;

    fn try_from(row: DetailsRow) -> Result<Self, Self::Error> {
        Ok(SubjectDetails {
            subject_id: row.offender_id,
            first_name: row.first_name,
            middle_name: row.middle_name,
            last_name: row.last_name,
            gender: row.gender,
            address: Address {
                line1: row.address,
                city: row.city_name,
                country: row.country_id,
                postcode: row.zip_code,
                home_phone: row.home_phone,
                work_phone: row.work_phone,
            },
            programme: Programme {
                kind: row.program_type,
                start: parse_optional_time("program_start", row.program_start.as_deref())?,
                end: parse_optional_time("program_end", row.program_end.as_deref())?,
            },
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ZoneRow {
    zone_id: i64,
    zone_name: Option<String>,
    zone_rule: Option<String>,
    zone_type: Option<String>,
    grace_time: Option<i64>,
    blp: Option<String>,
    version_no: Option<i64>,
    version_start: Option<String>,
    version_end: Option<String>,
}

impl TryFrom<ZoneRow> for ZoneVersion {
    type Error = TrailError;

    fn try_from(row: ZoneRow) -> Result<Self, Self::Error> {
        let version_start = require("zones", "version_start", row.version_start)?;
        Ok(ZoneVersion {
            zone_id: row.zone_id,
            name: require("zones", "zone_name", row.zone_name)?,
            rule: row.zone_rule,
            kind: row.zone_type,
            grace_time: row.grace_time,
            blp: row.blp,
            version_no: row.version_no.unwrap_or_default(),
            version_start: parse_extract_time("version_start", &version_start)?,
            version_end: parse_optional_time("version_end", row.version_end.as_deref())?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TimeFrameRow {
    zone_id: i64,
    version_start: Option<String>,
    version_end: Option<String>,
    frame_start_time: Option<String>,
    frame_end_time: Option<String>,
}

impl TryFrom<TimeFrameRow> for TimeFrame {
    type Error = TrailError;

    fn try_from(row: TimeFrameRow) -> Result<Self, Self::Error> {
        let version_start = require("time_frames", "version_start", row.version_start)?;
        Ok(TimeFrame {
            zone_id: row.zone_id,
            version_start: parse_extract_time("version_start", &version_start)?,
            version_end: parse_optional_time("version_end", row.version_end.as_deref())?,
            frame_start: row.frame_start_time,
            frame_end: row.frame_end_time,
        })
    }
}

fn convert<R, T>(rows: Vec<R>) -> Result<Vec<T>, TrailError>
where
    T: TryFrom<R, Error = TrailError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub async fn fetch_details(
    pool: &SqlitePool,
    offender_id: &str,
) -> anyhow::Result<Option<SubjectDetails>> {
    let row = sqlx::query_as::<_, DetailsRow>("SELECT * FROM details WHERE offender_id = ?")
        .bind(offender_id)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(SubjectDetails::try_from).transpose()?)
}

pub async fn fetch_points(
    pool: &SqlitePool,
    offender_id: &str,
) -> anyhow::Result<Vec<PositionFix>> {
    let rows = sqlx::query_as::<_, PointRow>(
        "SELECT offender_id, position_id, point_time, lat, lon, point_type \
         FROM points WHERE offender_id = ?",
    )
    .bind(offender_id)
    .fetch_all(pool)
    .await?;

    let mut fixes: Vec<PositionFix> = convert(rows)?;
    sort_fixes(&mut fixes);
    Ok(fixes)
}

pub async fn fetch_zones(pool: &SqlitePool, offender_id: &str) -> anyhow::Result<Vec<ZoneVersion>> {
    let rows = sqlx::query_as::<_, ZoneRow>("SELECT * FROM zones WHERE offender_id = ?")
        .bind(offender_id)
        .fetch_all(pool)
        .await?;

    let mut zones: Vec<ZoneVersion> = convert(rows)?;
    zones.sort_by_key(|zone| zone.version_start);
    Ok(zones)
}

pub async fn fetch_time_frames(
    pool: &SqlitePool,
    offender_id: &str,
) -> anyhow::Result<Vec<TimeFrame>> {
    let rows = sqlx::query_as::<_, TimeFrameRow>("SELECT * FROM time_frames WHERE offender_id = ?")
        .bind(offender_id)
        .fetch_all(pool)
        .await?;

    let mut frames: Vec<TimeFrame> = convert(rows)?;
    frames.sort_by_key(|frame| frame.version_start);
    Ok(frames)
}

pub async fn fetch_events(pool: &SqlitePool, offender_id: &str) -> anyhow::Result<Vec<RawEvent>> {
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT
            e.offender_id, e.event_id, e.receiver_sn, e.event_code, et.description,
            e.event_time, e.upload_time,
            e.action_time, e.action_seq_no, e.action_user, e.action_status, e.action_comment,
            w.warning_number, w.warning_date, w.is_warning_printed, w.is_warning_sent,
            w.response_time_met, w.user_name, w.user_id
        FROM events e
            LEFT JOIN warnings w ON e.offender_id = w.offender_id AND e.event_id = w.event_id
            LEFT JOIN event_types et ON e.event_code = et.code
        WHERE e.offender_id = ?
        "#,
    )
    .bind(offender_id)
    .fetch_all(pool)
    .await?;

    let mut events: Vec<RawEvent> = convert(rows)?;
    events.sort_by_key(|event| event.occurred_at);
    Ok(events)
}

/// Reads every table for one subject.
pub async fn fetch_extract(pool: &SqlitePool, offender_id: &str) -> anyhow::Result<SubjectExtract> {
    let details = fetch_details(pool, offender_id)
        .await
        .context("failed to read subject details")?;
    let fixes = fetch_points(pool, offender_id)
        .await
        .context("failed to read points")?;
    let zones = fetch_zones(pool, offender_id)
        .await
        .context("failed to read zones")?;
    let time_frames = fetch_time_frames(pool, offender_id)
        .await
        .context("failed to read time frames")?;
    let events = fetch_events(pool, offender_id)
        .await
        .context("failed to read events")?;

    let extract = SubjectExtract {
        subject_id: offender_id.to_string(),
        serial_number: events.iter().find_map(|event| event.serial_number.clone()),
        details,
        fixes,
        events,
        zones,
        time_frames,
    };
    extract.validate()?;

    info!(
        subject = offender_id,
        points = extract.fixes.len(),
        events = extract.events.len(),
        zones = extract.zones.len(),
        "read subject extract"
    );
    Ok(extract)
}
