//! Time series normalisation and weekly OHLC folding.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeDelta};
use serde::Serialize;
use serde_json::Value;

use crate::core::normalize::{first_present, lookup, to_ms, to_number};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    /// Unix milliseconds
    pub t: i64,
    pub v: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Candle {
    /// Monday 00:00 UTC of the candle's week, Unix milliseconds
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

/// Turn upstream rows into points sorted by time. Rows may be objects, read through the
/// candidate keys, or `[t, v]` pairs. Rows without a usable time or value are dropped.
pub fn normalize_series(rows: &[Value], time_keys: &[&str], value_keys: &[&str]) -> Vec<SeriesPoint> {
    let mut points: Vec<SeriesPoint> = rows
        .iter()
        .filter_map(|row| {
            let (t, v) = match row {
                Value::Array(pair) => (pair.first()?, pair.get(1)?),
                _ => (first_present(row, time_keys)?, first_present(row, value_keys)?),
            };
            Some(SeriesPoint {
                t: to_ms(t)?,
                v: to_number(v)?,
            })
        })
        .collect();
    points.sort_by_key(|p| p.t);
    points
}

/// First non-empty array among `keys`, at the top level or under `data`
pub fn pick_series<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Vec<Value>> {
    keys.iter().find_map(|key| {
        [lookup(payload, key), lookup(payload, &format!("data.{}", key))]
            .into_iter()
            .flatten()
            .find_map(|v| v.as_array().filter(|a| !a.is_empty()))
    })
}

/// Monday 00:00 UTC of the week containing `t_ms`
pub fn week_start_ms(t_ms: i64) -> Option<i64> {
    let date = DateTime::from_timestamp_millis(t_ms)?.date_naive();
    // Dates in the first week of chrono's range have no Monday; such points are skipped
    let monday = date.checked_sub_signed(TimeDelta::days(i64::from(
        date.weekday().num_days_from_monday(),
    )))?;
    Some(monday.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// One candle per calendar week that has at least one point. Open and close come from the
/// earliest and latest point of the week.
pub fn weekly_candles(points: &[SeriesPoint]) -> Vec<Candle> {
    let mut weeks: BTreeMap<i64, Vec<SeriesPoint>> = BTreeMap::new();
    for point in points {
        if let Some(week) = week_start_ms(point.t) {
            weeks.entry(week).or_default().push(*point);
        }
    }

    weeks
        .into_iter()
        .filter_map(|(week, mut bucket)| {
            bucket.sort_by_key(|p| p.t);
            let first = bucket.first()?;
            let last = bucket.last()?;
            let (h, l) = bucket
                .iter()
                .fold((f64::NEG_INFINITY, f64::INFINITY), |(h, l), p| (h.max(p.v), l.min(p.v)));
            Some(Candle {
                t: week,
                o: first.v,
                h,
                l,
                c: last.v,
            })
        })
        .collect()
}
