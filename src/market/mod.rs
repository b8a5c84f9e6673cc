//! Market-timezone bucket flooring (spec §3 "bucket_start").

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::types::Timeframe;

/// The exchange's local trading timezone. NSE/BSE/MCX all settle on IST.
pub const MARKET_TZ: Tz = chrono_tz::Asia::Kolkata;

/// Floors `ts` to the start of its `timeframe` bucket in `MARKET_TZ`,
/// returning the result back in UTC (spec §3: "the floor of the tick
/// timestamp to the timeframe boundary in the market's local timezone").
pub fn floor_to_bucket(ts: DateTime<Utc>, timeframe: Timeframe) -> DateTime<Utc> {
    let local = ts.with_timezone(&MARKET_TZ);
    let minutes = timeframe.minutes();

    let floored_minute_of_day = {
        let minute_of_day = local.hour() as i64 * 60 + local.minute() as i64;
        (minute_of_day / minutes) * minutes
    };

    let day_start = MARKET_TZ
        .with_ymd_and_hms(local.year(), local.month(), local.day(), 0, 0, 0)
        .single()
        .expect("valid local midnight");

    let floored_local = day_start + ChronoDuration::minutes(floored_minute_of_day);
    floored_local.with_timezone(&Utc)
}

/// Whether `new_bucket` represents a subscriber-visible gap after
/// `prev_bucket` (spec §4.2 Backfill): the gap exceeds one timeframe width.
pub fn is_gap(prev_bucket: DateTime<Utc>, new_bucket: DateTime<Utc>, timeframe: Timeframe) -> bool {
    new_bucket - prev_bucket > ChronoDuration::minutes(timeframe.minutes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn floors_to_five_minute_boundary() {
        // 09:07:30 IST -> 09:05:00 IST bucket start
        let ts = MARKET_TZ
            .with_ymd_and_hms(2023, 11, 15, 9, 7, 30)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        let bucket = floor_to_bucket(ts, Timeframe::FiveMin);
        let expected = MARKET_TZ
            .with_ymd_and_hms(2023, 11, 15, 9, 5, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(bucket, expected);
    }

    #[test]
    fn floors_to_one_hour_boundary() {
        let ts = MARKET_TZ.with_ymd_and_hms(2023, 11, 15, 11, 59, 59).single().unwrap().with_timezone(&Utc);
        let bucket = floor_to_bucket(ts, Timeframe::OneHour);
        let expected = MARKET_TZ.with_ymd_and_hms(2023, 11, 15, 11, 0, 0).single().unwrap().with_timezone(&Utc);
        assert_eq!(bucket, expected);
    }

    #[test]
    fn gap_detection_requires_more_than_one_timeframe() {
        let a = MARKET_TZ.with_ymd_and_hms(2023, 11, 15, 9, 5, 0).single().unwrap().with_timezone(&Utc);
        let b_adjacent = a + ChronoDuration::minutes(5);
        let b_gap = a + ChronoDuration::minutes(15);
        assert!(!is_gap(a, b_adjacent, Timeframe::FiveMin));
        assert!(is_gap(a, b_gap, Timeframe::FiveMin));
    }
}
