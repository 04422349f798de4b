use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDate, Utc};

fn at_local_hour(date: NaiveDate, hour: u8, offset: &FixedOffset) -> Option<DateTime<Utc>> {
    date.and_hms_opt(u32::from(hour), 0, 0)?
        .and_local_timezone(*offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `hour:00` local time on the local day after `now`.
pub fn next_daily_slot(now: DateTime<Utc>, hour: u8, offset: &FixedOffset) -> DateTime<Utc> {
    now.with_timezone(offset)
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|tomorrow| at_local_hour(tomorrow, hour, offset))
        .unwrap_or(now + Duration::days(1))
}

/// The first `hour:00` local time strictly after `now`: today if still ahead,
/// otherwise tomorrow.
pub fn next_occurrence(now: DateTime<Utc>, hour: u8, offset: &FixedOffset) -> DateTime<Utc> {
    let today = now.with_timezone(offset).date_naive();
    match at_local_hour(today, hour, offset) {
        Some(slot) if slot > now => slot,
        _ => next_daily_slot(now, hour, offset),
    }
}
