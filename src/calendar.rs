//! Calendar-day arithmetic in the cooperative's local zone
//!
//! Reminder offsets, the idempotence key and rendered due dates all speak in
//! local calendar days, while the store keeps UTC timestamps.

use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCalendar {
    offset: FixedOffset,
}

impl LocalCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Local calendar date of an instant
    pub fn date_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        self.date_of(now)
    }

    /// `[start, end)` in UTC covering the whole local day
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.start_of(date);
        let end = date
            .checked_add_days(Days::new(1))
            .map(|next| self.start_of(next))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (start, end)
    }

    /// Shift a date by a signed number of days
    pub fn shift(date: NaiveDate, days: i64) -> Option<NaiveDate> {
        if days >= 0 {
            date.checked_add_days(Days::new(days as u64))
        } else {
            date.checked_sub_days(Days::new(days.unsigned_abs()))
        }
    }

    /// `DD/MM/YYYY` in the local zone
    pub fn format_date(&self, instant: DateTime<Utc>) -> String {
        self.date_of(instant).format("%d/%m/%Y").to_string()
    }

    fn start_of(&self, date: NaiveDate) -> DateTime<Utc> {
        // A fixed offset has exactly one local midnight per day
        self.offset
            .from_local_datetime(&date.and_time(NaiveTime::MIN))
            .single()
            .map(|local| local.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
    }
}

impl Default for LocalCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jakarta() -> LocalCalendar {
        LocalCalendar::new(FixedOffset::east_opt(7 * 3600).unwrap())
    }

    #[test]
    fn test_date_of_crosses_midnight() {
        // 20:00 UTC is already the next day in Jakarta
        let instant = Utc.with_ymd_and_hms(2024, 3, 10, 20, 0, 0).unwrap();
        assert_eq!(
            jakarta().date_of(instant),
            NaiveDate::from_ymd_opt(2024, 3, 11).unwrap()
        );
        assert_eq!(
            LocalCalendar::utc().date_of(instant),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
        );
    }

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 11).unwrap();
        let (start, end) = jakarta().day_bounds(date);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 10, 17, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 11, 17, 0, 0).unwrap());
    }

    #[test]
    fn test_shift_signed_days() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            LocalCalendar::shift(date, -1),
            NaiveDate::from_ymd_opt(2024, 2, 29)
        );
        assert_eq!(
            LocalCalendar::shift(date, 7),
            NaiveDate::from_ymd_opt(2024, 3, 8)
        );
    }

    #[test]
    fn test_format_date() {
        let instant = Utc.with_ymd_and_hms(2024, 12, 31, 18, 30, 0).unwrap();
        assert_eq!(jakarta().format_date(instant), "01/01/2025");
    }
}
