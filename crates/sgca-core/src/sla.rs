//! SLA deadline calculator.
//!
//! Weekly SLA: Wednesday of the following week at 18:00.
//! Monthly SLA: three business days after the last day of the month at 18:00.
//! All deadlines are expressed in one civil timezone.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::{BusinessDay, YearMonth};

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Santiago;
pub const SLA_DEADLINE_HOUR: i64 = 18;
pub const MONTHLY_SLA_BUSINESS_DAYS: u32 = 3;
/// Days fetched past month end so the monthly deadline can spill over.
pub const CALENDAR_LOOKAHEAD_DAYS: i64 = 10;

/// Sparse business-day calendar. Days absent from the map fall back to
/// Monday–Friday.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusinessCalendar {
    days: BTreeMap<NaiveDate, bool>,
}

impl BusinessCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, day: NaiveDate, is_business_day: bool) {
        self.days.insert(day, is_business_day);
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn is_business_day(&self, day: NaiveDate) -> bool {
        match self.days.get(&day) {
            Some(flag) => *flag,
            None => !matches!(day.weekday(), Weekday::Sat | Weekday::Sun),
        }
    }

    /// Date reached after consuming `days` business days strictly after `start`.
    pub fn add_business_days(&self, start: NaiveDate, days: u32) -> NaiveDate {
        let mut current = start;
        let mut added = 0;
        while added < days {
            current += Duration::days(1);
            if self.is_business_day(current) {
                added += 1;
            }
        }
        current
    }
}

impl FromIterator<BusinessDay> for BusinessCalendar {
    fn from_iter<I: IntoIterator<Item = BusinessDay>>(iter: I) -> Self {
        Self {
            days: iter
                .into_iter()
                .map(|row| (row.day, row.is_business_day))
                .collect(),
        }
    }
}

/// Monday and Friday of the operational week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
    (monday, monday + Duration::days(4))
}

/// Every operational week (Monday..Friday) that overlaps the month.
pub fn weeks_in_month(month: YearMonth) -> Vec<(NaiveDate, NaiveDate)> {
    let first = month.first_day();
    let last = month.last_day();
    let (mut monday, _) = week_bounds(first);
    let mut weeks = Vec::new();
    while monday <= last {
        let friday = monday + Duration::days(4);
        if friday >= first {
            weeks.push((monday, friday));
        }
        monday += Duration::days(7);
    }
    weeks
}

/// `YYYY-Www` using the ISO year and week of the week's Friday.
pub fn weekly_period_code(week_friday: NaiveDate) -> String {
    let iso = week_friday.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

pub fn monthly_period_code(month: YearMonth) -> String {
    month.code()
}

/// Inclusive date window of business-calendar rows needed for `month`.
pub fn calendar_window(month: YearMonth) -> (NaiveDate, NaiveDate) {
    (
        month.first_day(),
        month.last_day() + Duration::days(CALENDAR_LOOKAHEAD_DAYS),
    )
}

/// Computes SLA deadlines in a fixed civil timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlineCalculator {
    tz: Tz,
}

impl Default for DeadlineCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEZONE)
    }
}

impl DeadlineCalculator {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Civil date of `instant` in the calculator's timezone.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    pub fn current_month(&self, instant: DateTime<Utc>) -> YearMonth {
        YearMonth::from_date(self.local_date(instant))
    }

    /// Wednesday after `week_friday` at 18:00. A Wednesday reference advances a
    /// full week, so the result is always strictly later than the reference.
    pub fn weekly_deadline(&self, week_friday: NaiveDate) -> DateTime<Tz> {
        let weekday = week_friday.weekday().num_days_from_monday() as i64;
        let mut days_until = (Weekday::Wed.num_days_from_monday() as i64 - weekday).rem_euclid(7);
        if days_until == 0 {
            days_until = 7;
        }
        self.at_deadline_hour(week_friday + Duration::days(days_until))
    }

    /// Last day of `month` plus three business days, at 18:00.
    pub fn monthly_deadline(&self, month: YearMonth, calendar: &BusinessCalendar) -> DateTime<Tz> {
        let day = calendar.add_business_days(month.last_day(), MONTHLY_SLA_BUSINESS_DAYS);
        self.at_deadline_hour(day)
    }

    fn at_deadline_hour(&self, day: NaiveDate) -> DateTime<Tz> {
        let naive: NaiveDateTime = day.and_time(NaiveTime::MIN) + Duration::hours(SLA_DEADLINE_HOUR);
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(at) => at,
            LocalResult::Ambiguous(earliest, _) => earliest,
            // Skipped local time: take the first valid instant after the gap.
            LocalResult::None => self
                .tz
                .from_local_datetime(&(naive + Duration::hours(1)))
                .earliest()
                .unwrap_or_else(|| self.tz.from_utc_datetime(&naive)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn local(y: i32, m: u32, day: u32, h: u32) -> NaiveDateTime {
        d(y, m, day).and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn week_bounds_span_monday_to_friday() {
        assert_eq!(week_bounds(d(2025, 1, 8)), (d(2025, 1, 6), d(2025, 1, 10)));
        assert_eq!(week_bounds(d(2025, 1, 6)), (d(2025, 1, 6), d(2025, 1, 10)));
        // Sunday belongs to the week that started six days earlier.
        assert_eq!(week_bounds(d(2025, 1, 12)), (d(2025, 1, 6), d(2025, 1, 10)));
    }

    #[test]
    fn weekly_deadline_is_next_wednesday_at_six_pm() {
        let calc = DeadlineCalculator::default();
        let deadline = calc.weekly_deadline(d(2025, 1, 10));
        assert_eq!(deadline.naive_local(), local(2025, 1, 15, 18));
        // Santiago is on summer time (UTC-3) in January.
        assert_eq!(
            deadline.with_timezone(&Utc).naive_utc(),
            local(2025, 1, 15, 21)
        );
    }

    #[test]
    fn weekly_deadline_from_a_wednesday_advances_a_full_week() {
        let calc = DeadlineCalculator::default();
        let deadline = calc.weekly_deadline(d(2025, 1, 15));
        assert_eq!(deadline.naive_local(), local(2025, 1, 22, 18));
    }

    #[test]
    fn weekly_deadline_never_lands_on_or_before_reference() {
        let calc = DeadlineCalculator::default();
        let mut day = d(2025, 3, 1);
        for _ in 0..60 {
            let deadline = calc.weekly_deadline(day);
            assert!(deadline.date_naive() > day, "deadline for {day} was {deadline}");
            day += Duration::days(1);
        }
    }

    #[test]
    fn monthly_deadline_counts_every_calendar_business_day() {
        let calc = DeadlineCalculator::default();
        let month = YearMonth::new(2025, 1).unwrap();
        let all_business: BusinessCalendar = (1..=10)
            .map(|day| BusinessDay {
                day: d(2025, 2, day),
                is_business_day: true,
            })
            .collect();
        let deadline = calc.monthly_deadline(month, &all_business);
        assert_eq!(deadline.naive_local(), local(2025, 2, 3, 18));
    }

    #[test]
    fn monthly_deadline_skips_the_weekend() {
        let calc = DeadlineCalculator::default();
        let month = YearMonth::new(2025, 1).unwrap();
        let deadline = calc.monthly_deadline(month, &BusinessCalendar::new());
        // Jan 31 is a Friday; Feb 1-2 are the weekend.
        assert_eq!(deadline.naive_local(), local(2025, 2, 5, 18));
    }

    #[test]
    fn monthly_deadline_honours_calendar_holidays() {
        let calc = DeadlineCalculator::default();
        let month = YearMonth::new(2025, 1).unwrap();
        let calendar: BusinessCalendar = [
            BusinessDay {
                day: d(2025, 2, 3),
                is_business_day: false,
            },
            // Calendar may also declare a weekend day as working.
            BusinessDay {
                day: d(2025, 2, 1),
                is_business_day: true,
            },
        ]
        .into_iter()
        .collect();
        let deadline = calc.monthly_deadline(month, &calendar);
        // Feb 1 (declared business), Feb 4, Feb 5.
        assert_eq!(deadline.naive_local(), local(2025, 2, 5, 18));
    }

    #[test]
    fn weeks_in_month_cover_overlapping_operational_weeks() {
        let january = weeks_in_month(YearMonth::new(2025, 1).unwrap());
        assert_eq!(january.len(), 5);
        assert_eq!(january[0], (d(2024, 12, 30), d(2025, 1, 3)));
        assert_eq!(january[4], (d(2025, 1, 27), d(2025, 1, 31)));

        // February 2025 starts on a Saturday: the week ending Jan 31 is excluded.
        let february = weeks_in_month(YearMonth::new(2025, 2).unwrap());
        assert_eq!(february.len(), 4);
        assert_eq!(february[0], (d(2025, 2, 3), d(2025, 2, 7)));
        assert_eq!(february[3], (d(2025, 2, 24), d(2025, 2, 28)));
    }

    #[test]
    fn period_codes_use_iso_week_and_month() {
        assert_eq!(weekly_period_code(d(2025, 1, 3)), "2025-W01");
        assert_eq!(weekly_period_code(d(2024, 12, 27)), "2024-W52");
        assert_eq!(monthly_period_code(YearMonth::new(2025, 3).unwrap()), "2025-03");
    }

    #[test]
    fn calendar_window_adds_lookahead() {
        let (start, end) = calendar_window(YearMonth::new(2025, 1).unwrap());
        assert_eq!(start, d(2025, 1, 1));
        assert_eq!(end, d(2025, 2, 10));
    }

    #[test]
    fn current_month_uses_local_civil_date() {
        let calc = DeadlineCalculator::default();
        // 02:00 UTC on Feb 1 is still Jan 31 in Santiago.
        let instant = Utc.with_ymd_and_hms(2025, 2, 1, 2, 0, 0).unwrap();
        assert_eq!(calc.current_month(instant), YearMonth::new(2025, 1).unwrap());
    }
}
