//! Stitches "now" into up to three service-day windows.
//!
//! Trips that start late yesterday run past midnight with `departure_sec`
//! above one day, and trips of tomorrow's service day start near zero. Each
//! window keeps departures in its own service day's seconds; `sec_offset`
//! moves them onto today's scale for sorting.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Weekday};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::schedule::ScheduleStore;
use crate::schedule::calendar;

/// How far ahead of "now" departures are considered.
pub const LOOKAHEAD_SECS: i64 = 3 * 3600;

pub const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowDay {
    Yesterday,
    Today,
    Tomorrow,
}

impl WindowDay {
    pub fn name(self) -> &'static str {
        match self {
            WindowDay::Yesterday => "yesterday",
            WindowDay::Today => "today",
            WindowDay::Tomorrow => "tomorrow",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceWindow {
    pub day: WindowDay,

    /// Service IDs running on this window's date, per agency.
    pub service_ids: BTreeMap<String, BTreeSet<String>>,

    /// Inclusive `departure_sec` range; both are -1 when inactive.
    pub min_sec: i64,
    pub max_sec: i64,

    /// Midnight of this window's service day.
    pub base: DateTime<Tz>,

    /// `today.base - self.base` in seconds.
    pub sec_offset: i64,
}

impl ServiceWindow {
    fn new(day: WindowDay, base: DateTime<Tz>, today: DateTime<Tz>) -> Self {
        Self {
            day,
            service_ids: BTreeMap::new(),
            min_sec: -1,
            max_sec: -1,
            base,
            sec_offset: (today - base).num_seconds(),
        }
    }

    fn with_range(mut self, min_sec: i64, lookahead: i64) -> Self {
        self.min_sec = min_sec;
        self.max_sec = min_sec + lookahead;
        self
    }

    pub fn is_active(&self) -> bool {
        self.min_sec >= 0 && self.max_sec >= 0
    }

    fn deactivate(&mut self) {
        self.min_sec = -1;
        self.max_sec = -1;
    }

    pub fn overlaps(&self, other: &ServiceWindow) -> bool {
        self.is_active()
            && other.is_active()
            && self.min_sec <= other.max_sec
            && other.min_sec <= self.max_sec
    }

    pub fn insert_services(
        &mut self,
        agency_id: &str,
        service_ids: impl IntoIterator<Item = String>,
    ) {
        self.service_ids
            .entry(agency_id.to_string())
            .or_default()
            .extend(service_ids);
    }

    pub fn runs(&self, agency_id: &str, service_id: &str) -> bool {
        self.service_ids
            .get(agency_id)
            .is_some_and(|ids| ids.contains(service_id))
    }

    pub fn contains(&self, agency_id: &str, service_id: &str, departure_sec: i64) -> bool {
        self.is_active()
            && self.min_sec <= departure_sec
            && departure_sec <= self.max_sec
            && self.runs(agency_id, service_id)
    }

    /// `departure_sec` on today's scale.
    pub fn sort_sec(&self, departure_sec: i64) -> i64 {
        departure_sec - self.sec_offset
    }

    pub fn date(&self) -> NaiveDate {
        self.base.date_naive()
    }

    pub fn weekday(&self) -> Weekday {
        self.base.weekday()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowSet {
    pub yesterday: ServiceWindow,
    pub today: ServiceWindow,
    pub tomorrow: ServiceWindow,
}

impl WindowSet {
    pub fn build(now: DateTime<Tz>) -> Self {
        Self::build_with_lookahead(now, LOOKAHEAD_SECS)
    }

    pub fn build_with_lookahead(now: DateTime<Tz>, lookahead: i64) -> Self {
        let tz = now.timezone();
        let date = now.date_naive();
        let today_base = start_of_day(tz, date);
        let yesterday_base = start_of_day(tz, date.pred_opt().unwrap_or(date));
        let tomorrow_base = start_of_day(tz, date.succ_opt().unwrap_or(date));

        let now_sec = (now - today_base).num_seconds();

        let today = ServiceWindow::new(WindowDay::Today, today_base, today_base)
            .with_range(now_sec, lookahead);

        let yesterday_offset = (today_base - yesterday_base).num_seconds();
        let mut yesterday = ServiceWindow::new(WindowDay::Yesterday, yesterday_base, today_base)
            .with_range(now_sec + yesterday_offset, lookahead);

        let mut tomorrow = ServiceWindow::new(WindowDay::Tomorrow, tomorrow_base, today_base)
            .with_range(0, lookahead);

        if yesterday.overlaps(&today) {
            yesterday.deactivate();
        }
        if tomorrow.overlaps(&today) {
            tomorrow.deactivate();
        }
        if today.min_sec > lookahead {
            yesterday.deactivate();
        }
        if today.max_sec < SECS_PER_DAY {
            tomorrow.deactivate();
        }

        Self {
            yesterday,
            today,
            tomorrow,
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &ServiceWindow> {
        [&self.yesterday, &self.today, &self.tomorrow]
            .into_iter()
            .filter(|w| w.is_active())
    }

    /// The active window a row belongs to, if any.
    pub fn owning(
        &self,
        agency_id: &str,
        service_id: &str,
        departure_sec: i64,
    ) -> Option<&ServiceWindow> {
        self.active()
            .find(|w| w.contains(agency_id, service_id, departure_sec))
    }

    /// Fills every active window with the service IDs each agency runs on
    /// the window's date.
    pub async fn resolve_services(
        &mut self,
        store: &dyn ScheduleStore,
        agencies: &[String],
    ) -> Result<()> {
        for window in [&mut self.yesterday, &mut self.today, &mut self.tomorrow] {
            if !window.is_active() {
                continue;
            }

            for agency_id in agencies {
                let ids =
                    calendar::service_ids(store, agency_id, window.weekday(), window.date())
                        .await?;
                window.insert_services(agency_id, ids);
            }

            tracing::debug!(
                window = window.day.name(),
                date = %window.date(),
                agencies = window.service_ids.len(),
                service_ids = window.service_ids.values().map(BTreeSet::len).sum::<usize>(),
                "Resolved window services"
            );
        }

        Ok(())
    }
}

/// Midnight at the start of `now`'s local day.
pub fn midnight(now: DateTime<Tz>) -> DateTime<Tz> {
    start_of_day(now.timezone(), now.date_naive())
}

/// The first instant of `date` in `tz`. When a DST jump skips local
/// midnight, the day starts where the gap ends.
pub fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::MIN);
    if let Some(start) = tz.from_local_datetime(&naive).earliest() {
        return start;
    }

    let before_gap = naive - Duration::hours(1);
    tz.from_local_datetime(&before_gap)
        .earliest()
        .map(|t| t + Duration::hours(1))
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        chrono_tz::UTC.with_ymd_and_hms(2024, 3, 6, h, m, 0).unwrap()
    }

    fn ids(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_after_midnight_keeps_yesterday() {
        let windows = WindowSet::build(at(1, 0));

        assert!(windows.yesterday.is_active());
        assert_eq!(windows.yesterday.min_sec, 90_000);
        assert_eq!(windows.yesterday.max_sec, 100_800);
        assert_eq!(windows.yesterday.sec_offset, SECS_PER_DAY);
        assert_eq!(windows.yesterday.weekday(), Weekday::Tue);

        assert_eq!((windows.today.min_sec, windows.today.max_sec), (3_600, 14_400));

        // [0, 10800] overlaps today's [3600, 14400]
        assert!(!windows.tomorrow.is_active());
    }

    #[test]
    fn test_midday_uses_today_only() {
        let windows = WindowSet::build(at(12, 0));

        assert!(!windows.yesterday.is_active());
        assert!(windows.today.is_active());
        assert!(!windows.tomorrow.is_active());
        assert_eq!(windows.active().count(), 1);
        assert_eq!(windows.today.min_sec, 43_200);
    }

    #[test]
    fn test_late_evening_adds_tomorrow() {
        let windows = WindowSet::build(at(23, 0));

        assert!(!windows.yesterday.is_active());
        assert!(windows.tomorrow.is_active());
        assert_eq!((windows.tomorrow.min_sec, windows.tomorrow.max_sec), (0, 10_800));
        assert_eq!(windows.tomorrow.sec_offset, -SECS_PER_DAY);
        assert_eq!(windows.tomorrow.date(), NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());

        // 00:30 tomorrow sorts after 23:30 today
        assert!(windows.tomorrow.sort_sec(1_800) > windows.today.sort_sec(84_600));
    }

    #[test]
    fn test_yesterday_sort_sec_lands_on_today_scale() {
        let windows = WindowSet::build(at(1, 0));
        assert_eq!(windows.yesterday.sort_sec(90_600), 4_200);
    }

    #[test]
    fn test_owning_window_requires_service_id() {
        let mut windows = WindowSet::build(at(1, 0));
        windows.yesterday.insert_services("MTA NYCT", ids(&["TUE"]));
        windows.today.insert_services("MTA NYCT", ids(&["WED"]));

        let owner = |service: &str, sec| windows.owning("MTA NYCT", service, sec).map(|w| w.day);
        assert_eq!(owner("TUE", 91_000), Some(WindowDay::Yesterday));
        assert_eq!(owner("WED", 4_000), Some(WindowDay::Today));
        assert!(owner("WED", 91_000).is_none());
        assert!(owner("TUE", 200_000).is_none());
    }

    #[test]
    fn test_service_ids_scoped_by_agency() {
        let mut windows = WindowSet::build(at(12, 0));
        windows.today.insert_services("A", ids(&["WKD"]));
        windows.today.insert_services("B", ids(&["SAT"]));

        assert!(windows.owning("A", "WKD", 43_500).is_some());
        assert!(windows.owning("B", "WKD", 43_500).is_none());
        assert!(windows.owning("C", "WKD", 43_500).is_none());
        assert!(windows.today.runs("B", "SAT"));
    }

    #[test]
    fn test_midnight_truncates() {
        let now = chrono_tz::UTC
            .with_ymd_and_hms(2024, 3, 6, 17, 45, 12)
            .unwrap()
            + Duration::milliseconds(250);
        assert_eq!(midnight(now), at(0, 0));
    }

    #[test]
    fn test_spring_forward_keeps_local_date() {
        let tz = chrono_tz::America::New_York;
        let now = tz.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let windows = WindowSet::build(now);

        assert_eq!(windows.today.base, tz.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(windows.today.weekday(), Weekday::Sun);
        assert_eq!(windows.today.date(), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());

        // 02:00-03:00 never happened: 11 hours since midnight
        assert_eq!(windows.today.min_sec, 11 * 3600);
        assert_eq!(windows.today.base + Duration::seconds(windows.today.min_sec), now);
    }

    #[test]
    fn test_day_after_spring_forward_has_short_yesterday() {
        let tz = chrono_tz::America::New_York;
        let windows = WindowSet::build(tz.with_ymd_and_hms(2024, 3, 11, 1, 0, 0).unwrap());

        assert_eq!(windows.yesterday.weekday(), Weekday::Sun);
        assert_eq!(windows.yesterday.sec_offset, 23 * 3600);
        assert_eq!(windows.yesterday.min_sec, 3_600 + 23 * 3600);
        assert_eq!(windows.yesterday.sort_sec(windows.yesterday.min_sec), 3_600);
    }

    #[test]
    fn test_fall_back_midnight_is_unambiguous() {
        let tz = chrono_tz::America::New_York;
        let now = tz.with_ymd_and_hms(2024, 11, 3, 18, 30, 0).unwrap();

        let base = midnight(now);
        assert_eq!(base.date_naive(), NaiveDate::from_ymd_opt(2024, 11, 3).unwrap());
        assert_eq!(base.hour(), 0);
        // 25-hour day
        assert_eq!((now - base).num_seconds(), 19 * 3600 + 1800);
    }

    #[test]
    fn test_start_of_day_when_midnight_is_skipped() {
        // Santiago sprang forward at 00:00 on 2022-09-11
        let tz = chrono_tz::America::Santiago;
        let date = NaiveDate::from_ymd_opt(2022, 9, 11).unwrap();

        let start = start_of_day(tz, date);
        assert_eq!(start.date_naive(), date);
        assert_eq!(start.hour(), 1);
    }
}
