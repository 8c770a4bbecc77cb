//! Which service IDs run on a given date.

use chrono::{NaiveDate, Weekday};
use std::collections::BTreeSet;

use crate::error::Result;
use crate::models::{ExceptionType, ServiceRouteDay, ServiceRouteException};
use crate::schedule::ScheduleStore;

pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Valid service IDs of an agency on `date`. An empty result means no
/// service that day and is not an error.
#[tracing::instrument(skip(store), fields(weekday = weekday_name(day)))]
pub async fn service_ids(
    store: &dyn ScheduleStore,
    agency_id: &str,
    day: Weekday,
    date: NaiveDate,
) -> Result<Vec<String>> {
    let days = store.service_days(agency_id, weekday_name(day)).await?;
    let exceptions = store.service_exceptions(agency_id, date).await?;

    Ok(resolve(&days, &exceptions, day, date).into_iter().collect())
}

/// Like [`service_ids`] but for one route, where the most recently started
/// calendar row supersedes older overlapping ones.
#[tracing::instrument(skip(store), fields(weekday = weekday_name(day)))]
pub async fn route_service_ids(
    store: &dyn ScheduleStore,
    agency_id: &str,
    route_id: &str,
    day: Weekday,
    date: NaiveDate,
) -> Result<Vec<String>> {
    let days = store.service_days(agency_id, weekday_name(day)).await?;
    let exceptions = store.service_exceptions(agency_id, date).await?;

    Ok(resolve_for_route(&days, &exceptions, route_id, day, date)
        .into_iter()
        .collect())
}

/// `(base - removed) ∪ (added - removed)`.
pub fn resolve(
    days: &[ServiceRouteDay],
    exceptions: &[ServiceRouteException],
    day: Weekday,
    date: NaiveDate,
) -> BTreeSet<String> {
    let base = days
        .iter()
        .filter(|d| runs_on(d, day, date))
        .map(|d| d.service_id.clone());

    apply_exceptions(base, exceptions.iter().filter(|e| e.exception_date == date))
}

pub fn resolve_for_route(
    days: &[ServiceRouteDay],
    exceptions: &[ServiceRouteException],
    route_id: &str,
    day: Weekday,
    date: NaiveDate,
) -> BTreeSet<String> {
    let latest = days
        .iter()
        .filter(|d| d.route_id == route_id && runs_on(d, day, date))
        .max_by_key(|d| d.start_date)
        .map(|d| d.service_id.clone());

    apply_exceptions(
        latest,
        exceptions
            .iter()
            .filter(|e| e.route_id == route_id && e.exception_date == date),
    )
}

fn runs_on(row: &ServiceRouteDay, day: Weekday, date: NaiveDate) -> bool {
    row.day == weekday_name(day) && row.start_date <= date && date <= row.end_date
}

fn apply_exceptions<'a>(
    base: impl IntoIterator<Item = String>,
    exceptions: impl Iterator<Item = &'a ServiceRouteException> + Clone,
) -> BTreeSet<String> {
    let removed: BTreeSet<&str> = exceptions
        .clone()
        .filter(|e| e.exception_type == ExceptionType::Removed)
        .map(|e| e.service_id.as_str())
        .collect();

    let added = exceptions
        .filter(|e| e.exception_type == ExceptionType::Added)
        .map(|e| e.service_id.clone());

    base.into_iter()
        .chain(added)
        .filter(|id| !removed.contains(id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn day_row(
        route: &str,
        service: &str,
        day: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ServiceRouteDay {
        ServiceRouteDay {
            agency_id: "MTA NYCT".into(),
            route_id: route.into(),
            service_id: service.into(),
            day: day.into(),
            start_date: start,
            end_date: end,
        }
    }

    fn exception(
        route: &str,
        service: &str,
        on: NaiveDate,
        kind: ExceptionType,
    ) -> ServiceRouteException {
        ServiceRouteException {
            agency_id: "MTA NYCT".into(),
            route_id: route.into(),
            service_id: service.into(),
            exception_date: on,
            exception_type: kind,
        }
    }

    #[test]
    fn test_weekday_within_range() {
        let days = vec![
            day_row("1", "WKD", "wednesday", date(2024, 1, 1), date(2024, 12, 31)),
            day_row("1", "SAT", "saturday", date(2024, 1, 1), date(2024, 12, 31)),
            day_row("1", "OLD", "wednesday", date(2023, 1, 1), date(2023, 12, 31)),
        ];

        let ids = resolve(&days, &[], Weekday::Wed, date(2024, 3, 6));
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["WKD"]);
    }

    #[test]
    fn test_boundary_dates_are_inclusive() {
        let days = vec![day_row("1", "WKD", "monday", date(2024, 1, 1), date(2024, 1, 8))];
        assert_eq!(resolve(&days, &[], Weekday::Mon, date(2024, 1, 1)).len(), 1);
        assert_eq!(resolve(&days, &[], Weekday::Mon, date(2024, 1, 8)).len(), 1);
    }

    #[test]
    fn test_exceptions_add_and_remove() {
        let on = date(2024, 7, 4);
        let days = vec![day_row("1", "WKD", "thursday", date(2024, 1, 1), date(2024, 12, 31))];
        let exceptions = vec![
            exception("1", "WKD", on, ExceptionType::Removed),
            exception("1", "HOL", on, ExceptionType::Added),
            exception("1", "HOL", date(2024, 7, 5), ExceptionType::Removed),
        ];

        let ids = resolve(&days, &exceptions, Weekday::Thu, on);
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["HOL"]);
    }

    #[test]
    fn test_removed_wins_over_added() {
        let on = date(2024, 7, 4);
        let exceptions = vec![
            exception("1", "X", on, ExceptionType::Added),
            exception("1", "X", on, ExceptionType::Removed),
        ];
        assert!(resolve(&[], &exceptions, Weekday::Thu, on).is_empty());
    }

    #[test]
    fn test_route_variant_keeps_latest_start() {
        let days = vec![
            day_row("1", "WINTER", "friday", date(2024, 1, 1), date(2024, 12, 31)),
            day_row("1", "SPRING", "friday", date(2024, 3, 1), date(2024, 12, 31)),
            day_row("2", "OTHER", "friday", date(2024, 6, 1), date(2024, 12, 31)),
        ];

        let ids = resolve_for_route(&days, &[], "1", Weekday::Fri, date(2024, 3, 8));
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec!["SPRING"]);
    }

    #[tokio::test]
    async fn test_route_service_ids_from_store() {
        let mut store = MemoryStore::new();
        for (route, service, start) in [
            ("1", "WINTER", date(2024, 1, 1)),
            ("1", "SPRING", date(2024, 3, 1)),
            ("2", "OTHER", date(2024, 6, 1)),
        ] {
            let end = date(2024, 12, 31);
            store.insert_service_day(day_row(route, service, "friday", start, end));
        }
        store.insert_exception(exception("1", "EXTRA", date(2024, 3, 8), ExceptionType::Added));
        store.insert_exception(exception("2", "EXTRA2", date(2024, 3, 8), ExceptionType::Added));

        let friday = date(2024, 3, 8);
        let ids = route_service_ids(&store, "MTA NYCT", "1", Weekday::Fri, friday)
            .await
            .unwrap();
        assert_eq!(ids, vec!["EXTRA", "SPRING"]);

        let other_agency = route_service_ids(&store, "Other", "1", Weekday::Fri, friday)
            .await
            .unwrap();
        assert!(other_agency.is_empty());

        // No thursday rows
        let thursday = route_service_ids(&store, "MTA NYCT", "1", Weekday::Thu, date(2024, 3, 7))
            .await
            .unwrap();
        assert!(thursday.is_empty());
    }

    #[test]
    fn test_route_variant_ignores_other_route_exceptions() {
        let on = date(2024, 3, 8);
        let days = vec![day_row("1", "WKD", "friday", date(2024, 1, 1), date(2024, 12, 31))];
        let exceptions = vec![exception("2", "WKD", on, ExceptionType::Removed)];

        assert_eq!(resolve_for_route(&days, &exceptions, "1", Weekday::Fri, on).len(), 1);
    }
}
