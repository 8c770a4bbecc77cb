//! The compiled Here query: a search area, the active service windows and an
//! optional route-type filter. Rendered as SQL with named parameters for
//! SQL-backed stores, evaluated structurally by [`MemoryStore`].
//!
//! [`MemoryStore`]: crate::schedule::MemoryStore

use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};

use crate::area::SearchArea;
use crate::error::Result;
use crate::models::RouteType;
use crate::schedule::window::{ServiceWindow, WindowSet};
use crate::schedule::{HereRow, ScheduleStore};

/// Row cap per query.
pub const DEFAULT_LIMIT: usize = 2000;

#[derive(Debug, Clone, PartialEq)]
pub struct HereQuery {
    pub area: SearchArea,
    pub windows: WindowSet,

    /// Empty means every route type.
    pub route_types: Vec<RouteType>,

    pub limit: usize,
}

impl HereQuery {
    pub fn new(area: SearchArea, windows: WindowSet, route_types: Vec<RouteType>) -> Self {
        Self {
            area,
            windows,
            route_types,
            limit: DEFAULT_LIMIT,
        }
    }

    /// Builds the windows for `now` and resolves their service IDs.
    pub async fn build(
        store: &dyn ScheduleStore,
        agencies: &[String],
        area: SearchArea,
        now: DateTime<Tz>,
        route_types: Vec<RouteType>,
    ) -> Result<Self> {
        let mut windows = WindowSet::build(now);
        windows.resolve_services(store, agencies).await?;
        Ok(Self::new(area, windows, route_types))
    }

    /// The window owning a row's agency, service and departure time.
    pub fn window_for(&self, row: &HereRow) -> Option<&ServiceWindow> {
        self.windows
            .owning(&row.agency_id, &row.service_id, row.departure_sec)
    }

    /// The row's departure on today's scale, `None` when no window owns it.
    pub fn sort_sec(&self, row: &HereRow) -> Option<i64> {
        self.window_for(row).map(|w| w.sort_sec(row.departure_sec))
    }

    pub fn route_type_allowed(&self, route_type: i32) -> bool {
        self.route_types.is_empty()
            || self.route_types.iter().any(|t| t.gtfs_code() == route_type)
    }

    /// Whether a row satisfies the predicate apart from ordering and limit.
    pub fn matches(&self, row: &HereRow) -> bool {
        self.area.contains(row.lat, row.lon)
            && self.route_type_allowed(row.route_type)
            && self.window_for(row).is_some()
    }

    pub fn sql(&self) -> String {
        let windows: Vec<&ServiceWindow> = self.windows.active().collect();

        let when = windows
            .iter()
            .map(|w| {
                format!(
                    "WHEN {} THEN departure_sec - ({})",
                    window_clause(w),
                    w.sec_offset
                )
            })
            .collect::<Vec<_>>()
            .join("\n\t\t\t\t");

        let within = windows
            .iter()
            .map(|w| format!("({})", window_clause(w)))
            .collect::<Vec<_>>()
            .join(" OR\n\t\t\t\t");

        let route_types = if self.route_types.is_empty() {
            String::new()
        } else {
            let codes = self
                .route_types
                .iter()
                .map(|t| t.gtfs_code().to_string())
                .collect::<Vec<_>>()
                .join(",");
            format!(" AND\n\t\t\troute_type IN ({codes})")
        };

        format!(
            "
		SELECT
			agency_id,
			route_id,
			stop_id,
			service_id,
			trip_id,
			departure_sec,

			stop_name,
			headsign,
			direction_id,
			ST_X(location) AS lat,
			ST_Y(location) AS lon,
			next_lat,
			next_lon,

			route_type,
			route_color,
			route_text_color,

			ST_DISTANCE(ST_GEOMFROMTEXT(:point_string, 4326), location) AS dist,

			CASE
				{when}
			END AS sort_sec

		FROM here

		WHERE
			ST_CONTAINS(ST_SETSRID(ST_MAKEPOLYGON(:line_string), 4326), location) AND
			(
				{within}
			){route_types}
		ORDER BY dist ASC, sort_sec ASC
		LIMIT :limit
	"
        )
    }

    /// Named parameters bound alongside [`HereQuery::sql`].
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("line_string".to_string(), self.area.line_string()),
            ("point_string".to_string(), self.area.point_string()),
        ];
        for w in self.windows.active() {
            let day = w.day.name();
            params.push((format!("{day}_departure_min"), w.min_sec.to_string()));
            params.push((format!("{day}_departure_max"), w.max_sec.to_string()));
        }
        params.push(("limit".to_string(), self.limit.to_string()));
        params
    }
}

fn window_clause(w: &ServiceWindow) -> String {
    let day = w.day.name();
    format!(
        "({services}) AND departure_sec BETWEEN :{day}_departure_min AND :{day}_departure_max",
        services = services_clause(&w.service_ids)
    )
}

/// One `agency_id = ... AND service_id IN (...)` group per agency, OR-ed.
fn services_clause(services: &BTreeMap<String, BTreeSet<String>>) -> String {
    if services.is_empty() {
        return "service_id IN ('')".to_string();
    }
    services
        .iter()
        .map(|(agency_id, ids)| {
            format!(
                "(agency_id = {} AND service_id IN ({}))",
                escape(agency_id),
                create_ids(ids)
            )
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Service IDs as the body of an `IN (...)` list. An empty list renders as
/// a single blank value so the clause stays valid.
pub fn create_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    let ids: Vec<String> = ids.into_iter().map(|id| escape(id)).collect();
    if ids.is_empty() {
        return "''".to_string();
    }
    ids.join(",")
}

/// Quotes an ID, doubling any embedded single quote.
pub fn escape(id: &str) -> String {
    let mut out = String::with_capacity(id.len() + 2);
    out.push('\'');
    for c in id.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
