use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone};
use chrono_tz::Tz;
use nearby_transit::area::SearchArea;
use nearby_transit::error::NearbyError;
use nearby_transit::fusion::FusionConfig;
use nearby_transit::here::{HereRequest, HereResponse, NearbyService};
use nearby_transit::models::{Departure, RouteType, Vehicle};
use nearby_transit::partners::{LiveData, Partner, PartnerRegistry, RouteDirection};
use nearby_transit::schedule::MemoryStore;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn now() -> DateTime<Tz> {
    // A Wednesday
    chrono_tz::UTC.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()
}

/// Reports trip "T2", a live ID the schedule only knows as "B-T2".
struct BusFeed {
    calls: AtomicUsize,
}

#[async_trait]
impl Partner for BusFeed {
    fn name(&self) -> &str {
        "bus feed"
    }

    async fn precache(&self, _route: &RouteDirection) -> anyhow::Result<()> {
        Ok(())
    }

    async fn live(&self, route: &RouteDirection, stop_id: &str) -> anyhow::Result<LiveData> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(route.route_id, "B63");
        assert_eq!(stop_id, "B1");

        Ok(LiveData {
            departures: vec![Departure::live("T2", now() + Duration::minutes(50))],
            vehicles: vec![Vehicle {
                lat: 40.7480,
                lon: -73.9800,
                live: true,
            }],
        })
    }
}

fn service() -> (NearbyService, Arc<BusFeed>) {
    let store = MemoryStore::load_dir(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures"))
        .expect("Failed to load fixtures");

    let feed = Arc::new(BusFeed {
        calls: AtomicUsize::new(0),
    });
    let mut registry = PartnerRegistry::new();
    registry.register("MTA NYCT", RouteType::Bus, feed.clone());

    let service = NearbyService::new(
        Arc::new(store),
        registry,
        FusionConfig {
            workers: 2,
            ..Default::default()
        },
        vec!["MTA NYCT".to_string()],
        chrono_tz::UTC,
    );
    (service, feed)
}

fn request(filter: Option<String>) -> HereRequest {
    let area = SearchArea::from_bbox(40.745, -73.99, 40.760, -73.97, Some((40.7500, -73.9800)))
        .expect("valid area");
    HereRequest {
        area,
        route_types: Vec::new(),
        now: Some(now()),
        filter,
    }
}

fn stop_ids(response: &HereResponse) -> Vec<&str> {
    response.stops.iter().map(|s| s.stop_id.as_str()).collect()
}

fn minutes(d: &Departure) -> i64 {
    (d.time - now()).num_minutes()
}

#[tokio::test]
async fn test_here_end_to_end() {
    let (service, feed) = service();

    let response = service.here(request(None)).await.unwrap();

    // Subway sorts first although the bus stop is closer; B2 loses to B1
    assert_eq!(stop_ids(&response), vec!["S1", "B1"]);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 1);

    let subway = &response.stops[0];
    assert_eq!(
        subway
            .departures
            .iter()
            .map(|d| d.trip_id.as_str())
            .collect::<Vec<_>>(),
        vec!["S-E1", "S-T1", "S-T2", "S-T3", "S-T4"]
    );
    assert!(subway.departures.iter().all(|d| !d.live));
    assert!(subway.departures.iter().all(|d| d.compass_dir.abs() < 1.0));

    let bus = &response.stops[1];
    assert_eq!(bus.departures.len(), 2);
    assert_eq!(bus.departures[0].trip_id, "B-T2");
    assert!(bus.departures[0].live);
    assert_eq!(minutes(&bus.departures[0]), 50);
    assert_eq!(bus.departures[1].trip_id, "B-T3");
    assert_eq!(minutes(&bus.departures[1]), 70);
    assert_eq!(bus.vehicles.len(), 1);

    for stop in &response.stops {
        assert!(stop.departures.len() <= 5);
        assert!(stop.departures.windows(2).all(|w| w[0].time <= w[1].time));
    }

    let mut routes: Vec<_> = response.routes.iter().map(|r| r.unique_id.as_str()).collect();
    routes.sort();
    assert_eq!(routes, vec!["MTA NYCT|1", "MTA NYCT|B63"]);
    assert!(response.routes.iter().all(|r| !r.route_shapes.is_empty()));

    let mut trips: Vec<_> = response.trips.iter().map(|t| t.unique_id.as_str()).collect();
    trips.sort();
    assert_eq!(trips, vec!["MTA NYCT|B-T2", "MTA NYCT|S-E1"]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_second_request_omits_disclosed() {
    let (service, _feed) = service();

    let first = service.here(request(None)).await.unwrap();
    let second = service.here(request(Some(first.filter.clone()))).await.unwrap();

    assert_eq!(stop_ids(&second), vec!["S1", "B1"]);
    assert!(second.routes.is_empty());
    assert!(second.trips.is_empty());
    assert_eq!(second.stops[1].departures[0].trip_id, "B-T2");

    service.shutdown().await;
}

#[tokio::test]
async fn test_route_type_filter_skips_partners() {
    let (service, feed) = service();

    let mut req = request(None);
    req.route_types = vec![RouteType::Subway];
    let response = service.here(req).await.unwrap();

    assert_eq!(stop_ids(&response), vec!["S1"]);
    assert_eq!(feed.calls.load(Ordering::SeqCst), 0);

    service.shutdown().await;
}

#[tokio::test]
async fn test_weekend_calendar() {
    let (service, _feed) = service();

    let mut req = request(None);
    req.now = Some(chrono_tz::UTC.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap());
    let response = service.here(req).await.unwrap();

    // Saturday: only the B63 weekend trip runs
    assert_eq!(stop_ids(&response), vec!["B1"]);

    service.shutdown().await;
}

#[tokio::test]
async fn test_invalid_filter_token() {
    let (service, _feed) = service();

    let err = service
        .here(request(Some("definitely not a filter".into())))
        .await
        .unwrap_err();
    assert!(matches!(err, NearbyError::InvalidInput(_)));

    service.shutdown().await;
}

#[tokio::test]
async fn test_trip_detail() {
    let (service, _feed) = service();

    let trip = service
        .trip("MTA NYCT", "B63", "B-T1", None)
        .await
        .unwrap();
    assert_eq!(
        trip.stops.iter().map(|s| s.stop_id.as_str()).collect::<Vec<_>>(),
        vec!["B1", "B2"]
    );
    // No shape of its own: borrowed from the route
    assert_eq!(trip.shape_points.len(), 3);

    let subway = service
        .trip("MTA NYCT", "1", "unknown", Some("S-T1"))
        .await
        .unwrap();
    assert_eq!(subway.trip_id, "S-T1");
    assert_eq!(subway.shape_points[0].lat, 40.7530);

    let err = service
        .trip("MTA NYCT", "1", "unknown", None)
        .await
        .unwrap_err();
    assert!(matches!(err, NearbyError::NotFound(_)));

    service.shutdown().await;
}
