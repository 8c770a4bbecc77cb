use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::debug;

use crate::cache::LiveCache;
use crate::fetch::{HttpClient, fetch_bytes};
use crate::parser::{parse_feed, route_vehicles, stop_departures};
use crate::partners::{LiveData, Partner, RouteDirection};

/// A partner backed by one GTFS-Realtime protobuf feed. The raw feed bytes
/// are cached under the feed URL.
pub struct GtfsRtPartner<C> {
    name: String,
    client: C,
    cache: Arc<dyn LiveCache>,
    feed_url: String,
    tz: Tz,
}

impl<C: HttpClient> GtfsRtPartner<C> {
    pub fn new(name: &str, client: C, cache: Arc<dyn LiveCache>, feed_url: &str, tz: Tz) -> Self {
        Self {
            name: name.to_string(),
            client,
            cache,
            feed_url: feed_url.to_string(),
            tz,
        }
    }

    /// Downloads the feed and caches it once it decodes.
    async fn refresh(&self) -> Result<Vec<u8>> {
        let bytes = fetch_bytes(&self.client, &self.feed_url)
            .await
            .with_context(|| format!("fetching {}", self.feed_url))?;
        parse_feed(&bytes).with_context(|| format!("decoding {}", self.feed_url))?;

        debug!(partner = %self.name, bytes = bytes.len(), "Feed refreshed");
        self.cache.put(&self.feed_url, bytes.clone()).await;
        Ok(bytes)
    }
}

#[async_trait]
impl<C: HttpClient> Partner for GtfsRtPartner<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn precache(&self, route: &RouteDirection) -> Result<()> {
        self.refresh()
            .await
            .with_context(|| format!("precaching {route}"))?;
        Ok(())
    }

    async fn live(&self, route: &RouteDirection, stop_id: &str) -> Result<LiveData> {
        let bytes = match self.cache.get(&self.feed_url).await {
            Some(bytes) => bytes,
            None => {
                debug!(partner = %self.name, route = %route, "Live cache miss");
                self.refresh().await?
            }
        };

        let feed = parse_feed(&bytes).context("decoding cached feed")?;

        Ok(LiveData {
            departures: stop_departures(&feed, &route.route_id, stop_id, self.tz),
            vehicles: route_vehicles(&feed, &route.route_id, Some(route.direction_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::fetch::BasicClient;
    use crate::parser::tests::{feed, trip_entity, vehicle_entity};
    use prost::Message;
    use std::time::Duration;

    fn partner(url: &str) -> (GtfsRtPartner<BasicClient>, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new(Duration::from_secs(90)));
        let partner = GtfsRtPartner::new(
            "test-feed",
            BasicClient::new(),
            cache.clone(),
            url,
            chrono_tz::America::New_York,
        );
        (partner, cache)
    }

    #[tokio::test]
    async fn test_live_reads_cached_feed() {
        let (partner, cache) = partner("https://feeds.example/bus");
        let msg = feed(vec![
            trip_entity("B-T2", "B63", &[("B1", 1_709_726_700)]),
            vehicle_entity("V1", "B63", 0, 40.75),
            vehicle_entity("V2", "B63", 1, 40.76),
        ]);
        cache.put("https://feeds.example/bus", msg.encode_to_vec()).await;

        let live = partner
            .live(&RouteDirection::new("MTA NYCT", "B63", 0), "B1")
            .await
            .unwrap();

        assert_eq!(live.departures.len(), 1);
        assert_eq!(live.departures[0].time.timezone(), chrono_tz::America::New_York);
        assert_eq!(live.vehicles.len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_cache_entry_is_an_error() {
        let (partner, cache) = partner("https://feeds.example/bus");
        cache.put("https://feeds.example/bus", vec![0xFF, 0xFE, 0x00, 0x01]).await;

        let result = partner
            .live(&RouteDirection::new("MTA NYCT", "B63", 0), "B1")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_precache_reports_bad_url() {
        let (partner, cache) = partner("not a url");
        let err = partner
            .precache(&RouteDirection::new("MTA NYCT", "B63", 0))
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("MTA NYCT|B63|0"));
        assert!(cache.get("not a url").await.is_none());
    }
}
