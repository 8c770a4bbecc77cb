use anyhow::{Context, Result, bail};
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LiveCache;
use crate::fetch::{BasicClient, HttpClient};
use crate::fetch::auth::{ApiKey, UrlParam};
use crate::models::RouteType;
use crate::partners::{GtfsRtPartner, Partner, PartnerRegistry};

/// Where a feed's API key goes. The key itself is read from the
/// environment variable named by `key_env`, never from the file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PartnerAuth {
    Header { name: String, key_env: String },
    Bearer { key_env: String },
    Query { param: String, key_env: String },
}

impl PartnerAuth {
    fn key_env(&self) -> &str {
        match self {
            PartnerAuth::Header { key_env, .. }
            | PartnerAuth::Bearer { key_env }
            | PartnerAuth::Query { key_env, .. } => key_env,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PartnerEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub agency_id: String,
    pub route_types: Vec<RouteType>,
    pub feed_url: String,
    #[serde(default)]
    pub auth: Option<PartnerAuth>,
}

/// The partner table, stored as a JSON list:
/// ```json
/// [
///   {
///     "agency_id": "MTA NYCT",
///     "route_types": ["bus"],
///     "feed_url": "https://gtfsrt.prod.obanyc.com/tripUpdates",
///     "auth": { "type": "query", "param": "key", "key_env": "MTA_BUS_KEY" }
///   }
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartnersConfig {
    pub entries: Vec<PartnerEntry>,
}

impl PartnersConfig {
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading partners file {path}"))?;
        Self::from_json(&content).with_context(|| format!("parsing partners file {path}"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let entries: Vec<PartnerEntry> = serde_json::from_str(content)?;
        for entry in &entries {
            if entry.route_types.is_empty() {
                bail!("partner for {} lists no route types", entry.agency_id);
            }
        }
        Ok(Self { entries })
    }

    /// Builds one [`GtfsRtPartner`] per entry, sharing `cache`. `lookup`
    /// resolves `key_env` names, normally to `std::env::var`.
    pub fn build_registry<F>(
        &self,
        cache: Arc<dyn LiveCache>,
        tz: Tz,
        timeout: Duration,
        lookup: F,
    ) -> Result<PartnerRegistry>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = PartnerRegistry::new();

        for entry in &self.entries {
            let name = entry
                .name
                .clone()
                .unwrap_or_else(|| format!("{} gtfs-rt", entry.agency_id));
            let client = BasicClient::with_timeout(timeout)?;

            let url = &entry.feed_url;
            let partner = match &entry.auth {
                None => gtfs_rt(&name, client, cache.clone(), url, tz),
                Some(auth) => {
                    let key = lookup(auth.key_env()).with_context(|| {
                        format!("{} must be set for partner {name}", auth.key_env())
                    })?;
                    match auth {
                        PartnerAuth::Header { name: header, .. } => {
                            let client = ApiKey::new(client, header, &key)?;
                            gtfs_rt(&name, client, cache.clone(), url, tz)
                        }
                        PartnerAuth::Bearer { .. } => {
                            gtfs_rt(&name, ApiKey::bearer(client, &key)?, cache.clone(), url, tz)
                        }
                        PartnerAuth::Query { param, .. } => {
                            let client = UrlParam {
                                inner: client,
                                param_name: param.clone(),
                                key,
                            };
                            gtfs_rt(&name, client, cache.clone(), url, tz)
                        }
                    }
                }
            };

            for route_type in &entry.route_types {
                registry.register(&entry.agency_id, *route_type, partner.clone());
            }
        }

        Ok(registry)
    }
}

fn gtfs_rt<C: HttpClient + 'static>(
    name: &str,
    client: C,
    cache: Arc<dyn LiveCache>,
    feed_url: &str,
    tz: Tz,
) -> Arc<dyn Partner> {
    Arc::new(GtfsRtPartner::new(name, client, cache, feed_url, tz))
}
