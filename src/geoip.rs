use std::net::IpAddr;
use std::time::Duration;

use dashmap::DashMap;
use log::warn;
use serde::Deserialize;

use crate::models::GeoAttribution;

/// In-memory GeoIP cache entry. `Failed` is a negative-cache sentinel so a
/// transient lookup failure for a scanning source does not re-trigger an
/// outbound call on every subsequent event from the same address.
#[derive(Clone)]
enum CacheEntry {
    Resolved(ResolvedGeo),
    Failed,
}

#[derive(Clone)]
struct ResolvedGeo {
    country: String,
    city: String,
    region: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: String,
    isp: String,
    org: String,
}

impl From<&ResolvedGeo> for GeoAttribution {
    fn from(g: &ResolvedGeo) -> Self {
        GeoAttribution {
            country: g.country.clone(),
            city: g.city.clone(),
            region: g.region.clone(),
            latitude: g.latitude,
            longitude: g.longitude,
            timezone: g.timezone.clone(),
            isp: g.isp.clone(),
            org: g.org.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    country_name: Option<String>,
    city: Option<String>,
    region: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    timezone: Option<String>,
    org: Option<String>,
}

/// GeoIP enricher: private-range shortcut, read-mostly cache, bounded
/// best-effort external lookup. Never raises — every path resolves to an
/// attribution tuple.
pub struct GeoIpEnricher {
    cache: DashMap<String, CacheEntry>,
    client: reqwest::Client,
    lookup_url_template: String,
}

impl GeoIpEnricher {
    pub fn new(lookup_url_template: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            cache: DashMap::new(),
            client,
            lookup_url_template,
        }
    }

    /// Resolves attribution for `ip`. Bypasses the cache and the outbound
    /// call entirely for private/loopback ranges.
    pub async fn enrich(&self, ip: &str) -> GeoAttribution {
        if is_private_or_loopback(ip) {
            return GeoAttribution::private_network();
        }

        if let Some(entry) = self.cache.get(ip) {
            return match entry.value() {
                CacheEntry::Resolved(g) => g.into(),
                CacheEntry::Failed => GeoAttribution::unknown(),
            };
        }

        match self.lookup(ip).await {
            Some(resolved) => {
                let attribution = GeoAttribution::from(&resolved);
                self.cache.insert(ip.to_string(), CacheEntry::Resolved(resolved));
                attribution
            }
            None => {
                self.cache.insert(ip.to_string(), CacheEntry::Failed);
                GeoAttribution::unknown()
            }
        }
    }

    async fn lookup(&self, ip: &str) -> Option<ResolvedGeo> {
        let url = self.lookup_url_template.replace("{ip}", ip);

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!("GeoIP lookup error for {ip}: {e}");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("GeoIP lookup failed for {ip}: {}", response.status());
            return None;
        }

        match response.json::<LookupResponse>().await {
            Ok(body) => Some(ResolvedGeo {
                country: body.country_name.unwrap_or_else(|| "Unknown".to_string()),
                city: body.city.unwrap_or_else(|| "Unknown".to_string()),
                region: body.region.unwrap_or_else(|| "Unknown".to_string()),
                latitude: body.latitude,
                longitude: body.longitude,
                timezone: body.timezone.unwrap_or_else(|| "Unknown".to_string()),
                // The upstream lookup service only reports one organization
                // field; it is mirrored into both isp and org, matching the
                // source this enricher was ported from.
                isp: body.org.clone().unwrap_or_else(|| "Unknown".to_string()),
                org: body.org.unwrap_or_else(|| "Unknown".to_string()),
            }),
            Err(e) => {
                warn!("GeoIP response parse error for {ip}: {e}");
                None
            }
        }
    }
}

/// 10/8, 172.16/12, 192.168/16, 127/8. Unparseable strings are treated as
/// not-private so they still go through the (best-effort) lookup path.
fn is_private_or_loopback(ip: &str) -> bool {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let o = v4.octets();
            o[0] == 10
                || o[0] == 127
                || (o[0] == 172 && (16..=31).contains(&o[1]))
                || (o[0] == 192 && o[1] == 168)
        }
        Ok(IpAddr::V6(v6)) => v6.is_loopback(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_private_ranges() {
        assert!(is_private_or_loopback("10.0.0.5"));
        assert!(is_private_or_loopback("192.168.1.5"));
        assert!(is_private_or_loopback("172.16.0.1"));
        assert!(is_private_or_loopback("172.31.255.255"));
        assert!(is_private_or_loopback("127.0.0.1"));
        assert!(!is_private_or_loopback("172.32.0.1"));
        assert!(!is_private_or_loopback("8.8.8.8"));
    }

    #[actix_rt::test]
    async fn private_ip_never_hits_network() {
        let enricher = GeoIpEnricher::new(
            "http://127.0.0.1:1/json/{ip}".to_string(),
            Duration::from_millis(50),
        );
        let geo = enricher.enrich("192.168.1.5").await;
        assert_eq!(geo.country, "Private Network");
        assert_eq!(geo.city, "Local");
    }
}
