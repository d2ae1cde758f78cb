//! `OpenStreetMap` Overpass API gateway.
//!
//! Buildings are OSM ways tagged `building=*`. Queries are sent as
//! Overpass QL in a form-encoded `POST` to the interpreter endpoint and
//! requested with `out meta geom`, which includes the way's bounds,
//! geometry, version, and timestamp.
//!
//! See <https://wiki.openstreetmap.org/wiki/Overpass_API/Overpass_QL>

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use building_queue_area_models::{BoundingBox, Coordinate};
use building_queue_gateway_models::BuildingRecord;
use chrono::{DateTime, Utc};

use crate::retry::{self, RetryPolicy};
use crate::service_registry::{GatewayService, ProviderConfig};
use crate::{GatewayError, SpatialGateway};

/// Extra client-side slack on top of the server-side `[timeout:N]`.
const CLIENT_TIMEOUT_SLACK_SECS: u64 = 10;

/// Overpass interpreter client.
#[derive(Debug, Clone)]
pub struct OverpassGateway {
    client: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OverpassGateway {
    /// Creates a gateway for the interpreter at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("building_queue/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(timeout_secs + CLIENT_TIMEOUT_SLACK_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout_secs,
            retry: RetryPolicy::new(max_retries),
        })
    }

    /// Creates a gateway from a registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Http`] if the HTTP client cannot be built.
    pub fn from_service(service: &GatewayService) -> Result<Self, GatewayError> {
        match &service.provider {
            ProviderConfig::Overpass {
                base_url,
                timeout_secs,
                max_retries,
            } => Self::new(base_url.clone(), *timeout_secs, *max_retries),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[allow(clippy::future_not_send)]
    async fn execute(&self, query: &str) -> Result<Vec<BuildingRecord>, GatewayError> {
        log::debug!("Overpass query against {}:\n{query}", self.base_url);

        let body = retry::send_json(
            || {
                self.client
                    .post(&self.base_url)
                    .form(&[("data", query)])
            },
            &self.retry,
        )
        .await?;

        let records = parse_response(&body)?;
        log::debug!("Overpass returned {} buildings", records.len());
        Ok(records)
    }
}

#[async_trait]
impl SpatialGateway for OverpassGateway {
    async fn query_radius(
        &self,
        center: Coordinate,
        radius_m: f64,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = format!(
            "(around:{radius_m:.1},{:.7},{:.7})",
            center.latitude, center.longitude
        );
        let query = build_query(self.timeout_secs, &filter, limit, skip_existing_tag);
        self.execute(&query).await
    }

    async fn query_bounding_box(
        &self,
        bounds: BoundingBox,
        limit: usize,
        skip_existing_tag: Option<&str>,
    ) -> Result<Vec<BuildingRecord>, GatewayError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = format!(
            "({:.7},{:.7},{:.7},{:.7})",
            bounds.min_lat, bounds.min_lon, bounds.max_lat, bounds.max_lon
        );
        let query = build_query(self.timeout_secs, &filter, limit, skip_existing_tag);
        self.execute(&query).await
    }

    async fn query_by_id(&self, id: u64) -> Result<Option<BuildingRecord>, GatewayError> {
        let query = format!(
            "[out:json][timeout:{}];\nway({id});\nout meta geom;",
            self.timeout_secs
        );
        Ok(self.execute(&query).await?.into_iter().next())
    }
}

/// Builds an Overpass QL query for buildings matching a spatial filter.
fn build_query(
    timeout_secs: u64,
    spatial_filter: &str,
    limit: usize,
    skip_existing_tag: Option<&str>,
) -> String {
    let skip = skip_existing_tag
        .map(|tag| format!("[!\"{}\"]", escape_ql(tag)))
        .unwrap_or_default();

    format!(
        "[out:json][timeout:{timeout_secs}];\nway[\"building\"]{skip}{spatial_filter};\nout meta geom {limit};"
    )
}

/// Escapes a value for use inside a double-quoted Overpass QL string.
fn escape_ql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parses an Overpass JSON response into building records.
///
/// Elements without any usable position are skipped.
fn parse_response(body: &serde_json::Value) -> Result<Vec<BuildingRecord>, GatewayError> {
    let elements = body
        .get("elements")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| GatewayError::Parse {
            message: "Overpass response missing 'elements' array".to_string(),
        })?;

    let mut records = Vec::with_capacity(elements.len());
    for element in elements {
        match parse_element(element) {
            Some(record) => records.push(record),
            None => log::trace!("Skipping Overpass element without position: {element}"),
        }
    }
    Ok(records)
}

fn parse_element(element: &serde_json::Value) -> Option<BuildingRecord> {
    let id = element["id"].as_u64()?;

    let bounds = element.get("bounds").and_then(|b| {
        Some(BoundingBox::new(
            b["minlat"].as_f64()?,
            b["minlon"].as_f64()?,
            b["maxlat"].as_f64()?,
            b["maxlon"].as_f64()?,
        ))
    });

    let center = element
        .get("center")
        .and_then(parse_point)
        .or_else(|| bounds.as_ref().map(BoundingBox::center))
        .or_else(|| parse_point(element))
        .or_else(|| geometry_centroid(element))?;

    let tags: BTreeMap<String, String> = element
        .get("tags")
        .and_then(serde_json::Value::as_object)
        .map(|tags| {
            tags.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    let version = element["version"]
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0);

    let last_modified = element["timestamp"]
        .as_str()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map_or(DateTime::<Utc>::UNIX_EPOCH, |ts| ts.with_timezone(&Utc));

    Some(BuildingRecord {
        id,
        center,
        bounds,
        tags,
        version,
        last_modified,
    })
}

fn parse_point(value: &serde_json::Value) -> Option<Coordinate> {
    Some(Coordinate::new(value["lat"].as_f64()?, value["lon"].as_f64()?))
}

#[allow(clippy::cast_precision_loss)]
fn geometry_centroid(element: &serde_json::Value) -> Option<Coordinate> {
    let points: Vec<Coordinate> = element
        .get("geometry")?
        .as_array()?
        .iter()
        .filter_map(parse_point)
        .collect();

    if points.is_empty() {
        return None;
    }

    let n = points.len() as f64;
    Some(Coordinate::new(
        points.iter().map(|p| p.latitude).sum::<f64>() / n,
        points.iter().map(|p| p.longitude).sum::<f64>() / n,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_radius_query_with_skip_filter() {
        let query = build_query(25, "(around:500.0,1.0000000,2.0000000)", 20, Some("roof:colour"));
        assert_eq!(
            query,
            "[out:json][timeout:25];\n\
             way[\"building\"][!\"roof:colour\"](around:500.0,1.0000000,2.0000000);\n\
             out meta geom 20;"
        );
    }

    #[test]
    fn builds_query_without_skip_filter() {
        let query = build_query(25, "(1,2,3,4)", 10, None);
        assert!(query.contains("way[\"building\"](1,2,3,4);"));
        assert!(query.ends_with("out meta geom 10;"));
    }

    #[test]
    fn escapes_quotes_in_tag() {
        assert_eq!(escape_ql("a\"b"), "a\\\"b");
    }

    #[test]
    fn parses_way_with_bounds() {
        let body = serde_json::json!({
            "elements": [{
                "type": "way",
                "id": 123_456,
                "bounds": { "minlat": 52.0, "minlon": 13.0, "maxlat": 52.002, "maxlon": 13.004 },
                "geometry": [
                    { "lat": 52.0, "lon": 13.0 },
                    { "lat": 52.002, "lon": 13.004 }
                ],
                "tags": { "building": "yes", "building:levels": "3" },
                "version": 4,
                "timestamp": "2023-11-02T08:15:00Z"
            }]
        });

        let records = parse_response(&body).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.id, 123_456);
        assert!((record.center.latitude - 52.001).abs() < 1e-9);
        assert!((record.center.longitude - 13.002).abs() < 1e-9);
        assert!(record.bounds.is_some());
        assert_eq!(record.tags.get("building:levels").map(String::as_str), Some("3"));
        assert_eq!(record.version, 4);
        assert_eq!(record.last_modified.to_rfc3339(), "2023-11-02T08:15:00+00:00");
    }

    #[test]
    fn falls_back_to_geometry_centroid() {
        let body = serde_json::json!({
            "elements": [{
                "id": 7,
                "geometry": [
                    { "lat": 1.0, "lon": 1.0 },
                    { "lat": 3.0, "lon": 5.0 }
                ]
            }]
        });
        let records = parse_response(&body).unwrap();
        assert!((records[0].center.latitude - 2.0).abs() < 1e-9);
        assert!((records[0].center.longitude - 3.0).abs() < 1e-9);
        assert!(records[0].bounds.is_none());
        assert_eq!(records[0].last_modified, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn skips_elements_without_position() {
        let body = serde_json::json!({ "elements": [{ "id": 1, "tags": {} }] });
        assert!(parse_response(&body).unwrap().is_empty());
    }

    #[test]
    fn rejects_response_without_elements() {
        let body = serde_json::json!({ "remark": "runtime error" });
        assert!(matches!(
            parse_response(&body),
            Err(GatewayError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn zero_limit_skips_network() {
        let gateway = OverpassGateway::new("http://127.0.0.1:9/api/interpreter", 5, 0).unwrap();
        let records = gateway
            .query_radius(Coordinate::new(0.0, 0.0), 100.0, 0, None)
            .await
            .unwrap();
        assert!(records.is_empty());
    }
}
