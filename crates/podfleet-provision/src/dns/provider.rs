//! Authoritative DNS provider contract and a PowerDNS HTTP API client.

use std::time::Duration;

use podfleet_core::models::dns::DnsRecordType;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

/// One record set as the provider sees it. Names are fully qualified,
/// without the trailing dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRecord {
    pub name: String,
    pub record_type: DnsRecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u32>,
}

pub trait DnsProvider: Send + Sync {
    /// Provider id of the zone named `zone_name`, if it exists.
    fn find_zone(
        &self,
        zone_name: &str,
    ) -> impl Future<Output = ProvisionResult<Option<String>>> + Send;
    /// Create the zone and return its provider id.
    fn create_zone(&self, zone_name: &str) -> impl Future<Output = ProvisionResult<String>> + Send;
    fn get_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> impl Future<Output = ProvisionResult<Option<ProviderRecord>>> + Send;
    /// Replace the record set `(name, type)` with `record`.
    fn upsert_record(
        &self,
        zone_id: &str,
        record: &ProviderRecord,
    ) -> impl Future<Output = ProvisionResult<()>> + Send;
    /// Remove the record set `(name, type)`. Missing sets are not an error.
    fn delete_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> impl Future<Output = ProvisionResult<()>> + Send;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PowerDnsConfig {
    /// e.g. `http://ns1.internal:8081`
    pub api_url: String,
    pub server_id: String,
    pub api_key: String,
    /// Nameservers listed in newly created zones.
    pub nameservers: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for PowerDnsConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8081".into(),
            server_id: "localhost".into(),
            api_key: String::new(),
            nameservers: Vec::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneBody {
    id: String,
    #[serde(default)]
    rrsets: Vec<RrSet>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RrSet {
    name: String,
    #[serde(rename = "type")]
    record_type: String,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    records: Vec<RrRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RrRecord {
    content: String,
    #[serde(default)]
    disabled: bool,
}

fn fqdn(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.'))
}

/// Render record content the way PowerDNS stores it.
fn to_wire_content(record: &ProviderRecord) -> String {
    match record.record_type {
        DnsRecordType::Mx => format!("{} {}", record.priority.unwrap_or(10), fqdn(&record.content)),
        DnsRecordType::Cname => fqdn(&record.content),
        DnsRecordType::Txt => format!("\"{}\"", record.content.replace('"', "\\\"")),
        DnsRecordType::A | DnsRecordType::Aaaa => record.content.clone(),
    }
}

fn from_wire_content(record_type: DnsRecordType, content: &str) -> (String, Option<u32>) {
    match record_type {
        DnsRecordType::Mx => {
            let (priority, host) = content.split_once(' ').unwrap_or(("", content));
            (
                host.trim_end_matches('.').to_string(),
                priority.parse().ok(),
            )
        }
        DnsRecordType::Cname => (content.trim_end_matches('.').to_string(), None),
        DnsRecordType::Txt => (
            content
                .trim_matches('"')
                .replace("\\\"", "\""),
            None,
        ),
        DnsRecordType::A | DnsRecordType::Aaaa => (content.to_string(), None),
    }
}

/// Client for the PowerDNS authoritative server HTTP API.
#[derive(Debug, Clone)]
pub struct PowerDnsProvider {
    client: reqwest::Client,
    config: PowerDnsConfig,
}

impl PowerDnsProvider {
    pub fn new(config: PowerDnsConfig) -> ProvisionResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProvisionError::DnsProvider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn zones_url(&self) -> String {
        format!(
            "{}/api/v1/servers/{}/zones",
            self.config.api_url.trim_end_matches('/'),
            self.config.server_id
        )
    }

    fn request(&self, method: Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("X-API-Key", &self.config.api_key)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> ProvisionResult<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| ProvisionError::DnsProvider(e.to_string()))
    }

    async fn fail(response: reqwest::Response) -> ProvisionError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ProvisionError::DnsProvider(format!("HTTP {status}: {body}"))
    }

    async fn fetch_zone(&self, zone_id: &str) -> ProvisionResult<Option<ZoneBody>> {
        let url = format!("{}/{}", self.zones_url(), zone_id);
        let response = self.send(self.request(Method::GET, url)).await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => Ok(None),
            s if s.is_success() => response
                .json::<ZoneBody>()
                .await
                .map(Some)
                .map_err(|e| ProvisionError::DnsProvider(format!("bad zone body: {e}"))),
            _ => Err(Self::fail(response).await),
        }
    }

    async fn patch(&self, zone_id: &str, rrset: serde_json::Value) -> ProvisionResult<()> {
        let url = format!("{}/{}", self.zones_url(), zone_id);
        let response = self
            .send(
                self.request(Method::PATCH, url)
                    .json(&json!({ "rrsets": [rrset] })),
            )
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::fail(response).await)
        }
    }
}

impl DnsProvider for PowerDnsProvider {
    async fn find_zone(&self, zone_name: &str) -> ProvisionResult<Option<String>> {
        Ok(self.fetch_zone(&fqdn(zone_name)).await?.map(|z| z.id))
    }

    async fn create_zone(&self, zone_name: &str) -> ProvisionResult<String> {
        debug!(zone = zone_name, "Creating zone at provider");
        let nameservers: Vec<String> = self.config.nameservers.iter().map(|ns| fqdn(ns)).collect();
        let response = self
            .send(self.request(Method::POST, self.zones_url()).json(&json!({
                "name": fqdn(zone_name),
                "kind": "Native",
                "nameservers": nameservers,
            })))
            .await?;
        if !response.status().is_success() {
            return Err(Self::fail(response).await);
        }
        let zone: ZoneBody = response
            .json()
            .await
            .map_err(|e| ProvisionError::DnsProvider(format!("bad zone body: {e}")))?;
        Ok(zone.id)
    }

    async fn get_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> ProvisionResult<Option<ProviderRecord>> {
        let Some(zone) = self.fetch_zone(zone_id).await? else {
            return Ok(None);
        };
        let wanted = fqdn(name);
        let record = zone
            .rrsets
            .into_iter()
            .find(|set| set.name == wanted && set.record_type == record_type.as_str())
            .and_then(|set| {
                let ttl = set.ttl;
                set.records
                    .into_iter()
                    .find(|r| !r.disabled)
                    .map(|r| {
                        let (content, priority) = from_wire_content(record_type, &r.content);
                        ProviderRecord {
                            name: name.to_string(),
                            record_type,
                            content,
                            ttl,
                            priority,
                        }
                    })
            });
        Ok(record)
    }

    async fn upsert_record(&self, zone_id: &str, record: &ProviderRecord) -> ProvisionResult<()> {
        self.patch(
            zone_id,
            json!({
                "name": fqdn(&record.name),
                "type": record.record_type.as_str(),
                "ttl": record.ttl,
                "changetype": "REPLACE",
                "records": [{ "content": to_wire_content(record), "disabled": false }],
            }),
        )
        .await
    }

    async fn delete_record(
        &self,
        zone_id: &str,
        name: &str,
        record_type: DnsRecordType,
    ) -> ProvisionResult<()> {
        let url = format!("{}/{}", self.zones_url(), zone_id);
        let rrset = json!({
            "name": fqdn(name),
            "type": record_type.as_str(),
            "changetype": "DELETE",
        });
        let response = self
            .send(
                self.request(Method::PATCH, url)
                    .json(&json!({ "rrsets": [rrset] })),
            )
            .await?;
        match response.status() {
            // The zone is gone, and the records with it.
            StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => {
                debug!(zone_id, name, "Zone missing at provider, nothing to delete");
                Ok(())
            }
            s if s.is_success() => Ok(()),
            _ => Err(Self::fail(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Answer a single HTTP request with `status` and `body`.
    async fn stub_api(status: &'static str, body: &'static str) -> PowerDnsProvider {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request);
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\n\
                 content-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
        });

        PowerDnsProvider::new(PowerDnsConfig {
            api_url: format!("http://{addr}"),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn deleting_from_a_vanished_zone_succeeds() {
        let provider = stub_api("404 Not Found", r#"{"error":"Could not find domain 'gone.test.'"}"#).await;
        provider
            .delete_record("gone.test.", "www.gone.test", DnsRecordType::A)
            .await
            .unwrap();

        let provider = stub_api("422 Unprocessable Entity", r#"{"error":"Could not find domain"}"#).await;
        provider
            .delete_record("gone.test.", "gone.test", DnsRecordType::Mx)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_surfaces_server_errors() {
        let provider = stub_api("500 Internal Server Error", r#"{"error":"backend down"}"#).await;
        let err = provider
            .delete_record("example.test.", "example.test", DnsRecordType::A)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::DnsProvider(ref m) if m.contains("500")));
    }

    fn record(record_type: DnsRecordType, content: &str, priority: Option<u32>) -> ProviderRecord {
        ProviderRecord {
            name: "example.test".into(),
            record_type,
            content: content.into(),
            ttl: 3600,
            priority,
        }
    }

    #[test]
    fn wire_content_round_trips_per_type() {
        let mx = record(DnsRecordType::Mx, "example.test", Some(10));
        assert_eq!(to_wire_content(&mx), "10 example.test.");
        assert_eq!(
            from_wire_content(DnsRecordType::Mx, "10 example.test."),
            ("example.test".to_string(), Some(10))
        );

        let txt = record(DnsRecordType::Txt, "v=spf1 mx a ~all", None);
        assert_eq!(to_wire_content(&txt), "\"v=spf1 mx a ~all\"");
        assert_eq!(
            from_wire_content(DnsRecordType::Txt, "\"v=spf1 mx a ~all\"").0,
            "v=spf1 mx a ~all"
        );

        let a = record(DnsRecordType::A, "10.0.0.5", None);
        assert_eq!(to_wire_content(&a), "10.0.0.5");
    }

    #[test]
    fn names_are_made_absolute_once() {
        assert_eq!(fqdn("example.test"), "example.test.");
        assert_eq!(fqdn("example.test."), "example.test.");
    }
}
