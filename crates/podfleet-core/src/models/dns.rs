//! DNS zone and record models.
//!
//! A zone belongs to exactly one domain and is created lazily the first
//! time the domain needs records. Records are identified by
//! `(zone, name, type)`; content, TTL and priority are the only mutable
//! fields, so a record is upserted, never duplicated.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsZone {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub domain_id: Uuid,
    /// Zone apex, without trailing dot.
    pub zone_name: String,
    /// Identifier of the zone at the authoritative provider.
    pub provider_zone_id: String,
    pub is_synced: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDnsZone {
    pub tenant_id: Uuid,
    pub domain_id: Uuid,
    pub zone_name: String,
    pub provider_zone_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
}

impl DnsRecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsRecordType::A => "A",
            DnsRecordType::Aaaa => "AAAA",
            DnsRecordType::Cname => "CNAME",
            DnsRecordType::Mx => "MX",
            DnsRecordType::Txt => "TXT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" => Some(DnsRecordType::A),
            "AAAA" => Some(DnsRecordType::Aaaa),
            "CNAME" => Some(DnsRecordType::Cname),
            "MX" => Some(DnsRecordType::Mx),
            "TXT" => Some(DnsRecordType::Txt),
            _ => None,
        }
    }
}

impl fmt::Display for DnsRecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub zone_id: Uuid,
    /// The pod whose template produced this record, if any.
    pub pod_id: Option<Uuid>,
    /// Fully-qualified owner name, without trailing dot.
    pub name: String,
    pub record_type: DnsRecordType,
    pub content: String,
    pub ttl: u32,
    /// Only meaningful for MX records.
    pub priority: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDnsRecord {
    pub tenant_id: Uuid,
    pub zone_id: Uuid,
    pub pod_id: Option<Uuid>,
    pub name: String,
    pub record_type: DnsRecordType,
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDnsRecord {
    pub content: String,
    pub ttl: u32,
    pub priority: Option<u32>,
    pub pod_id: Option<Uuid>,
}
