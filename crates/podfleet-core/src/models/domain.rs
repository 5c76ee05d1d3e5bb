//! Domain model.
//!
//! Domain names are globally unique: one tenant owns a name, and every
//! other tenant is refused it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Domain {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Lower-case, without trailing dot (e.g., `example.test`).
    pub name: String,
    /// Whether web records (root and `www`) are managed automatically.
    pub manage_dns: bool,
    /// Whether mail records (MX, SPF, DMARC) are managed automatically.
    pub manage_mail: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDomain {
    pub tenant_id: Uuid,
    pub name: String,
    pub manage_dns: bool,
    pub manage_mail: bool,
}
