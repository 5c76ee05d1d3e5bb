//! SurrealDB implementation of [`CertificateRepository`].

use chrono::{DateTime, Utc};
use podfleet_core::error::{PodfleetError, PodfleetResult};
use podfleet_core::models::certificate::{CertificateStatus, TlsCertificate, UpsertCertificate};
use podfleet_core::repository::CertificateRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use uuid::Uuid;

use super::{first_row, parse_uuid};
use crate::error::DbError;

const ENTITY: &str = "tls_certificate";

#[derive(Debug, SurrealValue)]
struct CertificateRow {
    tenant_id: String,
    pod_id: String,
    domain: String,
    common_name: String,
    issuer: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    auto_renew: bool,
    status: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct CertificateRowWithId {
    record_id: String,
    tenant_id: String,
    pod_id: String,
    domain: String,
    common_name: String,
    issuer: Option<String>,
    not_before: Option<DateTime<Utc>>,
    not_after: Option<DateTime<Utc>>,
    auto_renew: bool,
    status: String,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct IdRow {
    record_id: String,
}

impl CertificateRow {
    fn into_certificate(self, id: Uuid) -> Result<TlsCertificate, DbError> {
        let status = CertificateStatus::parse(&self.status).ok_or_else(|| {
            DbError::decode(ENTITY, format!("unknown certificate status: {}", self.status))
        })?;
        Ok(TlsCertificate {
            id,
            tenant_id: parse_uuid(ENTITY, "tenant", &self.tenant_id)?,
            pod_id: parse_uuid(ENTITY, "pod", &self.pod_id)?,
            domain: self.domain,
            common_name: self.common_name,
            issuer: self.issuer,
            not_before: self.not_before,
            not_after: self.not_after,
            auto_renew: self.auto_renew,
            status,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl CertificateRowWithId {
    fn try_into_certificate(self) -> Result<TlsCertificate, DbError> {
        let id = parse_uuid(ENTITY, "record", &self.record_id)?;
        CertificateRow {
            tenant_id: self.tenant_id,
            pod_id: self.pod_id,
            domain: self.domain,
            common_name: self.common_name,
            issuer: self.issuer,
            not_before: self.not_before,
            not_after: self.not_after,
            auto_renew: self.auto_renew,
            status: self.status,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_certificate(id)
    }
}

/// SurrealDB implementation of the certificate repository.
pub struct SurrealCertificateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealCertificateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_id(&self, tenant_id: Uuid, domain: &str, common_name: &str) -> Result<Option<Uuid>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id FROM tls_certificate \
                 WHERE tenant_id = $tenant_id AND domain = $domain \
                 AND common_name = $common_name",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("domain", domain.to_string()))
            .bind(("common_name", common_name.to_string()))
            .await?;

        let rows: Vec<IdRow> = result.take(0)?;
        rows.first()
            .map(|r| parse_uuid(ENTITY, "record", &r.record_id))
            .transpose()
    }

    async fn write(&self, statement: &str, id: Uuid, input: UpsertCertificate) -> Result<TlsCertificate, DbError> {
        let id_str = id.to_string();
        let query = format!(
            "{statement} type::record('tls_certificate', $id) SET \
             tenant_id = $tenant_id, pod_id = $pod_id, \
             domain = $domain, common_name = $common_name, \
             issuer = $issuer, not_before = $not_before, \
             not_after = $not_after, auto_renew = $auto_renew, \
             status = $status, last_error = $last_error, \
             updated_at = time::now()"
        );

        let result = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.to_string()))
            .bind(("pod_id", input.pod_id.to_string()))
            .bind(("domain", input.domain))
            .bind(("common_name", input.common_name))
            .bind(("issuer", input.issuer))
            .bind(("not_before", input.not_before))
            .bind(("not_after", input.not_after))
            .bind(("auto_renew", input.auto_renew))
            .bind(("status", input.status.as_str()))
            .bind(("last_error", input.last_error))
            .await?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<CertificateRow> = result.take(0)?;
        first_row(rows, ENTITY, &id_str)?.into_certificate(id)
    }

    async fn select_many(
        &self,
        query: &'static str,
        binds: Vec<(&'static str, String)>,
        horizon: Option<DateTime<Utc>>,
    ) -> Result<Vec<TlsCertificate>, DbError> {
        let mut builder = self.db.query(query);
        for bind in binds {
            builder = builder.bind(bind);
        }
        if let Some(horizon) = horizon {
            builder = builder.bind(("horizon", horizon));
        }
        let mut result = builder.await?;

        let rows: Vec<CertificateRowWithId> = result.take(0)?;
        rows.into_iter()
            .map(CertificateRowWithId::try_into_certificate)
            .collect()
    }
}

impl<C: Connection> CertificateRepository for SurrealCertificateRepository<C> {
    async fn get(
        &self,
        tenant_id: Uuid,
        domain: &str,
        common_name: &str,
    ) -> PodfleetResult<Option<TlsCertificate>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tls_certificate \
                 WHERE tenant_id = $tenant_id AND domain = $domain \
                 AND common_name = $common_name",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("domain", domain.to_string()))
            .bind(("common_name", common_name.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRowWithId> = result.take(0).map_err(DbError::from)?;
        let cert = rows
            .into_iter()
            .next()
            .map(CertificateRowWithId::try_into_certificate)
            .transpose()?;
        Ok(cert)
    }

    async fn upsert(&self, input: UpsertCertificate) -> PodfleetResult<TlsCertificate> {
        if let Some(id) = self
            .find_id(input.tenant_id, &input.domain, &input.common_name)
            .await?
        {
            return Ok(self.write("UPDATE", id, input).await?);
        }

        // Two writers can race to create the first row for a key; the
        // loser updates the winner's row.
        match self.write("CREATE", Uuid::new_v4(), input.clone()).await {
            Err(DbError::AlreadyExists { .. }) => {
                let id = self
                    .find_id(input.tenant_id, &input.domain, &input.common_name)
                    .await?
                    .ok_or_else(|| PodfleetError::Conflict {
                        message: format!("certificate for {} vanished during upsert", input.domain),
                    })?;
                Ok(self.write("UPDATE", id, input).await?)
            }
            other => Ok(other?),
        }
    }

    async fn list_for_pod(&self, tenant_id: Uuid, pod_id: Uuid) -> PodfleetResult<Vec<TlsCertificate>> {
        Ok(self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM tls_certificate \
                 WHERE tenant_id = $tenant_id AND pod_id = $pod_id \
                 ORDER BY domain ASC",
                vec![
                    ("tenant_id", tenant_id.to_string()),
                    ("pod_id", pod_id.to_string()),
                ],
                None,
            )
            .await?)
    }

    async fn delete_for_pod(&self, tenant_id: Uuid, pod_id: Uuid) -> PodfleetResult<()> {
        self.db
            .query(
                "DELETE tls_certificate \
                 WHERE tenant_id = $tenant_id AND pod_id = $pod_id",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("pod_id", pod_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        Ok(())
    }

    async fn mark_expired(&self, now: DateTime<Utc>) -> PodfleetResult<u64> {
        let mut result = self
            .db
            .query(
                "UPDATE tls_certificate SET \
                 status = 'Expired', updated_at = time::now() \
                 WHERE status = 'Active' AND not_after != NONE \
                 AND not_after < $now",
            )
            .bind(("now", now))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<CertificateRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows.len() as u64)
    }

    async fn list_renewal_candidates(&self, horizon: DateTime<Utc>) -> PodfleetResult<Vec<TlsCertificate>> {
        Ok(self
            .select_many(
                "SELECT meta::id(id) AS record_id, * FROM tls_certificate \
                 WHERE auto_renew = true \
                 AND not_after != NONE AND not_after < $horizon \
                 ORDER BY not_after ASC",
                Vec::new(),
                Some(horizon),
            )
            .await?)
    }
}
