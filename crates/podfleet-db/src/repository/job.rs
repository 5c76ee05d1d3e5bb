//! SurrealDB implementation of [`JobRepository`].
//!
//! The typed payload is stored as its tagged JSON object and decoded back
//! into [`JobPayload`] on read. Claims are compare-and-set updates guarded
//! by `status = 'Pending'`, so two workers never run the same job.
//!
//! Every row holds a `dedupe_slot` under a unique index. An open job with
//! a dedupe key occupies `<tenant>:<key>`; every other job uses its own
//! id. Settling a job moves it onto its id, freeing the key.

use chrono::{DateTime, Utc};
use podfleet_core::error::{PodfleetError, PodfleetResult};
use podfleet_core::models::job::{CreateJob, Job, JobPayload, JobStatus, JobType};
use podfleet_core::repository::{
    JobFilter, JobRepository, PaginatedResult, Pagination, StaleSweep,
};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::debug;
use uuid::Uuid;

use super::{CountRow, first_row, parse_uuid};
use crate::error::DbError;

const ENTITY: &str = "job";

/// How many pending jobs a claim attempt considers before giving up.
const CLAIM_BATCH: u32 = 8;

#[derive(Debug, SurrealValue)]
struct JobRow {
    tenant_id: String,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: u32,
    dedupe_key: Option<String>,
    last_error: Option<String>,
    run_after: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    claimed_by: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct JobRowWithId {
    record_id: String,
    tenant_id: String,
    job_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: u32,
    dedupe_key: Option<String>,
    last_error: Option<String>,
    run_after: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    claimed_by: Option<String>,
    finished_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, SurrealValue)]
struct ClaimCandidate {
    record_id: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

impl JobRow {
    fn into_job(self, id: Uuid) -> Result<Job, DbError> {
        let job_type = JobType::parse(&self.job_type)
            .ok_or_else(|| DbError::decode(ENTITY, format!("unknown job type: {}", self.job_type)))?;
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| DbError::decode(ENTITY, format!("unknown job status: {}", self.status)))?;
        let payload: JobPayload = serde_json::from_value(self.payload)
            .map_err(|e| DbError::decode(ENTITY, format!("invalid payload: {e}")))?;
        if payload.job_type() != job_type {
            return Err(DbError::decode(
                ENTITY,
                format!("payload is {} but row says {}", payload.job_type().as_str(), job_type.as_str()),
            ));
        }

        Ok(Job {
            id,
            tenant_id: parse_uuid(ENTITY, "tenant", &self.tenant_id)?,
            job_type,
            payload,
            status,
            retry_count: self.retry_count,
            dedupe_key: self.dedupe_key,
            last_error: self.last_error,
            run_after: self.run_after,
            claimed_at: self.claimed_at,
            claimed_by: self.claimed_by,
            finished_at: self.finished_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl JobRowWithId {
    fn try_into_job(self) -> Result<Job, DbError> {
        let id = parse_uuid(ENTITY, "record", &self.record_id)?;
        JobRow {
            tenant_id: self.tenant_id,
            job_type: self.job_type,
            payload: self.payload,
            status: self.status,
            retry_count: self.retry_count,
            dedupe_key: self.dedupe_key,
            last_error: self.last_error,
            run_after: self.run_after,
            claimed_at: self.claimed_at,
            claimed_by: self.claimed_by,
            finished_at: self.finished_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_job(id)
    }
}

/// SurrealDB implementation of the job repository.
pub struct SurrealJobRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealJobRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn find_open(&self, tenant_id: Uuid, dedupe_key: &str) -> Result<Option<Job>, DbError> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM job \
                 WHERE tenant_id = $tenant_id AND dedupe_key = $dedupe_key \
                 AND status IN ['Pending', 'Running'] \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("dedupe_key", dedupe_key.to_string()))
            .await?;

        let rows: Vec<JobRowWithId> = result.take(0)?;
        rows.into_iter().next().map(JobRowWithId::try_into_job).transpose()
    }

    /// Run a single-record update and decode the row it returns.
    async fn update_one(
        &self,
        id: Uuid,
        set_clause: &str,
        binds: Vec<(&'static str, serde_json::Value)>,
    ) -> Result<Job, DbError> {
        let id_str = id.to_string();
        let query = format!("UPDATE type::record('job', $id) SET {set_clause}, updated_at = time::now()");

        let mut builder = self.db.query(&query).bind(("id", id_str.clone()));
        for bind in binds {
            builder = builder.bind(bind);
        }

        let result = builder.await?;
        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<JobRow> = result.take(0)?;
        first_row(rows, ENTITY, &id_str)?.into_job(id)
    }
}

impl<C: Connection> JobRepository for SurrealJobRepository<C> {
    async fn enqueue(&self, input: CreateJob) -> PodfleetResult<Job> {
        let tenant_id = input.payload.tenant_id();

        if let Some(key) = input.dedupe_key.as_deref() {
            if let Some(existing) = self.find_open(tenant_id, key).await? {
                debug!(job_id = %existing.id, dedupe_key = key, "Open job already queued");
                return Ok(existing);
            }
        }

        let id = Uuid::new_v4();
        let id_str = id.to_string();
        let job_type = input.payload.job_type();
        let payload = serde_json::to_value(&input.payload)
            .map_err(|e| DbError::Query(format!("could not encode job payload: {e}")))?;
        let run_after = input.run_after.unwrap_or_else(Utc::now);
        let dedupe_slot = match input.dedupe_key.as_deref() {
            Some(key) => format!("{tenant_id}:{key}"),
            None => id_str.clone(),
        };

        let result = self
            .db
            .query(
                "CREATE type::record('job', $id) SET \
                 tenant_id = $tenant_id, job_type = $job_type, \
                 payload = $payload, status = 'Pending', \
                 retry_count = 0, dedupe_key = $dedupe_key, \
                 last_error = NONE, run_after = $run_after, \
                 claimed_at = NONE, claimed_by = NONE, \
                 finished_at = NONE, dedupe_slot = $dedupe_slot",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("job_type", job_type.as_str()))
            .bind(("payload", payload))
            .bind(("dedupe_key", input.dedupe_key.clone()))
            .bind(("run_after", run_after))
            .bind(("dedupe_slot", dedupe_slot))
            .await
            .map_err(DbError::from)?;

        let mut result = match result.check() {
            Ok(result) => result,
            Err(e) => {
                let err = DbError::from_statement(ENTITY, e);
                // Lost the race for the key to a concurrent enqueue.
                if let (DbError::AlreadyExists { .. }, Some(key)) = (&err, input.dedupe_key.as_deref()) {
                    if let Some(existing) = self.find_open(tenant_id, key).await? {
                        debug!(job_id = %existing.id, dedupe_key = key, "Open job queued concurrently");
                        return Ok(existing);
                    }
                }
                return Err(PodfleetError::from(err));
            }
        };

        let rows: Vec<JobRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_job(id)?)
    }

    async fn get_by_id(&self, id: Uuid) -> PodfleetResult<Job> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query("SELECT * FROM type::record('job', $id)")
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<JobRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_job(id)?)
    }

    async fn claim_next(&self, now: DateTime<Utc>, worker_id: &str) -> PodfleetResult<Option<Job>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, created_at FROM job \
                 WHERE status = 'Pending' AND run_after <= $now \
                 ORDER BY created_at ASC LIMIT $limit",
            )
            .bind(("now", now))
            .bind(("limit", CLAIM_BATCH))
            .await
            .map_err(DbError::from)?;

        let candidates: Vec<ClaimCandidate> = result.take(0).map_err(DbError::from)?;

        for candidate in candidates {
            let id = parse_uuid(ENTITY, "record", &candidate.record_id)?;

            // Zero rows back means another worker won this job.
            let mut claimed = self
                .db
                .query(
                    "UPDATE type::record('job', $id) SET \
                     status = 'Running', claimed_at = $now, \
                     claimed_by = $worker_id, updated_at = time::now() \
                     WHERE status = 'Pending'",
                )
                .bind(("id", candidate.record_id.clone()))
                .bind(("now", now))
                .bind(("worker_id", worker_id.to_string()))
                .await
                .map_err(DbError::from)?
                .check()
                .map_err(|e| DbError::from_statement(ENTITY, e))?;

            let rows: Vec<JobRow> = claimed.take(0).map_err(DbError::from)?;
            if let Some(row) = rows.into_iter().next() {
                return Ok(Some(row.into_job(id)?));
            }
        }

        Ok(None)
    }

    async fn mark_completed(&self, id: Uuid) -> PodfleetResult<Job> {
        Ok(self
            .update_one(
                id,
                "status = 'Completed', finished_at = time::now(), \
                 claimed_by = NONE, dedupe_slot = $id",
                Vec::new(),
            )
            .await?)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> PodfleetResult<Job> {
        Ok(self
            .update_one(
                id,
                "status = 'Failed', last_error = $reason, \
                 finished_at = time::now(), claimed_by = NONE, \
                 dedupe_slot = $id",
                vec![("reason", serde_json::Value::String(reason.to_string()))],
            )
            .await?)
    }

    async fn retry(&self, id: Uuid, reason: &str, run_after: DateTime<Utc>) -> PodfleetResult<Job> {
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "UPDATE type::record('job', $id) SET \
                 status = 'Pending', retry_count += 1, \
                 last_error = $reason, run_after = $run_after, \
                 claimed_at = NONE, claimed_by = NONE, \
                 updated_at = time::now()",
            )
            .bind(("id", id_str.clone()))
            .bind(("reason", reason.to_string()))
            .bind(("run_after", run_after))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<JobRow> = result.take(0).map_err(DbError::from)?;
        Ok(first_row(rows, ENTITY, &id_str)?.into_job(id)?)
    }

    async fn heartbeat(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> PodfleetResult<bool> {
        let mut result = self
            .db
            .query(
                "UPDATE type::record('job', $id) SET \
                 claimed_at = $now, updated_at = time::now() \
                 WHERE status = 'Running' AND claimed_by = $worker_id",
            )
            .bind(("id", id.to_string()))
            .bind(("now", now))
            .bind(("worker_id", worker_id.to_string()))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let rows: Vec<JobRow> = result.take(0).map_err(DbError::from)?;
        Ok(!rows.is_empty())
    }

    async fn requeue_stale(
        &self,
        claimed_before: DateTime<Utc>,
        max_attempts: u32,
    ) -> PodfleetResult<StaleSweep> {
        // Exhausted jobs are failed first so the requeue below skips them.
        let mut result = self
            .db
            .query(
                "UPDATE job SET \
                 status = 'Failed', last_error = $reason, \
                 finished_at = time::now(), claimed_by = NONE, \
                 dedupe_slot = meta::id(id), updated_at = time::now() \
                 WHERE status = 'Running' AND claimed_at != NONE \
                 AND claimed_at < $claimed_before \
                 AND retry_count + 1 >= $max_attempts;
                 UPDATE job SET \
                 status = 'Pending', retry_count += 1, \
                 claimed_at = NONE, claimed_by = NONE, \
                 updated_at = time::now() \
                 WHERE status = 'Running' AND claimed_at != NONE \
                 AND claimed_at < $claimed_before",
            )
            .bind(("claimed_before", claimed_before))
            .bind(("max_attempts", max_attempts))
            .bind(("reason", "worker lost its claim on the final attempt"))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(|e| DbError::from_statement(ENTITY, e))?;

        let failed: Vec<JobRow> = result.take(0).map_err(DbError::from)?;
        let requeued: Vec<JobRow> = result.take(1).map_err(DbError::from)?;
        Ok(StaleSweep {
            requeued: requeued.len() as u64,
            failed: failed.len() as u64,
        })
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: JobFilter,
        pagination: Pagination,
    ) -> PodfleetResult<PaginatedResult<Job>> {
        let mut conditions = vec!["tenant_id = $tenant_id"];
        if filter.job_type.is_some() {
            conditions.push("job_type = $job_type");
        }
        if filter.status.is_some() {
            conditions.push("status = $status");
        }
        let where_clause = conditions.join(" AND ");

        let count_query = format!("SELECT count() AS total FROM job WHERE {where_clause} GROUP ALL");
        let select_query = format!(
            "SELECT meta::id(id) AS record_id, * FROM job \
             WHERE {where_clause} \
             ORDER BY created_at DESC \
             LIMIT $limit START $offset"
        );

        let mut count_builder = self
            .db
            .query(&count_query)
            .bind(("tenant_id", tenant_id.to_string()));
        let mut select_builder = self
            .db
            .query(&select_query)
            .bind(("tenant_id", tenant_id.to_string()))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset));

        if let Some(job_type) = filter.job_type {
            count_builder = count_builder.bind(("job_type", job_type.as_str()));
            select_builder = select_builder.bind(("job_type", job_type.as_str()));
        }
        if let Some(status) = filter.status {
            count_builder = count_builder.bind(("status", status.as_str()));
            select_builder = select_builder.bind(("status", status.as_str()));
        }

        let mut count_result = count_builder.await.map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = select_builder.await.map_err(DbError::from)?;
        let rows: Vec<JobRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(JobRowWithId::try_into_job)
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
