//! Integration tests for the job repository using in-memory SurrealDB.

use chrono::{Duration, Utc};
use podfleet_core::models::job::{
    CreateJob, CreatePodPayload, IssueTlsPayload, JobPayload, JobStatus, JobType, PodRefPayload,
};
use podfleet_core::repository::{JobFilter, JobRepository, Pagination, StaleSweep};
use podfleet_db::repository::SurrealJobRepository;
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> SurrealJobRepository<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    podfleet_db::run_migrations(&db).await.unwrap();
    SurrealJobRepository::new(db)
}

fn create_pod(tenant_id: Uuid) -> CreateJob {
    CreateJob {
        payload: JobPayload::CreatePod(CreatePodPayload {
            tenant_id,
            subscription_id: Uuid::new_v4(),
            plan_code: "pod-basic".into(),
            requested_domain: Some("example.test".into()),
            triggered_by_user_id: None,
            preferred_region: None,
        }),
        dedupe_key: None,
        run_after: None,
    }
}

fn issue_tls(tenant_id: Uuid, domain: &str) -> CreateJob {
    CreateJob {
        payload: JobPayload::IssueTls(IssueTlsPayload {
            tenant_id,
            pod_id: Uuid::new_v4(),
            domain: domain.into(),
        }),
        dedupe_key: Some(format!("issue_tls:{domain}")),
        run_after: None,
    }
}

#[tokio::test]
async fn enqueue_stores_typed_payload() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    let job = repo.enqueue(create_pod(tenant_id)).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.job_type, JobType::CreatePod);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.tenant_id, tenant_id);

    let fetched = repo.get_by_id(job.id).await.unwrap();
    match fetched.payload {
        JobPayload::CreatePod(p) => {
            assert_eq!(p.plan_code, "pod-basic");
            assert_eq!(p.requested_domain.as_deref(), Some("example.test"));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn dedupe_key_collapses_open_jobs() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    let first = repo.enqueue(issue_tls(tenant_id, "example.test")).await.unwrap();
    let second = repo.enqueue(issue_tls(tenant_id, "example.test")).await.unwrap();
    assert_eq!(first.id, second.id);

    // Once the job is finished the key is free again.
    repo.mark_completed(first.id).await.unwrap();
    let third = repo.enqueue(issue_tls(tenant_id, "example.test")).await.unwrap();
    assert_ne!(third.id, first.id);
}

#[tokio::test]
async fn claim_is_fifo_and_exclusive() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    let first = repo.enqueue(create_pod(tenant_id)).await.unwrap();
    let second = repo.enqueue(create_pod(tenant_id)).await.unwrap();
    let now = Utc::now() + Duration::seconds(1);

    let claimed = repo.claim_next(now, "worker-a").await.unwrap().unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, JobStatus::Running);
    assert_eq!(claimed.claimed_by.as_deref(), Some("worker-a"));

    let next = repo.claim_next(now, "worker-b").await.unwrap().unwrap();
    assert_eq!(next.id, second.id);

    assert!(repo.claim_next(now, "worker-c").await.unwrap().is_none());
}

#[tokio::test]
async fn delayed_jobs_are_not_claimable_early() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();
    let later = Utc::now() + Duration::minutes(5);

    repo.enqueue(CreateJob {
        run_after: Some(later),
        ..create_pod(tenant_id)
    })
    .await
    .unwrap();

    assert!(repo.claim_next(Utc::now(), "w").await.unwrap().is_none());
    assert!(
        repo.claim_next(later + Duration::seconds(1), "w")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn retry_increments_count_and_reschedules() {
    let repo = setup().await;
    let job = repo.enqueue(create_pod(Uuid::new_v4())).await.unwrap();
    let now = Utc::now() + Duration::seconds(1);
    repo.claim_next(now, "w").await.unwrap().unwrap();

    let run_after = now + Duration::seconds(30);
    let retried = repo.retry(job.id, "ssh timeout", run_after).await.unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.last_error.as_deref(), Some("ssh timeout"));
    assert!(retried.claimed_by.is_none());

    assert!(repo.claim_next(now, "w").await.unwrap().is_none());
    assert!(
        repo.claim_next(run_after + Duration::seconds(1), "w")
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn mark_failed_records_reason() {
    let repo = setup().await;
    let job = repo.enqueue(create_pod(Uuid::new_v4())).await.unwrap();

    let failed = repo.mark_failed(job.id, "no capacity").await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("no capacity"));
    assert!(failed.finished_at.is_some());
}

#[tokio::test]
async fn stale_claims_return_to_pending() {
    let repo = setup().await;
    let job = repo.enqueue(create_pod(Uuid::new_v4())).await.unwrap();
    let claimed_at = Utc::now() + Duration::seconds(1);
    repo.claim_next(claimed_at, "crashed").await.unwrap().unwrap();

    let sweep = repo.requeue_stale(claimed_at, 5).await.unwrap();
    assert_eq!(sweep, StaleSweep::default());
    let sweep = repo
        .requeue_stale(claimed_at + Duration::minutes(15), 5)
        .await
        .unwrap();
    assert_eq!(sweep.requeued, 1);
    assert_eq!(sweep.failed, 0);

    let requeued = repo.get_by_id(job.id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retry_count, 1);
    assert!(requeued.claimed_by.is_none());
}

#[tokio::test]
async fn stale_claim_on_the_last_attempt_fails_the_job() {
    let repo = setup().await;
    let job = repo.enqueue(issue_tls(Uuid::new_v4(), "example.test")).await.unwrap();
    let claimed_at = Utc::now() + Duration::seconds(1);
    repo.claim_next(claimed_at, "w").await.unwrap().unwrap();
    repo.retry(job.id, "resolver timeout", claimed_at).await.unwrap();
    repo.claim_next(claimed_at + Duration::seconds(1), "crashed")
        .await
        .unwrap()
        .unwrap();

    let sweep = repo
        .requeue_stale(claimed_at + Duration::minutes(15), 2)
        .await
        .unwrap();
    assert_eq!(sweep.requeued, 0);
    assert_eq!(sweep.failed, 1);

    let failed = repo.get_by_id(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.retry_count, 1);
    assert!(failed.finished_at.is_some());
    assert!(failed.last_error.is_some());

    // The key is released along with the job.
    let next = repo.enqueue(issue_tls(failed.tenant_id, "example.test")).await.unwrap();
    assert_ne!(next.id, job.id);
}

#[tokio::test]
async fn heartbeat_keeps_a_long_claim_alive() {
    let repo = setup().await;
    let job = repo.enqueue(create_pod(Uuid::new_v4())).await.unwrap();
    let claimed_at = Utc::now() + Duration::seconds(1);
    repo.claim_next(claimed_at, "worker-a").await.unwrap().unwrap();

    let later = claimed_at + Duration::minutes(20);
    assert!(repo.heartbeat(job.id, "worker-a", later).await.unwrap());
    assert!(!repo.heartbeat(job.id, "worker-b", later).await.unwrap());

    let sweep = repo
        .requeue_stale(later - Duration::minutes(1), 5)
        .await
        .unwrap();
    assert_eq!(sweep.requeued, 0);
    let running = repo.get_by_id(job.id).await.unwrap();
    assert_eq!(running.status, JobStatus::Running);
    assert!(running.claimed_at.is_some_and(|t| t > claimed_at));

    repo.mark_completed(job.id).await.unwrap();
    assert!(!repo.heartbeat(job.id, "worker-a", later).await.unwrap());
}

#[tokio::test]
async fn concurrent_enqueues_share_one_open_job() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    let (a, b, c) = tokio::join!(
        repo.enqueue(issue_tls(tenant_id, "example.test")),
        repo.enqueue(issue_tls(tenant_id, "example.test")),
        repo.enqueue(issue_tls(tenant_id, "example.test")),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
    assert_eq!(a.id, b.id);
    assert_eq!(b.id, c.id);

    let open = repo
        .list(tenant_id, JobFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(open.total, 1);

    // The same key under another tenant is a separate job.
    let other = repo.enqueue(issue_tls(Uuid::new_v4(), "example.test")).await.unwrap();
    assert_ne!(other.id, a.id);
}

#[tokio::test]
async fn list_filters_by_type_within_tenant() {
    let repo = setup().await;
    let tenant_id = Uuid::new_v4();

    repo.enqueue(create_pod(tenant_id)).await.unwrap();
    repo.enqueue(issue_tls(tenant_id, "example.test")).await.unwrap();
    repo.enqueue(CreateJob {
        payload: JobPayload::StopPod(PodRefPayload {
            tenant_id,
            pod_id: Uuid::new_v4(),
        }),
        dedupe_key: None,
        run_after: None,
    })
    .await
    .unwrap();
    repo.enqueue(create_pod(Uuid::new_v4())).await.unwrap();

    let all = repo
        .list(tenant_id, JobFilter::default(), Pagination::default())
        .await
        .unwrap();
    assert_eq!(all.total, 3);

    let tls = repo
        .list(
            tenant_id,
            JobFilter {
                job_type: Some(JobType::IssueTls),
                status: None,
            },
            Pagination::default(),
        )
        .await
        .unwrap();
    assert_eq!(tls.total, 1);
    assert_eq!(tls.items[0].job_type, JobType::IssueTls);
}
