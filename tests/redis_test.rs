//! Exercises the Redis backends against a live server.
//!
//! Run with `REDIS_URL=redis://127.0.0.1/ cargo test --test redis_test -- --ignored`.

use std::time::Duration;

use ocr_job_queue::{
    models::job::{Contract, Job, JobInput, JobStatus, JobUpdate, NormalizedInput, WorkItem},
    services::queue::{RedisWorkQueue, WorkQueue},
    store::{redis_store::RedisJobStore, JobStore, PutOutcome},
};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

fn unique_prefix() -> String {
    format!("ocr-test-{}", uuid::Uuid::new_v4())
}

fn sample_input() -> JobInput {
    JobInput {
        source: NormalizedInput::ResourceUrl("https://x/doc.pdf".to_string()),
        contract: Contract::Legacy,
    }
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_store_lifecycle() {
    let store = RedisJobStore::new(&redis_url(), &unique_prefix()).unwrap();
    store.health_check().await.unwrap();

    let job = Job::queued("job-1".to_string(), sample_input(), None);
    assert!(store.create(&job).await.unwrap());
    assert!(!store.create(&job).await.unwrap());

    assert_eq!(
        store.put("job-1", &JobUpdate::running()).await.unwrap(),
        PutOutcome::Applied
    );
    let running = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(running.status, JobStatus::Running);
    let started_at = running.started_at;
    assert!(started_at.is_some());

    // A second running write keeps the first start time.
    store.put("job-1", &JobUpdate::running()).await.unwrap();
    let again = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(again.started_at, started_at);

    let result = serde_json::json!({"markdown": "hi", "images": {}});
    assert_eq!(
        store.put("job-1", &JobUpdate::finished(result.clone())).await.unwrap(),
        PutOutcome::Applied
    );
    assert_eq!(
        store.put("job-1", &JobUpdate::failed("late")).await.unwrap(),
        PutOutcome::Rejected
    );

    let finished = store.get("job-1").await.unwrap().unwrap();
    assert_eq!(finished.status, JobStatus::Finished);
    assert_eq!(finished.result, Some(result));
    assert_eq!(finished.error, None);

    assert_eq!(
        store.put("ghost", &JobUpdate::running()).await.unwrap(),
        PutOutcome::Missing
    );
    assert!(store.get("ghost").await.unwrap().is_none());

    assert!(store.claim_once("cb:job-1", Duration::from_secs(60)).await.unwrap());
    assert!(!store.claim_once("cb:job-1", Duration::from_secs(60)).await.unwrap());
}

#[tokio::test]
#[ignore = "requires a running Redis server"]
async fn test_redis_queue_ack_and_recovery() {
    let prefix = unique_prefix();
    let queue = RedisWorkQueue::new(&redis_url(), &prefix, "consumer-a").unwrap();
    queue.health_check().await.unwrap();

    let item = WorkItem {
        job_id: "job-1".to_string(),
        input: sample_input(),
        callback: None,
    };
    queue.push(&item).await.unwrap();
    assert_eq!(queue.depth().await.unwrap(), 1);

    let delivery = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
    assert_eq!(delivery.item.job_id, "job-1");
    assert_eq!(queue.depth().await.unwrap(), 0);

    // Consumer restarts without acking.
    let restarted = RedisWorkQueue::new(&redis_url(), &prefix, "consumer-a").unwrap();
    assert_eq!(restarted.recover_in_flight().await.unwrap(), 1);
    assert_eq!(restarted.depth().await.unwrap(), 1);

    let delivery = restarted.pop(Duration::from_secs(1)).await.unwrap().unwrap();
    restarted.ack(&delivery).await.unwrap();
    assert_eq!(restarted.recover_in_flight().await.unwrap(), 0);

    assert!(restarted.pop(Duration::from_secs(1)).await.unwrap().is_none());
}
