//! Webhook End-to-End
//!
//! Full loop over real sockets: the manager POSTs jobs to a worker
//! endpoint, and the worker reports outcomes back through the REST API.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use taskmill_api_http::create_router;
use taskmill_core::application::QueueManager;
use taskmill_core::domain::{JobStatus, NewJob, QueueConfig, QueueMode, RateLimit};
use taskmill_core::port::{MonotonicTimeProvider, UuidProvider};
use taskmill_infra_webhook::{DeliveryBody, WebhookWorkerSink};

#[derive(Clone)]
struct Worker {
    api_url: String,
    http: reqwest::Client,
}

/// Acks every job except payloads marked `{"fail": true}` on their first attempt
async fn work(State(worker): State<Worker>, Json(body): Json<DeliveryBody>) -> StatusCode {
    let job = body.job;
    let fail = job.payload.as_value()["fail"] == json!(true) && job.attempts == 0;

    tokio::spawn(async move {
        let request = if fail {
            worker
                .http
                .post(format!("{}/task/{}/fail", worker.api_url, job.id))
                .json(&json!({"queue": job.queue, "reason": "first try always fails"}))
        } else {
            worker
                .http
                .post(format!("{}/task/{}/ack", worker.api_url, job.id))
                .query(&[("queue", job.queue.as_str())])
        };
        let response = request.send().await.unwrap();
        assert!(response.status().is_success());
    });
    StatusCode::ACCEPTED
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check().await {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn spawn_system() -> Arc<QueueManager> {
    // Bind the API first so the worker knows where to report
    let api_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_url = format!("http://{}", api_listener.local_addr().unwrap());

    let worker_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let worker_url = format!("http://{}/jobs", worker_listener.local_addr().unwrap());
    let worker_app = Router::new().route("/jobs", post(work)).with_state(Worker {
        api_url,
        http: reqwest::Client::new(),
    });
    tokio::spawn(async move {
        axum::serve(worker_listener, worker_app).await.unwrap();
    });

    let sink = WebhookWorkerSink::new(worker_url, Duration::from_secs(5)).unwrap();
    let manager = Arc::new(QueueManager::new(
        Arc::new(sink),
        Arc::new(MonotonicTimeProvider::new()),
        Arc::new(UuidProvider),
        None,
    ));

    let api_app = create_router(manager.clone(), Duration::from_secs(5));
    tokio::spawn(async move {
        axum::serve(api_listener, api_app).await.unwrap();
    });

    manager
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_round_trip_through_worker() {
    let manager = spawn_system().await;
    let mut config = QueueConfig::new("e2e", QueueMode::Fifo, vec![RateLimit::per_second(50)]);
    config.batch_size = 5;
    manager.create_queue(config).await.unwrap();
    manager.start_queue("e2e").await.unwrap();

    let mut jobs: Vec<NewJob> = (0..10).map(|n| NewJob::new(json!({"n": n}))).collect();
    jobs.push(NewJob::new(json!({"fail": true})));
    let ids = manager.enqueue_jobs("e2e", jobs).await.unwrap();

    wait_for(|| {
        let manager = manager.clone();
        async move { manager.get_queue("e2e").await.unwrap().stats.acked == 11 }
    })
    .await;

    let snapshot = manager.get_queue("e2e").await.unwrap();
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.in_flight, 0);
    assert_eq!(snapshot.stats.failed, 1);
    assert_eq!(snapshot.stats.retried, 1);

    let retried = manager.find_job(ids.last().unwrap()).await.unwrap();
    assert_eq!(retried.status, JobStatus::Acked);
    assert_eq!(retried.attempts, 1);

    manager.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_worker_counts_as_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let sink =
        WebhookWorkerSink::new(format!("http://127.0.0.1:{}/jobs", port), Duration::from_secs(1))
            .unwrap();
    let manager = Arc::new(QueueManager::new(
        Arc::new(sink),
        Arc::new(MonotonicTimeProvider::new()),
        Arc::new(UuidProvider),
        None,
    ));

    let mut config = QueueConfig::new("dead", QueueMode::Fifo, vec![RateLimit::per_second(100)]);
    config.use_dead_letter = true;
    config.max_retries = Some(2);
    manager.create_queue(config).await.unwrap();
    manager.start_queue("dead").await.unwrap();
    let id = manager
        .enqueue_job("dead", NewJob::new(json!("ping")))
        .await
        .unwrap();

    wait_for(|| {
        let manager = manager.clone();
        let id = id.clone();
        async move { manager.find_job(&id).await.unwrap().status == JobStatus::DeadLettered }
    })
    .await;

    let job = manager.find_job(&id).await.unwrap();
    assert_eq!(job.attempts, 2);
    assert_eq!(manager.get_queue("dead").await.unwrap().dead_lettered, 1);

    manager.shutdown().await;
}
