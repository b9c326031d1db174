//! Whole-system flows over the in-memory substrate.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use beta_worker::api::{ApiError, ClientVariant, SimulatedBetaClient, SimulatedStableClient};
use beta_worker::config::{SubstrateKind, WorkerConfig};
use beta_worker::dead_letter::file_sink::read_records;
use beta_worker::dead_letter::{DeadLetterRecord, FileDeadLetterSink};
use beta_worker::messaging::{DeliverySubstrate, Priority, TaskOutcome};
use beta_worker::producer::Producer;
use beta_worker::worker::{DeadLetterConsumer, DispatchWorker, PollSettings, WorkerStats, WorkerSystem};

use common::*;

fn test_config(dead_letter_path: std::path::PathBuf) -> WorkerConfig {
    let mut config = WorkerConfig::default();
    config.substrate = SubstrateKind::InMemory;
    config.dead_letter.path = dead_letter_path;
    config.dead_letter.sync_on_write = false;
    config
}

#[tokio::test(start_paused = true)]
async fn test_transient_job_follows_backoff_timeline() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().join("dlq.log"));
    let substrate = FlakySubstrate::new();
    let primary = ScriptedClient::always(ClientVariant::Primary, Err(ApiError::transient("beta: 503")));
    let fallback = ScriptedClient::always(ClientVariant::Fallback, ok(ClientVariant::Fallback));

    let system = WorkerSystem::assemble(config.clone(), substrate.clone(), primary.clone(), fallback.clone())
        .await
        .unwrap();
    let stats = Arc::new(WorkerStats::default());
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        stats.clone(),
    );

    let producer = Producer::new(system.substrate(), "beta");
    let handle = producer
        .enqueue(payload(json!({"job": 2, "mode": "transient"})), 5)
        .await
        .unwrap();

    // Attempt 0 fails and is hidden for 2s
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(worker.poll_once().await.unwrap(), 0);
    tokio::time::advance(Duration::from_millis(1999)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 0);

    // Attempt 1 fails and is hidden for 4s
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    tokio::time::advance(Duration::from_millis(3999)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 0);
    assert_eq!(fallback.calls(), 0);

    // Attempt 2 exhausts the budget and falls back
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    assert_eq!(primary.calls(), 3);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(
        substrate.redeliveries(),
        vec![Duration::from_secs(2), Duration::from_secs(4)]
    );
    match producer.outcome(&handle).await.unwrap() {
        Some(TaskOutcome::Succeeded { response }) => assert!(response.is_fallback),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(substrate.inner.queue_depth("beta"), 0);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.retries_scheduled, 2);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.fallback_completions, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_job_falls_back_without_redelivery() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().join("dlq.log"));
    let substrate = FlakySubstrate::new();
    let fallback = ScriptedClient::always(ClientVariant::Fallback, ok(ClientVariant::Fallback));

    let system = WorkerSystem::assemble(
        config.clone(),
        substrate.clone(),
        Arc::new(SimulatedBetaClient::new(0.0)),
        fallback.clone(),
    )
    .await
    .unwrap();
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        Arc::new(WorkerStats::default()),
    );

    let producer = Producer::new(system.substrate(), "beta");
    let handle = producer
        .enqueue(payload(json!({"job": 3, "mode": "fatal"})), 5)
        .await
        .unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert!(substrate.redeliveries().is_empty());
    assert_eq!(fallback.calls(), 1);
    assert!(producer.outcome(&handle).await.unwrap().unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_double_failure_lands_one_record_in_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.log");
    let config = test_config(path.clone());
    let substrate = FlakySubstrate::new();

    let system = WorkerSystem::assemble(
        config.clone(),
        substrate.clone(),
        Arc::new(SimulatedBetaClient::new(0.0)),
        Arc::new(SimulatedStableClient::new(1.0)),
    )
    .await
    .unwrap();
    let stats = Arc::new(WorkerStats::default());
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        stats.clone(),
    );
    let consumer = DeadLetterConsumer::new(
        system.substrate(),
        Arc::new(FileDeadLetterSink::new(&path).without_sync()),
        PollSettings::dead_letter(&config),
        stats.clone(),
    );

    let producer = Producer::new(system.substrate(), "beta");
    let handle = producer
        .enqueue(payload(json!({"job": 3, "mode": "fatal"})), 5)
        .await
        .unwrap();

    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 1);
    assert_eq!(substrate.inner.archived_messages("beta").len(), 1);

    match producer.outcome(&handle).await.unwrap() {
        Some(TaskOutcome::Failed { reason }) => {
            assert_eq!(reason, "fallback_after_primary_fatal: stable: random 5xx")
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    assert_eq!(consumer.poll_once().await.unwrap(), 1);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 0);

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reason, "fallback_after_primary_fatal: stable: random 5xx");
    assert_eq!(records[0].payload["job"], 3);
    assert_eq!(stats.snapshot().dead_letters_persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_higher_priority_is_dispatched_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path().join("dlq.log"));
    config.worker.batch_size = 1;
    let substrate = FlakySubstrate::new();
    let primary = ScriptedClient::always(ClientVariant::Primary, ok(ClientVariant::Primary));

    let system = WorkerSystem::assemble(
        config.clone(),
        substrate.clone(),
        primary.clone(),
        ScriptedClient::always(ClientVariant::Fallback, ok(ClientVariant::Fallback)),
    )
    .await
    .unwrap();
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        Arc::new(WorkerStats::default()),
    );

    let producer = Producer::new(system.substrate(), "beta");
    producer.enqueue(payload(json!({"job": "low"})), 9).await.unwrap();
    producer.enqueue(payload(json!({"job": "default"})), 5).await.unwrap();
    producer
        .submit(payload(json!({"job": "urgent"})), Priority::HIGHEST)
        .await
        .unwrap();

    for _ in 0..3 {
        assert_eq!(worker.poll_once().await.unwrap(), 1);
    }

    let order: Vec<_> = primary.seen().iter().map(|p| p["job"].clone()).collect();
    assert_eq!(order, vec![json!("urgent"), json!("default"), json!("low")]);
}

#[tokio::test]
async fn test_worker_pool_processes_demo_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.log");
    let mut config = test_config(path.clone());
    config.retry.base_backoff_seconds = 0;
    config.worker.poll_interval_ms = 10;
    config.worker.dispatch_workers = 2;

    let substrate = FlakySubstrate::new();
    let mut system = WorkerSystem::assemble(
        config,
        substrate.clone(),
        Arc::new(SimulatedBetaClient::new(0.0)),
        Arc::new(SimulatedStableClient::new(1.0)),
    )
    .await
    .unwrap();
    system.start();
    assert!(system.is_running());

    let producer = Producer::new(system.substrate(), "beta");
    let mut handles = Vec::new();
    for (payload, priority) in beta_worker::producer::demo_jobs() {
        handles.push(producer.submit(payload, priority).await.unwrap());
    }

    let finished = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let mut done = 0;
            for handle in &handles {
                if producer.outcome(handle).await.unwrap().is_some() {
                    done += 1;
                }
            }
            if done == handles.len() && read_records(&path).unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(finished.is_ok(), "demo jobs did not finish in time");

    let stats = system.stop().await.unwrap();
    assert!(!system.is_running());
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.dead_lettered, 2);
    assert_eq!(stats.retries_scheduled, 2);

    let outcomes: Vec<_> = futures::future::join_all(handles.iter().map(|h| producer.outcome(h)))
        .await
        .into_iter()
        .map(|o| o.unwrap().unwrap())
        .collect();
    assert!(outcomes[0].is_success());
    assert!(!outcomes[1].is_success());
    assert!(!outcomes[2].is_success());

    let mut reasons: Vec<_> = read_records(&path)
        .unwrap()
        .into_iter()
        .map(|r| r.reason)
        .collect();
    reasons.sort();
    assert_eq!(
        reasons,
        vec![
            "fallback_after_primary_fatal: stable: random 5xx".to_string(),
            "fallback_after_transient_exhausted: stable: random 5xx".to_string(),
        ]
    );

    assert_eq!(substrate.inner.queue_depth("beta"), 0);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unwritable_dead_letter_archives_without_requeue() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().join("dlq.log"));
    let substrate = FlakySubstrate::new();

    let system = WorkerSystem::assemble(
        config.clone(),
        substrate.clone(),
        Arc::new(SimulatedBetaClient::new(0.0)),
        ScriptedClient::always(ClientVariant::Fallback, Err(ApiError::fatal("stable: down"))),
    )
    .await
    .unwrap();
    let stats = Arc::new(WorkerStats::default());
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        stats.clone(),
    );

    let producer = Producer::new(system.substrate(), "beta");
    let handle = producer
        .enqueue(payload(json!({"job": 3, "mode": "fatal"})), 5)
        .await
        .unwrap();

    // Every dead-letter write attempt fails
    substrate.fail_next_enqueues(config.dead_letter.write_attempts);
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    match producer.outcome(&handle).await.unwrap() {
        Some(TaskOutcome::Failed { reason }) => {
            assert_eq!(reason, "fallback_after_primary_fatal: stable: down")
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(substrate.inner.queue_depth("beta"), 0);
    assert_eq!(substrate.inner.archived_messages("beta").len(), 1);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 0);

    // Well past the visibility timeout it is still gone
    tokio::time::advance(config.timeouts.visibility() * 2).await;
    assert_eq!(worker.poll_once().await.unwrap(), 0);

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.dead_letter_failures, 1);
    assert_eq!(snapshot.dead_lettered, 0);
    assert_eq!(snapshot.completed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_redelivery_returns_after_visibility_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path().join("dlq.log"));
    let substrate = FlakySubstrate::new();
    let primary = ScriptedClient::always(ClientVariant::Primary, Err(ApiError::transient("beta: 503")));
    let fallback = ScriptedClient::always(ClientVariant::Fallback, ok(ClientVariant::Fallback));

    let system = WorkerSystem::assemble(config.clone(), substrate.clone(), primary.clone(), fallback.clone())
        .await
        .unwrap();
    let stats = Arc::new(WorkerStats::default());
    let worker = DispatchWorker::new(
        0,
        system.dispatcher(),
        system.substrate(),
        PollSettings::primary(&config),
        stats.clone(),
    );

    let producer = Producer::new(system.substrate(), "beta");
    let handle = producer
        .enqueue(payload(json!({"job": 2, "mode": "transient"})), 5)
        .await
        .unwrap();

    substrate.fail_redelivery(true);
    assert_eq!(worker.poll_once().await.unwrap(), 1);

    // Left unacknowledged and unfinished
    assert_eq!(substrate.inner.queue_depth("beta"), 1);
    assert_eq!(producer.outcome(&handle).await.unwrap(), None);
    assert_eq!(stats.snapshot().redelivery_failures, 1);

    substrate.fail_redelivery(false);
    tokio::time::advance(config.timeouts.visibility() - Duration::from_millis(1)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 0);

    // The second delivery runs at attempt 1, so its backoff is 4s
    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(worker.poll_once().await.unwrap(), 1);
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 0);
    assert_eq!(substrate.redeliveries(), vec![Duration::from_secs(4)]);
    assert_eq!(stats.snapshot().retries_scheduled, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dead_letter_stays_queued_while_file_is_unwritable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dlq.log");
    let config = test_config(path.clone());
    let substrate = FlakySubstrate::new();
    substrate.ensure_queue("beta_dlq").await.unwrap();

    let record = DeadLetterRecord::new(
        payload(json!({"job": 7})),
        "fallback_after_transient_exhausted: stable: random 5xx",
    );
    substrate
        .enqueue("beta_dlq", &record.to_task_message().unwrap())
        .await
        .unwrap();

    let stats = Arc::new(WorkerStats::default());
    let failing = FailingSink::new();
    let broken = DeadLetterConsumer::new(
        substrate.clone(),
        failing.clone(),
        PollSettings::dead_letter(&config),
        stats.clone(),
    );

    assert_eq!(broken.poll_once().await.unwrap(), 1);
    assert_eq!(failing.attempts(), 1);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 1);
    assert_eq!(stats.snapshot().dead_letter_failures, 1);
    assert_eq!(stats.snapshot().dead_letters_persisted, 0);

    // Once storage recovers the same record is persisted
    tokio::time::advance(config.timeouts.visibility()).await;
    let healthy = DeadLetterConsumer::new(
        substrate.clone(),
        Arc::new(FileDeadLetterSink::new(&path).without_sync()),
        PollSettings::dead_letter(&config),
        stats.clone(),
    );
    assert_eq!(healthy.poll_once().await.unwrap(), 1);
    assert_eq!(substrate.inner.queue_depth("beta_dlq"), 0);

    let records = read_records(&path).unwrap();
    assert_eq!(records, vec![record]);
    assert_eq!(stats.snapshot().dead_letters_persisted, 1);
}
