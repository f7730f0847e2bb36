//! Dispatcher integration tests
//!
//! These drive the dispatcher against scripted backends and a counting
//! credential store, observing outcomes through a recording event sink.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{timeout, Instant};

use push_dispatch_service::backend::BackendRegistry;
use push_dispatch_service::dispatch::DispatcherConfig;
use push_dispatch_service::error::{DeliveryFailure, PushError, StoreError};
use push_dispatch_service::push::{
    DeliveryPoint, Notification, ProviderDevicePair, PushRequest, PushServiceProvider, ServiceType,
};
use push_dispatch_service::service::PushService;

use common::{harness, request, store_with_subscribers, Recorded, RecordingSink, ScriptedBackend, SERVICE};

#[tokio::test]
async fn test_success_emits_one_event_and_no_retry() {
    let backend = ScriptedBackend::always(Ok("m1".to_string()));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice"]),
    );

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(
        h.sink.events(),
        vec![Recorded::Success {
            subscriber: "alice".to_string(),
            delivery_point: "alice-phone".to_string(),
            message_id: "m1".to_string(),
            retry_count: 0,
        }]
    );
    assert_eq!(backend.calls(), 1);
    assert_eq!(h.scheduler.pending(), 0);

    let stats = h.dispatcher.stats();
    assert_eq!(stats.requests_processed, 1);
    assert_eq!(stats.deliveries_succeeded, 1);
    assert_eq!(stats.retries_scheduled, 0);
}

#[tokio::test]
async fn test_subscriber_without_delivery_points_is_silent() {
    let backend = ScriptedBackend::always(Ok("m1".to_string()));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice"]),
    );

    h.dispatcher.process(request(&["nobody"])).await;

    assert!(h.sink.events().is_empty());
    assert_eq!(backend.calls(), 0);
    assert_eq!(h.store.resolves(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_is_honoured_over_shorter_backoff() {
    let backend = ScriptedBackend::always(Err(PushError::retry(Duration::from_secs(10), "unavailable")));
    let mut h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice"]),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(h.scheduler.clone().run(shutdown_tx.subscribe()));

    let original = request(&["alice"]);
    let started = Instant::now();
    h.dispatcher.process(original.clone()).await;

    // Retried attempts are not reported until the retry settles
    assert!(h.sink.events().is_empty());
    assert_eq!(h.scheduler.pending(), 1);

    // Nothing fires before the backend's retry-after
    assert!(timeout(Duration::from_secs(9), h.ingress.recv()).await.is_err());

    let retry = h.ingress.recv().await.expect("retry should fire");
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(retry.id, original.id);
    assert_eq!(retry.retry_count, 1);
    assert_eq!(retry.backoff, Duration::from_secs(3));
    assert_eq!(retry.subscribers, vec!["alice".to_string()]);
    assert_eq!(
        retry.delivery_point.as_ref().map(|dp| dp.name.as_str()),
        Some("alice-phone")
    );
    assert!(Arc::ptr_eq(&retry.notification, &original.notification));
    assert!(retry.is_single_delivery_point());

    shutdown_tx.send(()).unwrap();
    scheduler_handle.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retry_is_dropped_silently() {
    let backend = ScriptedBackend::always(Err(PushError::retry(Duration::ZERO, "unavailable")));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&[]),
    );

    let pair = ProviderDevicePair::new(
        Arc::new(PushServiceProvider::new("app", ServiceType::Fcm)),
        Arc::new(DeliveryPoint::new("alice-phone", ServiceType::Fcm)),
    );
    let mut exhausted = PushRequest::builder(SERVICE, Notification::new())
        .subscriber("alice")
        .target(pair)
        .build();
    exhausted.retry_count = 3;
    exhausted.backoff = Duration::from_secs(12);

    h.dispatcher.process(Arc::new(exhausted)).await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(h.scheduler.pending(), 0);
    assert!(h.sink.events().is_empty());
    // Single-target requests skip the credential store
    assert_eq!(h.store.resolves(), 0);

    let stats = h.dispatcher.stats();
    assert_eq!(stats.single_point_requests, 1);
    assert_eq!(stats.retries_dropped, 1);
}

#[tokio::test]
async fn test_delivery_point_refresh_writes_back_and_counts_as_delivered() {
    let refreshed = DeliveryPoint::new("alice-phone", ServiceType::Fcm).with_data("regid", "rotated");
    let backend = ScriptedBackend::always(Err(
        PushError::refresh_delivery_point(refreshed.clone()).with_message_id("m2")
    ));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice"]),
    );

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(h.store.delivery_point_updates(), 1);
    assert_eq!(h.store.provider_updates(), 0);
    assert_eq!(
        h.store.inner.delivery_point("alice-phone").as_deref(),
        Some(&refreshed)
    );
    assert_eq!(
        h.sink.events(),
        vec![Recorded::Success {
            subscriber: "alice".to_string(),
            delivery_point: "alice-phone".to_string(),
            message_id: "m2".to_string(),
            retry_count: 0,
        }]
    );
    assert_eq!(h.scheduler.pending(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_provider_refresh_with_retry_residual_is_retried() {
    let mut refreshed = PushServiceProvider::new("app", ServiceType::Fcm);
    refreshed.volatile_data.insert("token".to_string(), "fresh".to_string());
    let backend = ScriptedBackend::always(Err(PushError::refresh_provider(refreshed)
        .with_residual(PushError::retry(Duration::from_secs(5), "rate limited"))));
    let mut h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice"]),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(h.scheduler.clone().run(shutdown_tx.subscribe()));

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(h.store.provider_updates(), 1);
    let stored = h.store.inner.provider("app").unwrap();
    assert_eq!(stored.volatile_data.get("token").map(String::as_str), Some("fresh"));
    assert_eq!(h.scheduler.pending(), 1);
    assert!(h.sink.events().is_empty());

    // The retry carries the refreshed provider, not the one it was resolved with
    let retry = h.ingress.recv().await.expect("retry should fire");
    let provider = retry.provider.as_ref().expect("retry carries its provider");
    assert_eq!(provider.volatile_data.get("token").map(String::as_str), Some("fresh"));

    shutdown_tx.send(()).unwrap();
    scheduler_handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delivery_point_refresh_with_retry_residual_retries_new_endpoint() {
    let refreshed = DeliveryPoint::new("alice-phone", ServiceType::Fcm).with_data("regid", "reg-new");
    let backend = ScriptedBackend::always(Err(PushError::refresh_delivery_point(refreshed)
        .with_residual(PushError::retry(Duration::ZERO, "unavailable"))));
    let mut h = harness(
        DispatcherConfig::default(),
        backend,
        store_with_subscribers(&["alice"]),
    );
    let (shutdown_tx, _) = broadcast::channel(1);
    let scheduler_handle = tokio::spawn(h.scheduler.clone().run(shutdown_tx.subscribe()));

    h.dispatcher.process(request(&["alice"])).await;
    assert_eq!(h.store.delivery_point_updates(), 1);

    let retry = h.ingress.recv().await.expect("retry should fire");
    let dp = retry.delivery_point.as_ref().expect("retry carries its delivery point");
    assert_eq!(dp.data.get("regid").map(String::as_str), Some("reg-new"));

    shutdown_tx.send(()).unwrap();
    scheduler_handle.await.unwrap();
}

#[tokio::test]
async fn test_huge_retry_after_is_scheduled_for_every_subscriber() {
    let backend = ScriptedBackend::always(Err(PushError::retry(
        Duration::from_secs(u64::MAX),
        "come back much later",
    )));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&["alice", "bob"]),
    );

    h.dispatcher.process(request(&["alice", "bob"])).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(h.scheduler.pending(), 2);
    assert_eq!(h.dispatcher.stats().retries_scheduled, 2);
    assert!(h.sink.events().is_empty());
}

#[tokio::test]
async fn test_nested_refresh_residual_is_permanent() {
    let inner = PushError::refresh_provider(PushServiceProvider::new("app", ServiceType::Fcm));
    let backend = ScriptedBackend::always(Err(PushError::refresh_provider(
        PushServiceProvider::new("app", ServiceType::Fcm),
    )
    .with_residual(inner.clone())));
    let h = harness(
        DispatcherConfig::default(),
        backend,
        store_with_subscribers(&["alice"]),
    );

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(h.store.provider_updates(), 1);
    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(
        h.sink.failures(),
        vec![Recorded::Failure {
            subscriber: "alice".to_string(),
            delivery_point: Some("alice-phone".to_string()),
            error: DeliveryFailure::Push(inner),
        }]
    );
}

#[tokio::test]
async fn test_permanent_failure_is_reported_once() {
    let backend = ScriptedBackend::always(Err(PushError::backend("NotRegistered")));
    let h = harness(
        DispatcherConfig::default(),
        backend,
        store_with_subscribers(&["alice"]),
    );

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(
        h.sink.events(),
        vec![Recorded::Failure {
            subscriber: "alice".to_string(),
            delivery_point: Some("alice-phone".to_string()),
            error: DeliveryFailure::Push(PushError::backend("NotRegistered")),
        }]
    );
    assert_eq!(h.scheduler.pending(), 0);
    assert_eq!(h.dispatcher.stats().deliveries_failed, 1);
}

#[tokio::test]
async fn test_store_failure_is_isolated_to_its_subscriber() {
    let backend = ScriptedBackend::always(Ok("ok".to_string()));
    let store = store_with_subscribers(&["alice", "bob", "carol"]);
    store.fail_for("bob");
    let h = harness(DispatcherConfig::default(), backend.clone(), store);

    h.dispatcher.process(request(&["alice", "bob", "carol"])).await;

    let mut delivered: Vec<_> = h
        .sink
        .successes()
        .into_iter()
        .filter_map(|e| match e {
            Recorded::Success { subscriber, .. } => Some(subscriber),
            _ => None,
        })
        .collect();
    delivered.sort();
    assert_eq!(delivered, vec!["alice".to_string(), "carol".to_string()]);

    assert_eq!(
        h.sink.failures(),
        vec![Recorded::Failure {
            subscriber: "bob".to_string(),
            delivery_point: None,
            error: DeliveryFailure::Store(StoreError::Unavailable("connection reset".to_string())),
        }]
    );
    assert_eq!(backend.calls(), 2);
    assert_eq!(h.dispatcher.stats().lookups_failed, 1);
}

#[tokio::test]
async fn test_invalid_provider_is_skipped() {
    let backend = ScriptedBackend::always(Ok("ok".to_string()));
    let store = store_with_subscribers(&["alice"]);
    let mut corrupt = PushServiceProvider::new("corrupt", ServiceType::Fcm);
    corrupt.service_id = 99;
    store.append_pair(ProviderDevicePair::new(
        Arc::new(corrupt),
        Arc::new(DeliveryPoint::new("alice-tablet", ServiceType::Fcm)),
    ));
    let h = harness(DispatcherConfig::default(), backend.clone(), store);

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(backend.seen(), vec!["alice-phone".to_string()]);
    assert_eq!(h.sink.successes().len(), 1);
    assert!(h.sink.failures().is_empty());
}

#[tokio::test]
async fn test_every_pair_of_a_subscriber_is_attempted_in_order() {
    let backend = ScriptedBackend::scripted(
        vec![Err(PushError::backend("NotRegistered"))],
        Ok("ok".to_string()),
    );
    let store = store_with_subscribers(&["alice"]);
    store
        .inner
        .subscribe(SERVICE, "alice", DeliveryPoint::new("alice-tablet", ServiceType::Fcm))
        .unwrap();
    let h = harness(DispatcherConfig::default(), backend.clone(), store);

    h.dispatcher.process(request(&["alice"])).await;

    assert_eq!(
        backend.seen(),
        vec!["alice-phone".to_string(), "alice-tablet".to_string()]
    );
    assert_eq!(h.sink.failures().len(), 1);
    assert_eq!(h.sink.successes().len(), 1);
}

#[tokio::test]
async fn test_fanout_reaches_every_subscriber_once() {
    let names: Vec<String> = (0..2000).map(|i| format!("user-{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let backend = ScriptedBackend::always(Ok("ok".to_string()));
    let h = harness(
        DispatcherConfig::default(),
        backend.clone(),
        store_with_subscribers(&refs),
    );

    h.dispatcher.process(request(&refs)).await;

    assert_eq!(h.store.resolves(), 2000);
    assert_eq!(backend.calls(), 2000);

    let mut seen = backend.seen();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 2000);
    assert_eq!(h.sink.successes().len(), 2000);
}

#[tokio::test]
async fn test_fanout_with_small_worker_bound() {
    let names: Vec<String> = (0..10).map(|i| format!("user-{}", i)).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();

    let backend = ScriptedBackend::always(Ok("ok".to_string()));
    let config = DispatcherConfig {
        max_workers: 3,
        ..DispatcherConfig::default()
    };
    let h = harness(config, backend.clone(), store_with_subscribers(&refs));

    h.dispatcher.process(request(&refs)).await;

    assert_eq!(backend.calls(), 10);
    assert_eq!(h.sink.successes().len(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_retry_chain_stops_at_max_retries() {
    let backend = ScriptedBackend::always(Err(PushError::retry(Duration::ZERO, "unavailable")));
    let store = store_with_subscribers(&["alice"]);
    let sink = Arc::new(RecordingSink::default());

    let mut registry = BackendRegistry::new();
    registry.register(ServiceType::Fcm, backend.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let (service, handles) = PushService::start(
        DispatcherConfig::default(),
        16,
        Arc::new(registry),
        store,
        sink.clone(),
        &shutdown_tx,
    );

    let id = service
        .submit(PushRequest::new(SERVICE, vec!["alice".to_string()], Notification::new()))
        .await;
    tokio_test::assert_ok!(id);

    // Attempts at 0s, 3s, 9s and 21s
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(backend.calls(), 3);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(backend.calls(), 4);
    assert_eq!(service.scheduler().pending(), 0);

    let stats = service.dispatcher().stats();
    assert_eq!(stats.retries_scheduled, 3);
    assert_eq!(stats.retries_dropped, 1);
    assert_eq!(stats.requests_processed, 4);
    assert!(sink.events().is_empty());

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Start a service with `backend` in the FCM slot and one subscriber, submit
/// a push to it and let the retry chain play out.
async fn run_through_service(backend: Arc<ScriptedBackend>) -> Arc<RecordingSink> {
    let sink = Arc::new(RecordingSink::default());
    let mut registry = BackendRegistry::new();
    registry.register(ServiceType::Fcm, backend);

    let (shutdown_tx, _) = broadcast::channel(1);
    let (service, handles) = PushService::start(
        DispatcherConfig::default(),
        16,
        Arc::new(registry),
        store_with_subscribers(&["alice"]),
        sink.clone(),
        &shutdown_tx,
    );

    tokio_test::assert_ok!(
        service
            .submit(PushRequest::new(SERVICE, vec!["alice".to_string()], Notification::new()))
            .await
    );
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(service.scheduler().pending(), 0);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
    sink
}

#[tokio::test(start_paused = true)]
async fn test_successful_retry_reports_once() {
    let backend = ScriptedBackend::scripted(
        vec![Err(PushError::retry(Duration::ZERO, "unavailable"))],
        Ok("m2".to_string()),
    );

    let sink = run_through_service(backend.clone()).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(
        sink.events(),
        vec![Recorded::Success {
            subscriber: "alice".to_string(),
            delivery_point: "alice-phone".to_string(),
            message_id: "m2".to_string(),
            retry_count: 1,
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_failing_permanently_reports_once() {
    let backend = ScriptedBackend::scripted(
        vec![Err(PushError::retry(Duration::ZERO, "unavailable"))],
        Err(PushError::backend("NotRegistered")),
    );

    let sink = run_through_service(backend.clone()).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(
        sink.events(),
        vec![Recorded::Failure {
            subscriber: "alice".to_string(),
            delivery_point: Some("alice-phone".to_string()),
            error: DeliveryFailure::Push(PushError::backend("NotRegistered")),
        }]
    );
}

#[tokio::test]
async fn test_submit_rejects_empty_requests() {
    let (shutdown_tx, _) = broadcast::channel(1);
    let (service, handles) = PushService::start(
        DispatcherConfig::default(),
        16,
        Arc::new(BackendRegistry::new()),
        store_with_subscribers(&[]),
        Arc::new(RecordingSink::default()),
        &shutdown_tx,
    );

    let no_subscribers = PushRequest::new(SERVICE, Vec::new(), Notification::new());
    tokio_test::assert_err!(service.submit(no_subscribers).await);

    let no_service = PushRequest::new("  ", vec!["alice".to_string()], Notification::new());
    tokio_test::assert_err!(service.submit(no_service).await);

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}
