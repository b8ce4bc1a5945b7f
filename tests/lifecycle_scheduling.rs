//! Lifecycle scheduling tests
//!
//! Ordering, non-overlap, delayed-flush coalescing and event delivery,
//! driven through the public provider and scheduler against the mock cache.

use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use disk_cache_provider::mock::{CacheCall, MockDiskCache};
use disk_cache_provider::{CacheProvider, LifecycleError, LifecycleOperation, TaskState};

const WAIT: Duration = Duration::from_secs(5);

fn provider_with_mock() -> (Arc<CacheProvider>, MockDiskCache) {
    let mock = MockDiskCache::new();
    let provider = CacheProvider::new(Arc::new(mock.clone())).unwrap();
    (Arc::new(provider), mock)
}

fn expected_call(operation: LifecycleOperation) -> CacheCall {
    match operation {
        LifecycleOperation::Init => CacheCall::Open,
        LifecycleOperation::Close => CacheCall::Close,
        LifecycleOperation::Flush => CacheCall::Flush,
    }
}

// =============================================================================
// FIFO and non-overlap
// =============================================================================

#[test]
fn test_concurrent_submissions_run_in_order_without_overlap() {
    let (provider, mock) = provider_with_mock();
    mock.inject_delay(CacheCall::Flush, Duration::from_millis(2));

    // Submission order as seen by the queue. Recording and submitting under
    // one lock pins the order the worker must follow.
    let submitted = Arc::new(Mutex::new(Vec::new()));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let provider = Arc::clone(&provider);
            let submitted = Arc::clone(&submitted);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..25 {
                    let operation = LifecycleOperation::ALL[(t + i) % 3];
                    let mut order = submitted.lock().unwrap();
                    order.push(operation);
                    match operation {
                        LifecycleOperation::Init => provider.open_async(),
                        LifecycleOperation::Close => provider.close_async(),
                        LifecycleOperation::Flush => provider.flush_async(),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    // Everything before this marker has drained once it completes.
    provider.flush_tracked().wait_timeout(WAIT).ok();

    let mut expected: Vec<_> = submitted
        .lock()
        .unwrap()
        .iter()
        .map(|op| expected_call(*op))
        .collect();
    expected.push(CacheCall::Flush);

    assert_eq!(mock.calls(), expected);
    assert_eq!(mock.max_concurrent_lifecycle(), 1);
}

#[test]
fn test_lifecycle_never_runs_on_caller_thread() {
    let (provider, mock) = provider_with_mock();
    let caller = thread::current().id();
    let (tx, rx) = mpsc::channel();
    mock.on_call(CacheCall::Open, move || {
        let _ = tx.send(thread::current().id());
    });

    provider.open_async();

    let executed_on = rx.recv_timeout(WAIT).unwrap();
    assert_ne!(executed_on, caller);
}

// =============================================================================
// Delayed flush coalescing
// =============================================================================

#[test]
fn test_burst_of_delayed_flushes_runs_once_after_delay() {
    let (provider, mock) = provider_with_mock();
    provider.open_tracked().wait_timeout(WAIT).unwrap();

    let (tx, rx) = mpsc::channel();
    provider.set_event_handler(move |op: LifecycleOperation| {
        let _ = tx.send((op, Instant::now()));
    });

    let first_call = Instant::now();
    for _ in 0..10 {
        provider.flush_async_with_delay(Duration::from_millis(500));
        thread::sleep(Duration::from_millis(10));
    }
    assert!(first_call.elapsed() < Duration::from_millis(500));

    let (op, fired_at) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(op, LifecycleOperation::Flush);
    assert!(fired_at.duration_since(first_call) >= Duration::from_millis(500));

    // No second flush trails behind.
    assert!(rx.recv_timeout(Duration::from_millis(700)).is_err());
    assert_eq!(mock.count(CacheCall::Flush), 1);
}

#[test]
fn test_delayed_flush_rearms_once_previous_starts() {
    let (provider, mock) = provider_with_mock();
    provider.open_tracked().wait_timeout(WAIT).unwrap();
    mock.inject_delay(CacheCall::Flush, Duration::from_millis(150));

    let (tx, rx) = mpsc::channel();
    mock.on_call(CacheCall::Flush, move || {
        let _ = tx.send(());
    });

    let first = provider
        .flush_tracked_with_delay(Duration::from_millis(20))
        .unwrap();
    assert!(provider
        .flush_tracked_with_delay(Duration::from_millis(20))
        .is_none());

    rx.recv_timeout(WAIT).unwrap();
    assert!(!provider.scheduler().is_delayed_flush_pending());

    let second = provider
        .flush_tracked_with_delay(Duration::from_millis(20))
        .expect("new delayed flush accepted while previous executes");

    first.wait_timeout(WAIT).unwrap();
    second.wait_timeout(WAIT).unwrap();
    assert_eq!(mock.count(CacheCall::Flush), 2);
}

#[test]
fn test_oversized_flush_delay_does_not_panic_caller() {
    let (provider, mock) = provider_with_mock();
    provider.open_tracked().wait_timeout(WAIT).unwrap();

    provider.flush_async_with_delay(Duration::MAX);
    assert!(provider.scheduler().is_delayed_flush_pending());

    // The far-off flush covers later delayed requests; immediate ones still run.
    assert!(provider
        .flush_tracked_with_delay(Duration::from_millis(10))
        .is_none());
    provider.flush_tracked().wait_timeout(WAIT).unwrap();
    assert_eq!(mock.count(CacheCall::Flush), 1);
}

#[test]
fn test_delayed_flush_after_shutdown_does_not_block_later_requests() {
    let (provider, _mock) = provider_with_mock();
    provider.scheduler().shutdown();

    for _ in 0..3 {
        let ticket = provider
            .flush_tracked_with_delay(Duration::from_millis(10))
            .expect("guard released after a failed arm");
        assert!(matches!(
            ticket.wait_timeout(WAIT),
            Err(LifecycleError::Abandoned(LifecycleOperation::Flush))
        ));
    }
    assert!(!provider.scheduler().is_delayed_flush_pending());
}

#[test]
fn test_submit_after_returns_immediately() {
    let (provider, _mock) = provider_with_mock();
    let start = Instant::now();
    let ticket = provider
        .flush_tracked_with_delay(Duration::from_secs(30))
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(ticket.state(), TaskState::Scheduled);
}

// =============================================================================
// Event delivery
// =============================================================================

#[test]
fn test_one_event_per_operation_with_matching_tag() {
    let (provider, mock) = provider_with_mock();
    let (tx, rx) = mpsc::channel();
    provider.set_event_handler(move |op: LifecycleOperation| {
        let _ = tx.send(op);
    });

    // Flush on a closed cache fails; its event still fires.
    provider.flush_async();
    provider.open_async();
    provider.flush_async_with_delay(Duration::from_millis(30));
    provider.close_async();

    let mut seen: Vec<_> = (0..4).map(|_| rx.recv_timeout(WAIT).unwrap()).collect();
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert_eq!(
        &seen[..2],
        &[LifecycleOperation::Flush, LifecycleOperation::Init]
    );
    seen.sort_by_key(|op| op.code());
    assert_eq!(
        seen,
        vec![
            LifecycleOperation::Init,
            LifecycleOperation::Close,
            LifecycleOperation::Flush,
            LifecycleOperation::Flush
        ]
    );
    assert_eq!(mock.count(CacheCall::Flush), 2);
}

#[test]
fn test_event_fires_after_failed_operation() {
    let (provider, mock) = provider_with_mock();
    mock.inject_error(CacheCall::Open, "permission denied");
    let (tx, rx) = mpsc::channel();
    provider.set_event_handler(move |op: LifecycleOperation| {
        let _ = tx.send(op);
    });

    let ticket = provider.open_tracked();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), LifecycleOperation::Init);
    match ticket.wait_timeout(WAIT) {
        Err(LifecycleError::Io { operation, source }) => {
            assert_eq!(operation, LifecycleOperation::Init);
            assert!(source.to_string().contains("permission denied"));
        }
        other => panic!("expected I/O failure, got {:?}", other),
    }
}

#[test]
fn test_handler_replaced_mid_flight_only_new_handler_sees_later_events() {
    let (provider, mock) = provider_with_mock();
    mock.inject_delay(CacheCall::Open, Duration::from_millis(100));

    let old_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&old_events);
    provider.set_event_handler(move |op: LifecycleOperation| sink.lock().unwrap().push(op));

    let (started_tx, started_rx) = mpsc::channel();
    mock.on_call(CacheCall::Open, move || {
        let _ = started_tx.send(());
    });

    let ticket = provider.open_tracked();
    started_rx.recv_timeout(WAIT).unwrap();

    // Open is executing; swap the handler before it completes.
    let new_events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&new_events);
    provider.set_event_handler(move |op: LifecycleOperation| sink.lock().unwrap().push(op));

    ticket.wait_timeout(WAIT).unwrap();
    provider.close_tracked().wait_timeout(WAIT).unwrap();

    assert!(old_events.lock().unwrap().is_empty());
    assert_eq!(
        *new_events.lock().unwrap(),
        vec![LifecycleOperation::Init, LifecycleOperation::Close]
    );
}

#[test]
fn test_panicking_handler_does_not_stop_worker() {
    let (provider, mock) = provider_with_mock();
    provider.set_event_handler(|_: LifecycleOperation| panic!("handler bug"));

    provider.open_tracked().wait_timeout(WAIT).unwrap();
    provider.close_tracked().wait_timeout(WAIT).unwrap();

    assert_eq!(mock.calls(), vec![CacheCall::Open, CacheCall::Close]);
}

// =============================================================================
// Teardown
// =============================================================================

#[test]
fn test_dropping_provider_abandons_pending_delayed_flush() {
    let (provider, mock) = provider_with_mock();
    let ticket = provider
        .flush_tracked_with_delay(Duration::from_millis(200))
        .unwrap();

    drop(provider);

    assert!(matches!(
        ticket.wait_timeout(WAIT),
        Err(LifecycleError::Abandoned(LifecycleOperation::Flush))
    ));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(mock.count(CacheCall::Flush), 0);
}
