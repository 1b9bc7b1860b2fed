//! End-to-end behaviour of the scheduler and the event bus, on paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::broadcast;

use spindle_core::bus::{BusEvent, ConnectionState, EventBus};
use spindle_core::domain::{EventId, EventMessage, EventType, SearchIndex, TaskId};
use spindle_core::impls::ChannelTransport;
use spindle_core::ports::{AnonymousSession, SystemClock, TokioClock, UlidGenerator};
use spindle_core::queue::RetryPolicy;
use spindle_core::{
    EventBusConfig, ExecutionError, Priority, ProgressReporter, Scheduler, SchedulerConfig,
    TaskKind, TaskPayload, TaskRequest, TaskStatus, executor_fn,
};

fn index(doc: &str) -> TaskPayload {
    TaskPayload::SearchIndex(SearchIndex {
        document_id: doc.to_string(),
    })
}

fn document_id(payload: &TaskPayload) -> String {
    match payload {
        TaskPayload::SearchIndex(doc) => doc.document_id.clone(),
        other => panic!("unexpected payload {other:?}"),
    }
}

fn config(concurrency: usize) -> SchedulerConfig {
    SchedulerConfig {
        concurrency,
        retry: RetryPolicy::new(Duration::from_millis(10), Duration::from_secs(1)),
        ..SchedulerConfig::default()
    }
}

async fn wait_for(scheduler: &Scheduler, task_id: TaskId, status: TaskStatus) {
    loop {
        if scheduler.task(task_id).map(|t| t.status()) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn next_update(rx: &mut broadcast::Receiver<BusEvent>) -> Value {
    loop {
        let event = rx.recv().await.unwrap();
        if event.message.event_type == EventType::QueueUpdate {
            return event.message.payload;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn scenario_a_dispatch_follows_priority() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&order);
    let scheduler = Scheduler::builder()
        .register(
            TaskKind::SearchIndex,
            executor_fn(move |payload: TaskPayload, _progress: ProgressReporter| {
                seen.lock().unwrap().push(document_id(&payload));
                async { Ok::<Value, ExecutionError>(Value::Null) }
            }),
        )
        .unwrap()
        .config(config(1))
        .clock(Arc::new(TokioClock::new()))
        .build()
        .unwrap();

    let low = scheduler.enqueue(TaskRequest::new(index("low")).with_priority(Priority::Low));
    scheduler.enqueue(TaskRequest::new(index("high")).with_priority(Priority::High));
    scheduler.enqueue(TaskRequest::new(index("normal")).with_priority(Priority::Normal));
    scheduler.start();

    wait_for(&scheduler, low, TaskStatus::Completed).await;
    assert_eq!(*order.lock().unwrap(), vec!["high", "normal", "low"]);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_b_exhausted_retries_fail_the_task() {
    let scheduler = Scheduler::builder()
        .register(
            TaskKind::SearchIndex,
            executor_fn(|_payload: TaskPayload, _progress: ProgressReporter| async {
                Err::<Value, _>(ExecutionError::transient("search backend unavailable"))
            }),
        )
        .unwrap()
        .config(config(3))
        .clock(Arc::new(TokioClock::new()))
        .build()
        .unwrap();
    let mut rx = scheduler.bus().subscribe();
    scheduler.start();

    let task_id = scheduler.enqueue(TaskRequest::new(index("doc")).with_max_retries(2));
    wait_for(&scheduler, task_id, TaskStatus::Failed).await;

    let task = scheduler.task(task_id).unwrap();
    assert_eq!(task.attempts(), 3);
    assert_eq!(task.retry_count(), 2);
    assert_eq!(task.last_error(), Some("search backend unavailable"));
    assert!(task.failed_at().is_some());

    let samples = scheduler.metrics();
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| !s.success));
    assert_eq!(samples.iter().map(|s| s.attempt).collect::<Vec<_>>(), vec![1, 2, 3]);

    assert_eq!(next_update(&mut rx).await["action"], "added");
    let first = next_update(&mut rx).await;
    assert_eq!(first["action"], "retrying");
    assert_eq!(first["retryCount"], 1);
    assert_eq!(first["delayMs"], 20);
    let second = next_update(&mut rx).await;
    assert_eq!(second["retryCount"], 2);
    assert_eq!(second["delayMs"], 40);
    let last = next_update(&mut rx).await;
    assert_eq!(last["action"], "failed");
    assert_eq!(last["error"], "search backend unavailable");

    let status = scheduler.status();
    assert_eq!(status.failed_items, 1);
    assert_eq!(status.pending_items + status.retrying_items, 0);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_c_concurrency_limit_is_respected() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    let scheduler = Scheduler::builder()
        .register(
            TaskKind::SearchIndex,
            executor_fn(move |_payload: TaskPayload, _progress: ProgressReporter| {
                let (running, peak) = (Arc::clone(&r), Arc::clone(&p));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<Value, ExecutionError>(Value::Null)
                }
            }),
        )
        .unwrap()
        .config(config(2))
        .clock(Arc::new(TokioClock::new()))
        .build()
        .unwrap();

    let ids: Vec<TaskId> = (0..5)
        .map(|i| scheduler.enqueue(index(&format!("doc-{i}"))))
        .collect();
    scheduler.start();

    tokio::time::sleep(Duration::from_millis(500)).await;
    let status = scheduler.status();
    assert_eq!(status.processing_items, 2);
    assert_eq!(status.pending_items, 3);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(scheduler.status().processing_items, 2);

    for id in &ids {
        wait_for(&scheduler, *id, TaskStatus::Completed).await;
    }
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.status().completed_items, 5);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_d_cancelled_task_is_never_dispatched() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let scheduler = Scheduler::builder()
        .register(
            TaskKind::SearchIndex,
            executor_fn(move |payload: TaskPayload, _progress: ProgressReporter| {
                seen.lock().unwrap().push(document_id(&payload));
                async {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok::<Value, ExecutionError>(Value::Null)
                }
            }),
        )
        .unwrap()
        .config(config(1))
        .clock(Arc::new(TokioClock::new()))
        .build()
        .unwrap();
    scheduler.start();

    let blocker = scheduler.enqueue(index("blocker"));
    wait_for(&scheduler, blocker, TaskStatus::Processing).await;
    let doomed = scheduler.enqueue(index("doomed"));

    assert!(scheduler.cancel(doomed));
    assert!(!scheduler.cancel(blocker));

    let status = scheduler.status();
    assert_eq!(status.pending_items, 0);
    assert_eq!(status.processing_items, 1);
    assert_eq!(status.cancelled_items, 1);
    assert_eq!(scheduler.task(doomed).unwrap().status(), TaskStatus::Cancelled);

    wait_for(&scheduler, blocker, TaskStatus::Completed).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*calls.lock().unwrap(), vec!["blocker"]);

    assert_eq!(scheduler.prune(), 2);
    assert_eq!(scheduler.status().total_items, 0);

    scheduler.shutdown().await;
}

fn notification(text: &str) -> EventMessage {
    EventMessage::new(
        EventId::from_ulid(ulid::Ulid::new()),
        EventType::UserNotification,
        json!({ "message": text }),
        chrono::Utc::now(),
    )
}

#[tokio::test(start_paused = true)]
async fn scenario_e_publish_survives_a_disconnect() {
    let (transport, mut server) = ChannelTransport::pair();
    let bus = EventBus::spawn(
        Arc::new(transport),
        Arc::new(AnonymousSession),
        Arc::new(UlidGenerator::new(SystemClock)),
        Arc::new(SystemClock),
        &EventBusConfig {
            reconnect: RetryPolicy::new(Duration::from_millis(50), Duration::from_millis(400)),
            ..EventBusConfig::default()
        },
    );
    let mut state = bus.watch_state();

    let mut conn = server.accept().await.unwrap();
    assert_eq!(conn.recv_message().await.unwrap().event_type, EventType::SystemStatus);
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    // outage
    server.set_online(false);
    drop(conn);
    state.wait_for(|s| *s != ConnectionState::Connected).await.unwrap();
    for i in 0..3 {
        bus.publish(notification(&format!("lost-{i}")));
    }
    tokio::time::sleep(Duration::from_secs(1)).await;
    let attempts_while_down = server.connect_attempts();
    assert!(attempts_while_down >= 2);

    // recovery
    server.set_online(true);
    let mut conn = server.accept().await.unwrap();
    assert_eq!(conn.recv_message().await.unwrap().event_type, EventType::SystemStatus);
    state.wait_for(|s| *s == ConnectionState::Connected).await.unwrap();

    let msg = notification("after reconnect");
    bus.publish(msg.clone());
    assert_eq!(conn.recv_message().await.unwrap(), msg);

    bus.shutdown().await;
    assert_eq!(bus.state(), ConnectionState::Disconnected);
}
