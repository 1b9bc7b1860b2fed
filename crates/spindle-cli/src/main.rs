use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};

use spindle_core::bus::{BusEvent, Subscribe};
use spindle_core::domain::{
    BatchOperation, FileValidation, MediaRef, MediaUpload, PlaceSync, SearchIndex, VersionCreate,
};
use spindle_core::impls::TcpTransport;
use spindle_core::ports::{Clock, IdGenerator, SessionProvider, StaticSession, SystemClock, UlidGenerator};
use spindle_core::{
    EventBus, EventBusConfig, ExecutionError, Priority, ProgressReporter, Scheduler,
    SchedulerConfig, TaskExecutor, TaskKind, TaskPayload, TaskRequest,
};

/// Pretends to do work in a few progress steps. Fails transiently a fixed
/// number of times first.
struct SimulatedExecutor {
    step: Duration,
    remaining_failures: AtomicU32,
}

impl SimulatedExecutor {
    fn new(step_ms: u64, failures: u32) -> Self {
        Self {
            step: Duration::from_millis(step_ms),
            remaining_failures: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl TaskExecutor for SimulatedExecutor {
    async fn execute(
        &self,
        payload: &TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, ExecutionError> {
        for p in [25, 50, 75] {
            sleep(self.step).await;
            progress.report(p).await;
        }

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ExecutionError::transient(format!(
                "simulated outage (left={left})"
            )));
        }

        sleep(self.step).await;
        Ok(json!({ "kind": payload.kind(), "simulated": true }))
    }
}

/// Rejects file types the backend would refuse. Never worth retrying.
struct FileValidator;

const ACCEPTED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "mp4", "webp"];

#[async_trait]
impl TaskExecutor for FileValidator {
    async fn execute(
        &self,
        payload: &TaskPayload,
        progress: &ProgressReporter,
    ) -> Result<Value, ExecutionError> {
        let TaskPayload::FileValidation(file) = payload else {
            return Err(ExecutionError::terminal("expected a file_validation payload"));
        };
        progress.report(50).await;

        let extension = file
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !ACCEPTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ExecutionError::terminal(format!(
                "unsupported file type: {}",
                file.file_name
            )));
        }
        Ok(json!({ "fileName": file.file_name, "valid": true }))
    }
}

/// Logs every queue update seen on the bus.
struct QueueLogger;

#[async_trait]
impl Subscribe for QueueLogger {
    async fn on_event(&self, event: &BusEvent) {
        let payload = &event.message.payload;
        info!(
            direction = ?event.direction,
            event_type = ?event.message.event_type,
            action = payload["action"].as_str().unwrap_or("-"),
            "bus event"
        );
    }

    fn name(&self) -> &'static str {
        "queue-logger"
    }
}

fn demo_requests() -> Vec<TaskRequest> {
    vec![
        TaskRequest::new(TaskPayload::SearchIndex(SearchIndex {
            document_id: "doc-42".into(),
        }))
        .with_priority(Priority::Low),
        TaskRequest::new(TaskPayload::MediaUpload(MediaUpload {
            file_name: "sunrise.jpg".into(),
            title: "Sunrise over the bay".into(),
            description: String::new(),
            tags: vec!["landscape".into()],
            attraction_id: Some("attr-7".into()),
        }))
        .with_priority(Priority::High),
        TaskRequest::new(TaskPayload::MediaProcess(MediaRef {
            media_id: "media-1".into(),
        })),
        TaskRequest::new(TaskPayload::MediaEncrypt(MediaRef {
            media_id: "media-1".into(),
        })),
        TaskRequest::new(TaskPayload::PlaceSync(PlaceSync {
            place_id: "place-9".into(),
        }))
        .with_priority(Priority::Critical),
        TaskRequest::new(TaskPayload::VersionCreate(VersionCreate {
            target_id: "place-9".into(),
            note: Some("nightly snapshot".into()),
        })),
        TaskRequest::new(TaskPayload::BatchOperation(BatchOperation {
            operations: vec![json!({ "op": "tag", "id": "media-1" })],
        }))
        .with_max_retries(1),
        TaskRequest::new(TaskPayload::FileValidation(FileValidation {
            file_name: "notes.exe".into(),
        })),
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // (A) チャネル: 接続先は SPINDLE_API_BASE_URL から
    let bus_config = EventBusConfig::from_env()?;
    let endpoint = bus_config.channel_endpoint()?;
    let transport = Arc::new(TcpTransport::from_url(&endpoint)?);

    let session = Arc::new(StaticSession::default());
    session.replace(
        std::env::var("SPINDLE_SESSION_TOKEN").ok(),
        std::env::var("SPINDLE_USER_ID").ok(),
    );
    let session: Arc<dyn SessionProvider> = session;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

    let bus = EventBus::spawn(
        transport,
        Arc::clone(&session),
        Arc::clone(&ids),
        Arc::clone(&clock),
        &bus_config,
    );
    bus.add_subscriber(Arc::new(QueueLogger));
    info!(%endpoint, "event bus started");

    // (B) executor を登録（全 kind が揃っていなければ build が失敗する）
    let scheduler = Scheduler::builder()
        .register(TaskKind::MediaUpload, SimulatedExecutor::new(150, 1))?
        .register(TaskKind::MediaProcess, SimulatedExecutor::new(300, 0))?
        .register(TaskKind::MediaEncrypt, SimulatedExecutor::new(200, 0))?
        .register(TaskKind::PlaceSync, SimulatedExecutor::new(100, 0))?
        .register(TaskKind::VersionCreate, SimulatedExecutor::new(80, 0))?
        .register(TaskKind::BatchOperation, SimulatedExecutor::new(120, 5))?
        .register(TaskKind::FileValidation, FileValidator)?
        .register(TaskKind::SearchIndex, SimulatedExecutor::new(60, 0))?
        .expect_kinds(&TaskKind::ALL)
        .config(SchedulerConfig::default())
        .clock(clock)
        .ids(ids)
        .session(session)
        .bus(bus.clone())
        .build()?;
    scheduler.start();

    // (C) タスク投入
    for request in demo_requests() {
        scheduler.enqueue(request);
    }

    // (D) 全部片付くか Ctrl-C までステータスをポーリング
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        let status = scheduler.status();
        info!(status = %serde_json::to_string(&status)?, "queue status");
        if status.pending_items + status.processing_items + status.retrying_items == 0 {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => {
                warn!("interrupted; shutting down");
                break;
            }
            _ = sleep(Duration::from_millis(500)) => {}
        }
    }

    // (E) graceful shutdown: 実行中のタスクを待ってからチャネルを閉じる
    scheduler.shutdown().await;
    bus.shutdown().await;

    let samples = scheduler.metrics();
    let failed = samples.iter().filter(|s| !s.success).count();
    info!(attempts = samples.len(), failed, "done");
    Ok(())
}
