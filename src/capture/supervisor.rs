//! Capture supervisor.
//!
//! Owns one long-lived tokio task per actively-captured stream. The task
//! drives the session state machine: spawn the encoder, watch its liveness,
//! restart it after a fixed delay on failure, and give up once the
//! consecutive-failure threshold is exceeded. `start`, `stop` and `status`
//! are the only entry points; per-stream operations are serialized through a
//! per-key async lock so concurrent calls cannot race the registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::capture::command_builder::{build_invocation, EncoderInvocation};
use crate::capture::process::{ManagedProcess, ProcessLauncher};
use crate::capture::types::{CaptureSession, CaptureState, SupervisorSettings};
use crate::error_handling::types::{EngineError, ProcessError};
use crate::notification::Notifier;
use crate::storage::types::StreamConfig;
use crate::storage::Storage;

pub struct CaptureSupervisor {
    storage: Arc<dyn Storage>,
    launcher: Arc<dyn ProcessLauncher>,
    notifier: Arc<dyn Notifier>,
    recordings_root: PathBuf,
    settings: SupervisorSettings,
    sessions: StdMutex<HashMap<i64, SessionHandle>>,
    stream_locks: StdMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

struct SessionHandle {
    shared: Arc<StdMutex<CaptureSession>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl CaptureSupervisor {
    pub fn new(
        storage: Arc<dyn Storage>,
        launcher: Arc<dyn ProcessLauncher>,
        notifier: Arc<dyn Notifier>,
        recordings_root: PathBuf,
        settings: SupervisorSettings,
    ) -> Self {
        CaptureSupervisor {
            storage,
            launcher,
            notifier,
            recordings_root,
            settings,
            sessions: StdMutex::new(HashMap::new()),
            stream_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn stream_lock(&self, stream_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.stream_locks.lock().unwrap();
        locks
            .entry(stream_id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Starts supervision for a stream. A no-op returning the current
    /// snapshot when a supervision task is already live.
    pub async fn start(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        let lock = self.stream_lock(stream_id);
        let _guard = lock.lock().await;

        {
            let sessions = self.sessions.lock().unwrap();
            if let Some(handle) = sessions.get(&stream_id) {
                if !handle.task.is_finished() {
                    debug!("Stream {} is already supervised, start is a no-op", stream_id);
                    return Ok(handle.shared.lock().unwrap().clone());
                }
            }
        }

        let config = self
            .storage
            .get_stream(stream_id)
            .await?
            .ok_or(EngineError::StreamNotFound(stream_id))?;
        // A broken definition fails here, before any task is spawned.
        let invocation = build_invocation(&config, &self.recordings_root)?;

        let shared = Arc::new(StdMutex::new(CaptureSession::new(
            config.id,
            config.name.clone(),
        )));
        let snapshot = shared.lock().unwrap().clone();
        info!(
            "Starting capture for stream {} (session {})",
            config.name, snapshot.session_id
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = SupervisionWorker {
            shared: shared.clone(),
            storage: self.storage.clone(),
            launcher: self.launcher.clone(),
            notifier: self.notifier.clone(),
            config,
            invocation,
            settings: self.settings.clone(),
        };
        let task = tokio::spawn(worker.run(stop_rx));

        self.sessions.lock().unwrap().insert(
            stream_id,
            SessionHandle {
                shared,
                stop_tx,
                task,
            },
        );
        Ok(snapshot)
    }

    /// Stops supervision and waits for the task to wind down. Stopping a
    /// stream that is not supervised returns a stopped snapshot.
    pub async fn stop(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        let lock = self.stream_lock(stream_id);
        let _guard = lock.lock().await;

        let handle = self.sessions.lock().unwrap().remove(&stream_id);
        match handle {
            Some(handle) => {
                let _ = handle.stop_tx.send(true);
                if let Err(e) = handle.task.await {
                    warn!("Supervision task for stream {} panicked: {}", stream_id, e);
                }
                let snapshot = handle.shared.lock().unwrap().clone();
                info!("Capture stopped for stream {}", snapshot.stream_name);
                Ok(snapshot)
            }
            None => {
                let config = self
                    .storage
                    .get_stream(stream_id)
                    .await?
                    .ok_or(EngineError::StreamNotFound(stream_id))?;
                Ok(CaptureSession::stopped(
                    config.id,
                    config.name,
                    config.last_error,
                ))
            }
        }
    }

    /// Current session snapshot. Streams without a live task report as
    /// stopped, carrying the last persisted error if any.
    pub async fn status(&self, stream_id: i64) -> Result<CaptureSession, EngineError> {
        {
            let sessions = self.sessions.lock().unwrap();
            if let Some(handle) = sessions.get(&stream_id) {
                return Ok(handle.shared.lock().unwrap().clone());
            }
        }
        let config = self
            .storage
            .get_stream(stream_id)
            .await?
            .ok_or(EngineError::StreamNotFound(stream_id))?;
        Ok(CaptureSession::stopped(
            config.id,
            config.name,
            config.last_error,
        ))
    }

    /// Streams that currently have a supervision task registered.
    pub fn supervised_stream_ids(&self) -> Vec<i64> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    pub async fn stop_all(&self) {
        for stream_id in self.supervised_stream_ids() {
            if let Err(e) = self.stop(stream_id).await {
                error!("Failed to stop stream {}: {}", stream_id, e);
            }
        }
    }
}

enum MonitorOutcome {
    /// Stop was requested and the encoder was terminated.
    Stopped,
    /// The encoder died on its own.
    Crashed(String),
}

struct SupervisionWorker {
    shared: Arc<StdMutex<CaptureSession>>,
    storage: Arc<dyn Storage>,
    launcher: Arc<dyn ProcessLauncher>,
    notifier: Arc<dyn Notifier>,
    config: StreamConfig,
    invocation: EncoderInvocation,
    settings: SupervisorSettings,
}

impl SupervisionWorker {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let retry_delay = self
            .config
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_retry_delay);

        loop {
            self.set_state(CaptureState::Starting);
            let failure = match self.launcher.launch(&self.invocation).await {
                Err(e) => e.to_string(),
                Ok(mut process) => {
                    if !process.is_alive() {
                        ProcessError::Crashed(
                            process
                                .exit_description()
                                .unwrap_or_else(|| "encoder exited during startup".to_string()),
                        )
                        .to_string()
                    } else {
                        match self.monitor(process.as_mut(), &mut stop_rx).await {
                            MonitorOutcome::Stopped => {
                                self.finish_stopped(None).await;
                                return;
                            }
                            MonitorOutcome::Crashed(reason) => {
                                ProcessError::Crashed(reason).to_string()
                            }
                        }
                    }
                }
            };

            let failures = self.mark_failure(&failure);
            warn!(
                "Stream {} capture failed ({} consecutive): {}",
                self.config.name, failures, failure
            );
            if let Err(e) = self
                .storage
                .update_stream_status(self.config.id, "error", Some(&failure))
                .await
            {
                warn!("Failed to persist error status: {}", e);
            }
            if let Err(e) = self
                .storage
                .record_event(
                    Some(self.config.id),
                    "warning",
                    &format!("capture failure {}: {}", failures, failure),
                )
                .await
            {
                warn!("Failed to record failure event: {}", e);
            }

            if failures > self.settings.max_consecutive_failures {
                error!(
                    "Stream {} failed {} times in a row, giving up",
                    self.config.name, failures
                );
                self.notifier
                    .notify_persistent_failure(&self.config, &failure)
                    .await;
                self.finish_stopped(Some(failure)).await;
                return;
            }

            self.set_state(CaptureState::Retrying);
            debug!(
                "Stream {} retrying in {:?}",
                self.config.name, retry_delay
            );
            tokio::select! {
                _ = stop_rx.changed() => {
                    self.finish_stopped(None).await;
                    return;
                }
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }

    /// Watches a live encoder until it dies or a stop is requested. The
    /// consecutive-failure count resets only once the process has stayed
    /// alive past the stability window.
    async fn monitor(
        &self,
        process: &mut dyn ManagedProcess,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> MonitorOutcome {
        {
            let mut session = self.shared.lock().unwrap();
            session.state = CaptureState::Running;
            session.started_at = Some(Utc::now());
        }
        info!("Stream {} is capturing", self.config.name);
        if let Err(e) = self
            .storage
            .update_stream_status(self.config.id, "running", None)
            .await
        {
            warn!("Failed to persist running status: {}", e);
        }

        let run_started = Instant::now();
        let mut failures_reset = false;
        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    self.set_state(CaptureState::Stopping);
                    info!("Stopping encoder for stream {}", self.config.name);
                    if let Err(e) = process.terminate(self.settings.terminate_grace).await {
                        warn!(
                            "Encoder for stream {} did not terminate cleanly: {}",
                            self.config.name, e
                        );
                    }
                    return MonitorOutcome::Stopped;
                }
                _ = tokio::time::sleep(self.settings.liveness_poll) => {
                    if !failures_reset
                        && run_started.elapsed() >= self.settings.stable_run_threshold
                    {
                        self.reset_failures();
                        failures_reset = true;
                    }
                    if !process.is_alive() {
                        let reason = process
                            .exit_description()
                            .unwrap_or_else(|| "encoder exited unexpectedly".to_string());
                        return MonitorOutcome::Crashed(reason);
                    }
                }
            }
        }
    }

    fn set_state(&self, state: CaptureState) {
        self.shared.lock().unwrap().state = state;
    }

    fn mark_failure(&self, reason: &str) -> u32 {
        let mut session = self.shared.lock().unwrap();
        session.state = CaptureState::Error;
        session.consecutive_failures += 1;
        session.last_error = Some(reason.to_string());
        session.consecutive_failures
    }

    fn reset_failures(&self) {
        let mut session = self.shared.lock().unwrap();
        if session.consecutive_failures > 0 {
            debug!(
                "Stream {} stable, resetting failure count from {}",
                self.config.name, session.consecutive_failures
            );
            session.consecutive_failures = 0;
        }
    }

    async fn finish_stopped(&self, last_error: Option<String>) {
        self.set_state(CaptureState::Stopped);
        if let Err(e) = self
            .storage
            .update_stream_status(self.config.id, "stopped", last_error.as_deref())
            .await
        {
            warn!("Failed to persist stopped status: {}", e);
        }
        info!("Supervision ended for stream {}", self.config.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::command_builder::EncoderInvocation;
    use crate::configuration::types::StreamSeed;
    use crate::error_handling::types::ProcessError;
    use crate::storage::DatabaseStorage;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum FakeOutcome {
        SpawnFail,
        RunFor(Duration),
        RunForever,
    }

    struct FakePlan {
        scripted: StdMutex<VecDeque<FakeOutcome>>,
        fallback: FakeOutcome,
        launches: AtomicU32,
        terminated: AtomicBool,
    }

    impl FakePlan {
        fn new(scripted: Vec<FakeOutcome>, fallback: FakeOutcome) -> Arc<Self> {
            Arc::new(FakePlan {
                scripted: StdMutex::new(scripted.into()),
                fallback,
                launches: AtomicU32::new(0),
                terminated: AtomicBool::new(false),
            })
        }
    }

    struct FakeLauncher {
        plan: Arc<FakePlan>,
    }

    #[async_trait]
    impl ProcessLauncher for FakeLauncher {
        async fn launch(
            &self,
            _invocation: &EncoderInvocation,
        ) -> Result<Box<dyn ManagedProcess>, ProcessError> {
            self.plan.launches.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .plan
                .scripted
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(self.plan.fallback);
            match outcome {
                FakeOutcome::SpawnFail => {
                    Err(ProcessError::SpawnFailed("fake encoder unavailable".to_string()))
                }
                FakeOutcome::RunFor(lifetime) => Ok(Box::new(FakeProcess {
                    dies_at: Some(Instant::now() + lifetime),
                    terminated: false,
                    plan: self.plan.clone(),
                })),
                FakeOutcome::RunForever => Ok(Box::new(FakeProcess {
                    dies_at: None,
                    terminated: false,
                    plan: self.plan.clone(),
                })),
            }
        }
    }

    struct FakeProcess {
        dies_at: Option<Instant>,
        terminated: bool,
        plan: Arc<FakePlan>,
    }

    impl FakeProcess {
        fn dead(&self) -> bool {
            self.terminated
                || self
                    .dies_at
                    .map(|t| Instant::now() >= t)
                    .unwrap_or(false)
        }
    }

    #[async_trait]
    impl ManagedProcess for FakeProcess {
        fn is_alive(&mut self) -> bool {
            !self.dead()
        }

        fn exit_description(&self) -> Option<String> {
            if self.dead() {
                Some("fake encoder exited with status 1".to_string())
            } else {
                None
            }
        }

        async fn terminate(&mut self, _grace: Duration) -> Result<(), ProcessError> {
            self.terminated = true;
            self.plan.terminated.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct CountingNotifier {
        persistent_failures: AtomicU32,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify_persistent_failure(&self, _stream: &StreamConfig, _reason: &str) {
            self.persistent_failures.fetch_add(1, Ordering::SeqCst);
        }

        async fn notify_daily_report(&self, _summary: Value) {}
    }

    fn seed() -> StreamSeed {
        StreamSeed {
            name: "kexp".to_string(),
            url: "https://kexp.example/stream".to_string(),
            enabled: true,
            format: "mp3".to_string(),
            segment_time: 60,
            channels: 2,
            bitrate: Some("128k".to_string()),
            retention_days: None,
            retry_delay_secs: None,
        }
    }

    fn settings() -> SupervisorSettings {
        SupervisorSettings {
            liveness_poll: Duration::from_millis(10),
            default_retry_delay: Duration::from_millis(25),
            max_consecutive_failures: 3,
            stable_run_threshold: Duration::from_millis(40),
            terminate_grace: Duration::from_millis(100),
        }
    }

    struct Fixture {
        supervisor: CaptureSupervisor,
        stream_id: i64,
        plan: Arc<FakePlan>,
        notifier: Arc<CountingNotifier>,
        _dir: &'static TempDir,
    }

    async fn fixture(plan: Arc<FakePlan>, settings: SupervisorSettings) -> Fixture {
        let dir = Box::leak(Box::new(TempDir::new().unwrap()));
        let storage: Arc<dyn Storage> = Arc::new(
            DatabaseStorage::new_file(&dir.path().join("test.sqlite3"))
                .await
                .unwrap(),
        );
        let stream = storage.upsert_stream(&seed()).await.unwrap();
        let notifier = Arc::new(CountingNotifier {
            persistent_failures: AtomicU32::new(0),
        });
        let supervisor = CaptureSupervisor::new(
            storage,
            Arc::new(FakeLauncher { plan: plan.clone() }),
            notifier.clone(),
            dir.path().join("recordings"),
            settings,
        );
        Fixture {
            supervisor,
            stream_id: stream.id,
            plan,
            notifier,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_crash_twice_then_stable_resets_failures() {
        let plan = FakePlan::new(
            vec![
                FakeOutcome::RunFor(Duration::from_millis(20)),
                FakeOutcome::RunFor(Duration::from_millis(20)),
            ],
            FakeOutcome::RunForever,
        );
        let fx = fixture(plan, settings()).await;

        fx.supervisor.start(fx.stream_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let session = fx.supervisor.status(fx.stream_id).await.unwrap();
        assert_eq!(session.state, CaptureState::Running);
        assert_eq!(session.consecutive_failures, 0);
        assert_eq!(fx.notifier.persistent_failures.load(Ordering::SeqCst), 0);
        assert_eq!(fx.plan.launches.load(Ordering::SeqCst), 3);

        fx.supervisor.stop(fx.stream_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_threshold_breach_stops_and_notifies_once() {
        let plan = FakePlan::new(vec![], FakeOutcome::SpawnFail);
        let fx = fixture(plan, settings()).await;

        fx.supervisor.start(fx.stream_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        let session = fx.supervisor.status(fx.stream_id).await.unwrap();
        assert_eq!(session.state, CaptureState::Stopped);
        // max_consecutive_failures 3 means the fourth failure gives up.
        assert_eq!(fx.plan.launches.load(Ordering::SeqCst), 4);
        assert_eq!(fx.notifier.persistent_failures.load(Ordering::SeqCst), 1);
        assert!(session.last_error.is_some());
    }

    #[tokio::test]
    async fn test_start_is_noop_while_running() {
        let plan = FakePlan::new(vec![], FakeOutcome::RunForever);
        let fx = fixture(plan, settings()).await;

        let first = fx.supervisor.start(fx.stream_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let second = fx.supervisor.start(fx.stream_id).await.unwrap();

        assert_eq!(first.session_id, second.session_id);
        assert_eq!(fx.plan.launches.load(Ordering::SeqCst), 1);

        fx.supervisor.stop(fx.stream_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_cancels_retry_backoff() {
        let plan = FakePlan::new(vec![], FakeOutcome::SpawnFail);
        let mut settings = settings();
        settings.default_retry_delay = Duration::from_secs(30);
        let fx = fixture(plan, settings).await;

        fx.supervisor.start(fx.stream_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The worker is deep in its 30 s backoff; stop must not wait it out.
        let session = tokio::time::timeout(
            Duration::from_secs(2),
            fx.supervisor.stop(fx.stream_id),
        )
        .await
        .expect("stop should cancel the backoff promptly")
        .unwrap();
        assert_eq!(session.state, CaptureState::Stopped);
        assert_eq!(fx.notifier.persistent_failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_terminates_running_encoder() {
        let plan = FakePlan::new(vec![], FakeOutcome::RunForever);
        let fx = fixture(plan, settings()).await;

        fx.supervisor.start(fx.stream_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let session = fx.supervisor.stop(fx.stream_id).await.unwrap();
        assert_eq!(session.state, CaptureState::Stopped);
        assert!(fx.plan.terminated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unknown_stream_is_rejected() {
        let plan = FakePlan::new(vec![], FakeOutcome::RunForever);
        let fx = fixture(plan, settings()).await;

        assert!(matches!(
            fx.supervisor.start(9999).await,
            Err(EngineError::StreamNotFound(9999))
        ));
        assert!(matches!(
            fx.supervisor.status(9999).await,
            Err(EngineError::StreamNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_invalid_definition_fails_before_launch() {
        let plan = FakePlan::new(vec![], FakeOutcome::RunForever);
        let fx = fixture(plan, settings()).await;

        let mut bad = seed();
        bad.name = "broken".to_string();
        bad.format = "flac".to_string();
        let stream = fx.supervisor.storage.upsert_stream(&bad).await.unwrap();

        assert!(matches!(
            fx.supervisor.start(stream.id).await,
            Err(EngineError::Config(_))
        ));
        assert_eq!(fx.plan.launches.load(Ordering::SeqCst), 0);
    }
}
