use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::models::artifact::Artifact;
use crate::models::config::CoordinatorConfig;
use crate::models::device::{Device, ScanOptions};
use crate::models::error::{ArtifactError, ScanError};
use crate::models::progress::{ProgressSnapshot, SessionId, SessionStatus};
use crate::models::state::SessionState;
use crate::processing::assembler::ArtifactAssembler;
use crate::session::lock::ScanLock;
use crate::session::record::SessionRecord;
use crate::session::scan::ScanSession;
use crate::storage::artifact_store;
use crate::traits::scan_driver::ScanDriver;
use crate::traits::session_observer::SessionObserver;

const MIN_SWEEP_PERIOD: Duration = Duration::from_secs(1);

/// Owns every session, keyed by id, and is the only surface the web layer
/// talks to.
///
/// ```text
/// create ──▶ [validate] ──▶ spawn ScanSession ──▶ watch channel
///                                                    │
/// get_progress / subscribe / wait_for_terminal ◀─────┘
/// get_artifact / take_artifact ◀── Done(artifact)
/// evict_expired (sweeper) ◀── terminal + retention elapsed
/// ```
///
/// Progress reads never wait on a session: they clone the record `Arc`
/// under a short read lock and borrow the latest published status.
pub struct SessionRegistry {
    config: CoordinatorConfig,
    driver: Arc<dyn ScanDriver>,
    lock: ScanLock,
    assembler: ArtifactAssembler,
    observer: Option<Arc<dyn SessionObserver>>,
    catalog: RwLock<BTreeMap<String, Device>>,
    sessions: RwLock<HashMap<SessionId, Arc<SessionRecord>>>,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    pub fn new(driver: Arc<dyn ScanDriver>, config: CoordinatorConfig) -> Self {
        Self {
            config,
            driver,
            lock: ScanLock::new(),
            assembler: ArtifactAssembler::default(),
            observer: None,
            catalog: RwLock::new(BTreeMap::new()),
            sessions: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_assembler(mut self, assembler: ArtifactAssembler) -> Self {
        self.assembler = assembler;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// The lock shared by every session of this registry.
    pub fn scan_lock(&self) -> &ScanLock {
        &self.lock
    }

    pub fn default_device(&self) -> Option<&str> {
        self.config.default_device.as_deref()
    }

    /// Empty options in the configured output format, for clients to fill in.
    pub fn default_options(&self) -> ScanOptions {
        ScanOptions::new(self.config.default_format)
    }

    // ── Device catalog ──

    /// Re-list devices from the driver and replace the catalog.
    pub async fn refresh_devices(&self) -> Result<Vec<Device>, ScanError> {
        let devices = self.driver.list_devices().await?;
        log::info!("found {} scan device(s)", devices.len());

        let mut catalog = self.catalog.write();
        catalog.clear();
        for device in &devices {
            log::debug!("device {} ({}, {} options)", device.id, device.label, device.options.len());
            catalog.insert(device.id.clone(), device.clone());
        }
        Ok(devices)
    }

    pub fn devices(&self) -> Vec<Device> {
        self.catalog.read().values().cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.catalog.read().get(device_id).cloned()
    }

    // ── Session lifecycle ──

    /// Validate a request and start its session in the background.
    ///
    /// `device_id` falls back to the configured default device. Nothing
    /// touches the device before this returns; lock contention and device
    /// faults show up later in the session's progress. Must be called from
    /// within a Tokio runtime.
    pub fn create(&self, device_id: Option<&str>, options: ScanOptions) -> Result<SessionId, ScanError> {
        if self.shutdown.is_cancelled() {
            return Err(ScanError::Busy("coordinator is shutting down".into()));
        }

        let device_id = device_id
            .or(self.config.default_device.as_deref())
            .ok_or_else(|| ScanError::NotFound("no device requested and no default configured".into()))?;
        let device = self
            .device(device_id)
            .ok_or_else(|| ScanError::NotFound(device_id.to_string()))?;

        let defaults = supported_defaults(&device, &self.config.default_options);
        let validated = device.validate(&options.merged_over(&defaults))?;

        let id = SessionId::next();
        let record = Arc::new(SessionRecord::new(
            id,
            device.id.clone(),
            validated,
            self.shutdown.child_token(),
        ));
        self.sessions.write().insert(id, Arc::clone(&record));
        log::info!("created session {} for {}", id, device.id);

        let session = ScanSession::new(
            Arc::clone(&record),
            Arc::clone(&self.driver),
            self.lock.clone(),
            self.assembler.clone(),
            self.config.timeouts(),
        )
        .with_observer(self.observer.clone());
        let artifact_dir = self.config.artifact_dir.clone();
        let device_id = device.id;

        tokio::spawn(async move {
            // A panicking driver or observer unwinds the inner task; the
            // record still has to reach a terminal state.
            let terminal = match tokio::spawn(session.run()).await {
                Ok(terminal) => terminal,
                Err(e) => {
                    log::error!("session {} on {} aborted: {}", id, device_id, e);
                    record.publish(SessionState::Failed(ScanError::DeviceError(
                        "session task panicked".into(),
                    )));
                    record.status().state
                }
            };
            if let (Some(dir), SessionState::Done(artifact)) = (artifact_dir, terminal) {
                persist(id, device_id, artifact, dir).await;
            }
        });

        Ok(id)
    }

    /// Latest published progress, or `None` for an unknown or evicted id.
    pub fn get_progress(&self, id: SessionId) -> Option<ProgressSnapshot> {
        self.record(id).map(|record| record.snapshot())
    }

    pub fn get_artifact(&self, id: SessionId) -> Result<Arc<Artifact>, ArtifactError> {
        let record = self.record(id).ok_or(ArtifactError::NotFound)?;
        let status = record.status();
        match status.state {
            SessionState::Done(artifact) => Ok(artifact),
            SessionState::Failed(error) => Err(ArtifactError::Failed(error)),
            SessionState::Cancelled => Err(ArtifactError::Cancelled),
            other => Err(ArtifactError::NotReady {
                phase: other.phase(),
            }),
        }
    }

    /// Hand out the artifact and forget the session in one step.
    pub fn take_artifact(&self, id: SessionId) -> Result<Arc<Artifact>, ArtifactError> {
        let artifact = self.get_artifact(id)?;
        self.sessions.write().remove(&id);
        log::debug!("session {} collected", id);
        Ok(artifact)
    }

    /// Forget a terminal session. Running sessions are left alone.
    pub fn acknowledge(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.write();
        if !sessions.get(&id).is_some_and(|record| record.is_terminal()) {
            return false;
        }
        sessions.remove(&id);
        log::debug!("session {} acknowledged", id);
        true
    }

    /// Request cancellation. Returns `false` if the session is unknown or
    /// already terminal.
    pub fn cancel(&self, id: SessionId) -> bool {
        let Some(record) = self.record(id) else {
            return false;
        };
        if record.is_terminal() {
            return false;
        }
        log::info!("cancelling session {}", id);
        record.cancel_token().cancel();
        true
    }

    /// Guard that cancels the session when dropped, for tying a session to
    /// the lifetime of a client request. Dropping it after the session has
    /// finished is harmless.
    pub fn cancel_on_drop(&self, id: SessionId) -> Option<DropGuard> {
        self.record(id)
            .map(|record| record.cancel_token().clone().drop_guard())
    }

    pub fn subscribe(&self, id: SessionId) -> Option<watch::Receiver<SessionStatus>> {
        self.record(id).map(|record| record.subscribe())
    }

    /// Wait until the session is terminal and return its final status.
    ///
    /// Returns `None` for an unknown id. If the session is evicted while
    /// waiting, the last status seen is returned.
    pub async fn wait_for_terminal(&self, id: SessionId) -> Option<SessionStatus> {
        let mut receiver = self.subscribe(id)?;
        let finished = receiver
            .wait_for(|status| status.state.is_terminal())
            .await
            .map(|status| status.clone())
            .ok();
        finished.or_else(|| Some(receiver.borrow().clone()))
    }

    /// Snapshots of every known session, oldest first.
    pub fn list(&self) -> Vec<ProgressSnapshot> {
        let mut snapshots: Vec<ProgressSnapshot> = self
            .sessions
            .read()
            .values()
            .map(|record| record.snapshot())
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.session_id);
        snapshots
    }

    // ── Retention ──

    /// Drop terminal sessions older than the configured retention window.
    pub fn evict_expired(&self) -> usize {
        self.evict_older_than(self.config.retention())
    }

    /// Drop terminal sessions that finished at least `retention` ago.
    pub fn evict_older_than(&self, retention: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| match record.finished_at() {
            Some(finished) => finished.elapsed() < retention,
            None => true,
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            log::info!("evicted {} expired session(s), {} remaining", evicted, sessions.len());
        }
        evicted
    }

    /// Run `evict_expired` every `sweep_interval_secs` (at least once a
    /// second) until shutdown or until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let stop = self.shutdown.clone();
        let period = self.config.sweep_interval().max(MIN_SWEEP_PERIOD);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.evict_expired();
            }
            log::debug!("eviction sweeper stopped");
        })
    }

    /// Cancel every live session and refuse new ones.
    pub fn shutdown(&self) {
        let live = self
            .sessions
            .read()
            .values()
            .filter(|record| !record.is_terminal())
            .count();
        log::info!("shutting down, cancelling {} live session(s)", live);
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn record(&self, id: SessionId) -> Option<Arc<SessionRecord>> {
        self.sessions.read().get(&id).cloned()
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("devices", &self.catalog.read().len())
            .field("sessions", &self.sessions.read().len())
            .field("lock", &self.lock)
            .finish()
    }
}

/// Configured defaults this device can actually take, in its own spelling.
fn supported_defaults(device: &Device, defaults: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    defaults
        .iter()
        .filter_map(|(name, value)| {
            let canonical = device.option(name)?.constraint.canonicalize(value)?;
            Some((name.clone(), canonical))
        })
        .collect()
}

async fn persist(id: SessionId, device_id: String, artifact: Arc<Artifact>, dir: std::path::PathBuf) {
    let session = id.to_string();
    let written = tokio::task::spawn_blocking(move || {
        let metadata = artifact.metadata(&session, &device_id);
        artifact_store::persist_artifact(&artifact, &metadata, &dir)
    })
    .await;

    match written {
        Ok(Ok(path)) => log::info!("session {} artifact written to {}", id, path.display()),
        Ok(Err(e)) => log::error!("session {} artifact could not be stored: {}", id, e),
        Err(e) => log::error!("session {} storage task failed: {}", id, e),
    }
}
