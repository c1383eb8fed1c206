use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::models::artifact::Artifact;
use crate::models::config::SessionTimeouts;
use crate::models::error::ScanError;
use crate::models::page::Page;
use crate::models::progress::SessionId;
use crate::models::state::SessionState;
use crate::processing::assembler::ArtifactAssembler;
use crate::session::lock::ScanLock;
use crate::session::record::SessionRecord;
use crate::traits::scan_driver::{DeviceHandle, Frame, ScanDriver};
use crate::traits::session_observer::SessionObserver;

/// Why a session stopped short of `Done`.
enum Stop {
    Failed(ScanError),
    Cancelled,
}

impl From<ScanError> for Stop {
    fn from(error: ScanError) -> Self {
        Self::Failed(error)
    }
}

/// Executes one scan request from `Pending` to a terminal state.
///
/// Data flow:
/// ```text
/// [ScanLock] → [ScanDriver::open] → configure → read_frame ⟲ → close
///                                                  ↓
///                              [ArtifactAssembler] → Done(artifact)
/// ```
///
/// Cancellation is checked at every await point. The device is closed
/// exactly once after a successful open and the lock is released before the
/// terminal state becomes visible to pollers.
pub struct ScanSession {
    record: Arc<SessionRecord>,
    driver: Arc<dyn ScanDriver>,
    lock: ScanLock,
    assembler: ArtifactAssembler,
    timeouts: SessionTimeouts,
    observer: Option<Arc<dyn SessionObserver>>,
}

impl ScanSession {
    pub fn new(
        record: Arc<SessionRecord>,
        driver: Arc<dyn ScanDriver>,
        lock: ScanLock,
        assembler: ArtifactAssembler,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            record,
            driver,
            lock,
            assembler,
            timeouts,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<Arc<dyn SessionObserver>>) -> Self {
        self.observer = observer;
        self
    }

    pub fn id(&self) -> SessionId {
        self.record.id()
    }

    fn device_id(&self) -> &str {
        self.record.device_id()
    }

    /// Drive the session to completion and return its terminal state.
    ///
    /// Never fails: every error ends up in the returned state.
    pub async fn run(self) -> SessionState {
        log::info!(
            "session {} starting on {} ({} options, {})",
            self.id(),
            self.device_id(),
            self.record.options().values.len(),
            self.record.options().format
        );

        let cancel = self.record.cancel_token().clone();
        let terminal = match self.drive(&cancel).await {
            Ok(artifact) => {
                log::info!(
                    "session {} on {} done: {} page(s), {} bytes",
                    self.id(),
                    self.device_id(),
                    artifact.page_count(),
                    artifact.len()
                );
                SessionState::Done(Arc::new(artifact))
            }
            Err(Stop::Cancelled) => {
                log::warn!(
                    "session {} on {} cancelled while {}",
                    self.id(),
                    self.device_id(),
                    self.record.status().state.phase()
                );
                SessionState::Cancelled
            }
            Err(Stop::Failed(error)) => {
                self.report_failure(&error);
                SessionState::Failed(error)
            }
        };

        self.transition(terminal.clone());
        terminal
    }

    async fn drive(&self, cancel: &CancellationToken) -> Result<Artifact, Stop> {
        if cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        self.transition(SessionState::Opening);

        let token = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Stop::Cancelled),
            acquired = self.lock.acquire(self.device_id(), self.timeouts.lock) => acquired?,
        };
        log::debug!("session {} holds {}", self.id(), token.device_id());

        let outcome = self.scan_locked(cancel).await;
        token.release();
        outcome
    }

    async fn scan_locked(&self, cancel: &CancellationToken) -> Result<Artifact, Stop> {
        let pages = self.capture(cancel).await?;

        if cancel.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        self.transition(SessionState::Assembling);

        let assembler = self.assembler.clone();
        let format = self.record.options().format;
        let mut job = tokio::task::spawn_blocking(move || assembler.assemble(pages, format));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // The encoder cannot be interrupted; its output is discarded.
                job.abort();
                Err(Stop::Cancelled)
            }
            joined = &mut job => match joined {
                Ok(result) => result.map_err(Stop::from),
                Err(e) => Err(Stop::Failed(ScanError::AssemblyError(format!(
                    "assembly task failed: {e}"
                )))),
            },
        }
    }

    /// Open the device, capture every page, then close it whatever happened.
    async fn capture(&self, cancel: &CancellationToken) -> Result<Vec<Page>, Stop> {
        let device_id = self.device_id().to_string();
        let driver = Arc::clone(&self.driver);
        let mut handle = self
            .bounded(cancel, self.timeouts.open, "opening", driver.open(&device_id))
            .await?;

        let captured = self.read_pages(handle.as_mut(), cancel).await;

        match tokio::time::timeout(self.timeouts.open, handle.close()).await {
            Ok(Ok(())) => log::debug!("session {} closed {}", self.id(), device_id),
            Ok(Err(e)) => log::warn!("session {} failed to close {}: {}", self.id(), device_id, e),
            Err(_) => log::warn!("session {} timed out closing {}", self.id(), device_id),
        }

        captured
    }

    async fn read_pages(
        &self,
        handle: &mut dyn DeviceHandle,
        cancel: &CancellationToken,
    ) -> Result<Vec<Page>, Stop> {
        let options = self.record.options();
        self.bounded(cancel, self.timeouts.open, "configuring", handle.configure(options))
            .await?;
        self.transition(SessionState::Capturing);

        let mut pages = Vec::new();
        loop {
            let frame = self
                .bounded(cancel, self.timeouts.frame, "reading a frame", handle.read_frame())
                .await?;
            match frame {
                Frame::Page(page) => {
                    log::debug!(
                        "session {} captured page {} ({}x{} @ {} dpi)",
                        self.id(),
                        pages.len() + 1,
                        page.width,
                        page.height,
                        page.resolution_dpi
                    );
                    pages.push(page);
                    let count = self.record.record_page();
                    if let Some(observer) = &self.observer {
                        observer.on_page_captured(self.id(), self.device_id(), count);
                    }
                }
                Frame::NoMorePages => break,
            }
        }

        if pages.is_empty() {
            return Err(Stop::Failed(ScanError::DeviceError(format!(
                "{} reported no pages",
                self.device_id()
            ))));
        }
        Ok(pages)
    }

    /// Await a driver call, giving up on cancellation or after `limit`.
    async fn bounded<T>(
        &self,
        cancel: &CancellationToken,
        limit: Duration,
        action: &str,
        call: impl Future<Output = Result<T, ScanError>>,
    ) -> Result<T, Stop> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Stop::Cancelled),
            outcome = tokio::time::timeout(limit, call) => match outcome {
                Ok(result) => result.map_err(Stop::from),
                Err(_) => Err(Stop::Failed(ScanError::DeviceError(format!(
                    "{} timed out {} after {} ms",
                    self.device_id(),
                    action,
                    limit.as_millis()
                )))),
            },
        }
    }

    fn transition(&self, state: SessionState) {
        if !self.record.publish(state.clone()) {
            return;
        }
        log::debug!("session {} → {}", self.id(), state.phase());
        if let Some(observer) = &self.observer {
            observer.on_state_changed(self.id(), self.device_id(), &state);
        }
    }

    fn report_failure(&self, error: &ScanError) {
        let phase = self.record.status().state.phase();
        match error {
            ScanError::Busy(_) | ScanError::InvalidOptions(_) | ScanError::NotFound(_) => {
                log::warn!(
                    "session {} on {} failed while {}: {}",
                    self.id(),
                    self.device_id(),
                    phase,
                    error
                );
            }
            ScanError::DeviceError(_) | ScanError::AssemblyError(_) => {
                log::error!(
                    "session {} on {} failed while {}: {}",
                    self.id(),
                    self.device_id(),
                    phase,
                    error
                );
            }
        }
    }
}
